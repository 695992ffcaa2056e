//! Discovery of migration scripts under the configured locations.

use std::fs;

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};
use crate::script::MigrationScript;

/// Discovers migration scripts and returns them in version order.
pub struct MigrationLoader<'a> {
    config: &'a MigrationConfig,
}

impl<'a> MigrationLoader<'a> {
    /// Creates a loader over the configured locations.
    #[must_use]
    pub fn new(config: &'a MigrationConfig) -> Self {
        Self { config }
    }

    /// Scans every location and returns a strictly version-ascending
    /// sequence of scripts.
    ///
    /// A missing location and a duplicated version are fatal; files that do
    /// not match the name grammar are skipped.
    pub fn load(&self) -> Result<Vec<MigrationScript>> {
        let mut scripts = Vec::new();

        for location in &self.config.locations {
            if !location.is_dir() {
                return Err(MigrateError::LocationMissing(location.clone()));
            }

            let mut entries: Vec<_> = fs::read_dir(location)?.collect::<std::io::Result<_>>()?;
            // read_dir order is platform-dependent
            entries.sort_by_key(|e| e.file_name());

            for entry in entries {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(script) = MigrationScript::from_path(&path, self.config)? {
                    scripts.push(script);
                }
            }
        }

        scripts.sort_by(|a, b| a.version().cmp(b.version()));

        for pair in scripts.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(MigrateError::DuplicateVersion {
                    version: pair[0].version().to_string(),
                    first: pair[0].path().to_path_buf(),
                    second: pair[1].path().to_path_buf(),
                });
            }
        }

        Ok(scripts)
    }
}
