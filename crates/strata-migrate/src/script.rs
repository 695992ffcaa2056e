//! Versioned migration scripts.
//!
//! A script is an immutable record of one SQL file on disk. The body is read
//! lazily and cached; the checksum hashes the placeholder-substituted body,
//! so the ledger notices edits to an already-applied script.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use sha2::{Digest, Sha256};

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};
use crate::version::MigrationVersion;

/// One on-disk migration script. Identity is the version.
#[derive(Debug)]
pub struct MigrationScript {
    version: MigrationVersion,
    name: String,
    description: String,
    path: PathBuf,
    body: OnceLock<String>,
}

impl MigrationScript {
    /// Parses a file path against the configured name grammar
    /// `<prefix><version><separator><description><suffix>`.
    ///
    /// Returns `Ok(None)` for files that are not candidates (wrong prefix or
    /// suffix); those co-locate freely with scripts. A candidate that fails
    /// the grammar is an error.
    pub fn from_path(path: &Path, config: &MigrationConfig) -> Result<Option<Self>> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };

        let prefix = &config.sql_migration_prefix;
        let suffix = &config.sql_migration_suffix;
        if !name.starts_with(prefix.as_str()) || !name.ends_with(suffix.as_str()) {
            return Ok(None);
        }

        let stem = &name[prefix.len()..name.len() - suffix.len()];
        let Some((version_text, description)) = stem.split_once(&config.sql_migration_separator)
        else {
            return Err(MigrateError::InvalidScriptName {
                name: name.to_string(),
                reason: format!(
                    "missing '{}' separator between version and description",
                    config.sql_migration_separator
                ),
            });
        };

        let version =
            MigrationVersion::parse(version_text).map_err(|e| MigrateError::InvalidScriptName {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Some(Self {
            version,
            name: name.to_string(),
            description: description.to_string(),
            path: path.to_path_buf(),
            body: OnceLock::new(),
        }))
    }

    /// The script's version.
    #[must_use]
    pub fn version(&self) -> &MigrationVersion {
        &self.version
    }

    /// The full file name, e.g. `V1__init.sql`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description part of the file name.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Where the script was discovered.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The raw body, read from disk on first access and cached.
    pub fn raw_body(&self) -> Result<&str> {
        if let Some(body) = self.body.get() {
            return Ok(body);
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(self.body.get_or_init(|| text))
    }

    /// The body with placeholders substituted, as it will be executed.
    pub fn resolved_body(&self, config: &MigrationConfig) -> Result<String> {
        Ok(substitute_placeholders(self.raw_body()?, config))
    }

    /// SHA-256 hex digest of the resolved body.
    ///
    /// Stable across runs and platforms for a fixed placeholder map.
    pub fn checksum(&self, config: &MigrationConfig) -> Result<String> {
        let body = self.resolved_body(config)?;
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Replaces every `<prefix>KEY<suffix>` occurrence with the configured value
/// for KEY. Unknown placeholders pass through intact.
///
/// The placeholder map is a `BTreeMap`, so substitution order is fixed.
pub(crate) fn substitute_placeholders(body: &str, config: &MigrationConfig) -> String {
    let mut out = body.to_string();
    for (key, value) in &config.placeholders {
        let token = format!(
            "{}{}{}",
            config.placeholder_prefix, key, config.placeholder_suffix
        );
        out = out.replace(&token, value);
    }
    out
}
