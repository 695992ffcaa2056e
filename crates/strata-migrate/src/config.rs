//! Engine configuration.
//!
//! A [`MigrationConfig`] is built up front and handed to the engine by value;
//! once a command starts there is no way to mutate it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::version::MigrationVersion;

/// The command [`crate::engine::MigrationEngine::run`] executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationCommand {
    /// Apply outstanding scripts up to the target version.
    #[default]
    Migrate,
    /// Realign ledger checksums with the scripts on disk.
    Repair,
    /// Drop or empty every schema the engine has a mandate over.
    Erase,
}

/// Configuration for a [`crate::engine::MigrationEngine`].
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Connection string, used only when the engine opens its own connection.
    pub connection_string: String,
    /// Driver name (`sqlite`, `postgres`, ...), used alongside
    /// `connection_string`.
    pub driver: String,
    /// Schemas managed by the engine; empty means "use the connection
    /// default".
    pub schemas: Vec<String>,
    /// Schema holding the ledger table; defaults to the first managed schema.
    pub metadata_table_schema: Option<String>,
    /// Name of the ledger table.
    pub metadata_table_name: String,
    /// Directories scanned for migration scripts, in order.
    pub locations: Vec<PathBuf>,
    /// Script file name prefix.
    pub sql_migration_prefix: String,
    /// Separator between version and description in script file names.
    pub sql_migration_separator: String,
    /// Script file name suffix.
    pub sql_migration_suffix: String,
    /// Opening token of a placeholder.
    pub placeholder_prefix: String,
    /// Closing token of a placeholder.
    pub placeholder_suffix: String,
    /// Placeholder values substituted into script bodies before checksumming
    /// and execution.
    pub placeholders: BTreeMap<String, String>,
    /// Highest version Migrate may apply.
    pub target_version: MigrationVersion,
    /// Command executed by [`crate::engine::MigrationEngine::run`].
    pub command: MigrationCommand,
    /// Safety switch: when set, Erase logs and does nothing.
    pub is_erase_disabled: bool,
    /// When set, a validation failure inside Migrate erases the managed
    /// schemas and migration starts over from scratch.
    pub must_erase_on_validation_error: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            driver: "sqlite".to_string(),
            schemas: Vec::new(),
            metadata_table_schema: None,
            metadata_table_name: "changelog".to_string(),
            locations: vec![PathBuf::from("Sql_Scripts")],
            sql_migration_prefix: "V".to_string(),
            sql_migration_separator: "__".to_string(),
            sql_migration_suffix: ".sql".to_string(),
            placeholder_prefix: "${".to_string(),
            placeholder_suffix: "}".to_string(),
            placeholders: BTreeMap::new(),
            target_version: MigrationVersion::Max,
            command: MigrationCommand::default(),
            is_erase_disabled: false,
            must_erase_on_validation_error: false,
        }
    }
}

impl MigrationConfig {
    /// Creates a configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection string and driver.
    #[must_use]
    pub fn connect(mut self, driver: impl Into<String>, url: impl Into<String>) -> Self {
        self.driver = driver.into();
        self.connection_string = url.into();
        self
    }

    /// Replaces the script locations.
    #[must_use]
    pub fn locations(mut self, locations: Vec<PathBuf>) -> Self {
        self.locations = locations;
        self
    }

    /// Replaces the managed schemas.
    #[must_use]
    pub fn schemas(mut self, schemas: Vec<String>) -> Self {
        self.schemas = schemas;
        self
    }

    /// Sets the ledger table schema and name.
    #[must_use]
    pub fn metadata_table(mut self, schema: Option<String>, name: impl Into<String>) -> Self {
        self.metadata_table_schema = schema;
        self.metadata_table_name = name.into();
        self
    }

    /// Caps Migrate at the given version.
    #[must_use]
    pub fn target_version(mut self, target: MigrationVersion) -> Self {
        self.target_version = target;
        self
    }

    /// Adds one placeholder value.
    #[must_use]
    pub fn placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.insert(key.into(), value.into());
        self
    }

    /// Selects the command executed by `run`.
    #[must_use]
    pub fn command(mut self, command: MigrationCommand) -> Self {
        self.command = command;
        self
    }

    /// Disables the Erase command.
    #[must_use]
    pub fn disable_erase(mut self, disabled: bool) -> Self {
        self.is_erase_disabled = disabled;
        self
    }

    /// Erase and restart migration when validation fails inside Migrate.
    #[must_use]
    pub fn erase_on_validation_error(mut self, enabled: bool) -> Self {
        self.must_erase_on_validation_error = enabled;
        self
    }
}
