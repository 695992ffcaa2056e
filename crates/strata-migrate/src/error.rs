//! Error types for the migration engine.

use std::path::PathBuf;

/// Errors that can occur while running a migration command.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Missing or invalid configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Failed to open or validate the database connection.
    #[error("Failed to validate the database connection: {0}")]
    Connection(#[source] sqlx::Error),

    /// A configured script location does not exist.
    #[error("Migration location not found: {0}")]
    LocationMissing(PathBuf),

    /// Two discovered scripts share the same version.
    #[error("Duplicate migration version {version}: {} and {}", .first.display(), .second.display())]
    DuplicateVersion {
        /// The shared version.
        version: String,
        /// First script carrying the version.
        first: PathBuf,
        /// Second script carrying the version.
        second: PathBuf,
    },

    /// A candidate file name does not follow the configured grammar.
    #[error("Invalid migration script name '{name}': {reason}")]
    InvalidScriptName {
        /// The offending file name.
        name: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// A version string could not be parsed.
    #[error("Invalid migration version '{version}': {reason}")]
    InvalidVersion {
        /// The offending version string.
        version: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// An applied script's on-disk checksum no longer matches the ledger.
    #[error("Incorrect migration checksum: {name} (ledger {expected}, script {actual})")]
    IncorrectMigrationChecksum {
        /// Name of the offending script.
        name: String,
        /// Checksum recorded in the ledger.
        expected: String,
        /// Checksum of the script as it is on disk.
        actual: String,
    },

    /// A script inside the applied range has no ledger entry.
    #[error("No metadata found for migration: {name}")]
    MigrationMetadataNotFound {
        /// Name of the script with no matching entry.
        name: String,
    },

    /// A script failed to execute.
    #[error("Migration '{name}' failed: {source}")]
    Migration {
        /// Name of the failing script.
        name: String,
        /// Underlying cause.
        #[source]
        source: Box<MigrateError>,
    },

    /// Dropping a schema failed during Erase.
    #[error("Failed to drop schema '{schema}': {source}")]
    DropSchemaFailed {
        /// The schema that could not be dropped.
        schema: String,
        /// Underlying cause.
        #[source]
        source: Box<MigrateError>,
    },

    /// Emptying a schema failed during Erase.
    #[error("Failed to erase schema '{schema}': {source}")]
    EraseSchemaFailed {
        /// The schema that could not be emptied.
        schema: String,
        /// Underlying cause.
        #[source]
        source: Box<MigrateError>,
    },

    /// The dialect cannot perform the requested schema operation.
    #[error("The {dialect} dialect does not support {operation}")]
    UnsupportedOperation {
        /// Dialect name.
        dialect: &'static str,
        /// The operation that is unavailable.
        operation: &'static str,
    },

    /// A ledger row could not be decoded.
    #[error("Corrupt metadata entry: {0}")]
    CorruptMetadata(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading migration scripts).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Whether this error came out of the Validate algorithm.
    ///
    /// Migrate intercepts exactly these when `must_erase_on_validation_error`
    /// is set.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::IncorrectMigrationChecksum { .. } | Self::MigrationMetadataNotFound { .. }
        )
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
