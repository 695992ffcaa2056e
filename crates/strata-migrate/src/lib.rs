//! Version-ordered SQL schema migrations with a tamper-evident ledger.
//!
//! `strata-migrate` brings a database to a declared target version by
//! applying versioned SQL scripts in order, recording every application in a
//! metadata table inside the database itself, and refusing to proceed when
//! the on-disk history diverges from the recorded history.
//!
//! # Architecture
//!
//! - **Scripts** - SQL files named `V<version>__<description>.sql`, hashed
//!   after placeholder substitution
//! - **Loader** - Discovers scripts under the configured locations and
//!   orders them by version
//! - **Ledger** - The metadata table recording applications, failures,
//!   schema-lifecycle markers and baselines
//! - **Dialect** - Per-DBMS helper bound to one connection (SQLite bundled)
//! - **Engine** - The Migrate / Validate / Repair / Erase commands
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_migrate::prelude::*;
//!
//! let config = MigrationConfig::new()
//!     .connect("sqlite", "sqlite:app.db?mode=rwc")
//!     .locations(vec!["migrations".into()])
//!     .placeholder("schema", "main");
//!
//! let mut engine = MigrationEngine::connect(config).await?;
//! let report = engine.migrate().await?;
//! println!("{} migration(s) applied", report.applied_count);
//! ```
//!
//! Migrate applies each outstanding script in its own transaction and
//! commits the ledger write with it; a failing script rolls back cleanly and
//! leaves a `success = false` row behind for forensics. Validate fails fast
//! when an already-applied script was edited on disk; Repair rewrites the
//! recorded checksums instead. Erase only ever destroys schemas the engine
//! itself created or first observed empty.

pub mod config;
pub mod connection;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod history;
pub mod loader;
pub mod script;
pub mod version;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{MigrationCommand, MigrationConfig};
    pub use crate::dialect::{DatabaseHelper, DbmsKind, SqliteHelper};
    pub use crate::engine::{MigrateReport, MigrationEngine, ValidateMode};
    pub use crate::error::{MigrateError, Result};
    pub use crate::history::{AppliedMigration, MetadataKind, MigrationHistory};
    pub use crate::loader::MigrationLoader;
    pub use crate::script::MigrationScript;
    pub use crate::version::MigrationVersion;
}
