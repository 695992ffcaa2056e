//! Database dialect helpers.
//!
//! A helper binds one open connection and exposes the per-DBMS surface the
//! engine consumes: schema lifecycle, transaction control, batch execution,
//! and the backing operations of the metadata table. The engine is generic
//! over the helper, so further dialects plug in without touching it.

mod sqlite;

pub use sqlite::SqliteHelper;

use crate::error::Result;
use crate::history::{AppliedMigration, NewMetadataEntry};

/// Kind of database a connection points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbmsKind {
    /// SQLite.
    Sqlite,
    /// PostgreSQL.
    Postgres,
    /// MySQL / MariaDB.
    Mysql,
}

impl DbmsKind {
    /// Classifies a driver name or a connection URL scheme.
    #[must_use]
    pub fn classify(driver_or_url: &str) -> Option<Self> {
        let name = driver_or_url
            .split_once(':')
            .map_or(driver_or_url, |(scheme, _)| scheme)
            .trim()
            .to_ascii_lowercase();
        match name.as_str() {
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::Mysql),
            _ => None,
        }
    }

    /// Human-readable dialect name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }
}

/// Per-DBMS operations consumed by the engine.
///
/// Transactions are controlled explicitly; the engine guarantees that
/// `begin` is never nested and that every `begin` reaches a `commit` or
/// `rollback` on all exit paths.
#[allow(async_fn_in_trait)]
pub trait DatabaseHelper {
    /// The DBMS this helper is bound to.
    fn kind(&self) -> DbmsKind;

    /// Round-trip check that the connection is alive.
    async fn validate_connection(&self) -> Result<()>;

    /// The schema the connection is currently attached to.
    async fn current_schema(&self) -> Result<String>;

    /// Whether the schema exists.
    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    /// Whether the schema holds no user objects.
    async fn schema_is_empty(&self, schema: &str) -> Result<bool>;

    /// Creates the schema.
    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Drops the schema and everything inside it.
    async fn drop_schema(&self, schema: &str) -> Result<()>;

    /// Drops every object inside the schema, keeping the schema itself.
    async fn erase_schema(&self, schema: &str) -> Result<()>;

    /// Opens a transaction.
    async fn begin(&self) -> Result<()>;

    /// Commits the open transaction.
    async fn commit(&self) -> Result<()>;

    /// Rolls back the open transaction.
    async fn rollback(&self) -> Result<()>;

    /// Executes a (possibly multi-statement) SQL batch, returning the number
    /// of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Whether the metadata table exists.
    async fn metadata_table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    /// Creates the metadata table if absent.
    async fn create_metadata_table(&self, schema: &str, table: &str) -> Result<()>;

    /// Appends one metadata row and returns its assigned id.
    async fn insert_metadata_entry(
        &self,
        schema: &str,
        table: &str,
        entry: &NewMetadataEntry<'_>,
    ) -> Result<i64>;

    /// Every metadata row, in id order.
    async fn load_metadata_entries(&self, schema: &str, table: &str)
    -> Result<Vec<AppliedMigration>>;

    /// Rewrites the checksum of one metadata row.
    async fn update_metadata_checksum(
        &self,
        schema: &str,
        table: &str,
        id: i64,
        checksum: &str,
    ) -> Result<()>;

    /// Quotes an identifier (schema, table, column).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name)
    }
}
