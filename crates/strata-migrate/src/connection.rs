//! Connection acquisition and validation.
//!
//! The engine either opens its own connection from `(driver,
//! connection_string)` or adopts one the caller already holds. Both paths
//! round-trip the connection before any command runs.

use sqlx::{Connection, SqliteConnection};
use tracing::debug;

use crate::dialect::DbmsKind;
use crate::error::{MigrateError, Result};

/// Opens and validates a SQLite connection from the configured driver and
/// connection string.
///
/// Classification comes from the driver name, falling back to the URL
/// scheme. Dialects without a bundled helper are rejected here.
pub async fn open(driver: &str, connection_string: &str) -> Result<SqliteConnection> {
    if connection_string.trim().is_empty() {
        return Err(MigrateError::Configuration(
            "connection_string is required when no connection is supplied".to_string(),
        ));
    }

    let kind = DbmsKind::classify(driver)
        .or_else(|| DbmsKind::classify(connection_string))
        .ok_or_else(|| {
            MigrateError::Configuration(format!("unrecognized database driver '{driver}'"))
        })?;
    if kind != DbmsKind::Sqlite {
        return Err(MigrateError::Configuration(format!(
            "no bundled dialect helper for {}",
            kind.name()
        )));
    }

    debug!(url = %connection_string, "Opening database connection");
    let conn = SqliteConnection::connect(connection_string)
        .await
        .map_err(MigrateError::Connection)?;
    validate(conn).await
}

/// Validates a caller-supplied connection with a round trip.
pub async fn validate(mut conn: SqliteConnection) -> Result<SqliteConnection> {
    sqlx::query("SELECT 1")
        .fetch_one(&mut conn)
        .await
        .map_err(MigrateError::Connection)?;
    Ok(conn)
}
