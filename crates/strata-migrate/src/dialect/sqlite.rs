//! SQLite dialect helper.
//!
//! SQLite schemas are attached databases: `main` always exists and cannot be
//! created or dropped, so on SQLite the engine only ever takes the
//! empty-schema path. Emptiness and erasure are driven off `sqlite_master`.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tokio::sync::Mutex;
use tracing::debug;

use super::{DatabaseHelper, DbmsKind};
use crate::error::{MigrateError, Result};
use crate::history::{AppliedMigration, MetadataKind, NewMetadataEntry};
use crate::version::MigrationVersion;

/// Helper bound to one open SQLite connection.
pub struct SqliteHelper {
    conn: Mutex<SqliteConnection>,
}

impl SqliteHelper {
    /// Wraps an open connection.
    #[must_use]
    pub fn new(conn: SqliteConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn qualified(&self, schema: &str, table: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(schema),
            self.quote_identifier(table)
        )
    }

    /// Objects in `schema`, as `(type, name)` pairs from `sqlite_master`.
    async fn objects(&self, schema: &str) -> Result<Vec<(String, String)>> {
        let sql = format!(
            "SELECT type, name FROM {}.sqlite_master WHERE name NOT LIKE 'sqlite_%'",
            self.quote_identifier(schema)
        );
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>(0), row.get::<String, _>(1)))
            .collect())
    }
}

impl DatabaseHelper for SqliteHelper {
    fn kind(&self) -> DbmsKind {
        DbmsKind::Sqlite
    }

    async fn validate_connection(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::query("SELECT 1")
            .fetch_one(&mut *conn)
            .await
            .map_err(MigrateError::Connection)?;
        Ok(())
    }

    async fn current_schema(&self) -> Result<String> {
        Ok("main".to_string())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query("PRAGMA database_list")
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .iter()
            .any(|row| row.get::<String, _>("name").eq_ignore_ascii_case(schema)))
    }

    async fn schema_is_empty(&self, schema: &str) -> Result<bool> {
        Ok(self.objects(schema).await?.is_empty())
    }

    async fn create_schema(&self, _schema: &str) -> Result<()> {
        Err(MigrateError::UnsupportedOperation {
            dialect: "sqlite",
            operation: "CREATE SCHEMA",
        })
    }

    async fn drop_schema(&self, _schema: &str) -> Result<()> {
        Err(MigrateError::UnsupportedOperation {
            dialect: "sqlite",
            operation: "DROP SCHEMA",
        })
    }

    async fn erase_schema(&self, schema: &str) -> Result<()> {
        let objects = self.objects(schema).await?;

        // Triggers and views first; indexes attached to a dropped table
        // disappear with it, hence IF EXISTS on the remainder.
        for kind in ["trigger", "view", "table", "index"] {
            for (_, name) in objects.iter().filter(|(t, _)| t == kind) {
                let sql = format!(
                    "DROP {} IF EXISTS {}",
                    kind.to_ascii_uppercase(),
                    self.qualified(schema, name)
                );
                debug!(sql = %sql, "Erasing schema object");
                let mut conn = self.conn.lock().await;
                sqlx::raw_sql(&sql).execute(&mut *conn).await?;
            }
        }
        Ok(())
    }

    async fn begin(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::raw_sql("BEGIN").execute(&mut *conn).await?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::raw_sql("COMMIT").execute(&mut *conn).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        sqlx::raw_sql("ROLLBACK").execute(&mut *conn).await?;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        let result = sqlx::raw_sql(sql).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn metadata_table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?",
            self.quote_identifier(schema)
        );
        let mut conn = self.conn.lock().await;
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(table)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count > 0)
    }

    async fn create_metadata_table(&self, schema: &str, table: &str) -> Result<()> {
        let sql = format!(
            r#"
CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type INTEGER NOT NULL,
    version TEXT,
    description TEXT NOT NULL,
    name TEXT NOT NULL,
    checksum TEXT,
    installed_on TEXT NOT NULL,
    installed_by TEXT NOT NULL,
    success INTEGER NOT NULL
)
"#,
            self.qualified(schema, table)
        );
        let mut conn = self.conn.lock().await;
        sqlx::raw_sql(&sql).execute(&mut *conn).await?;
        Ok(())
    }

    async fn insert_metadata_entry(
        &self,
        schema: &str,
        table: &str,
        entry: &NewMetadataEntry<'_>,
    ) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} (type, version, description, name, checksum, installed_on, installed_by, success) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.qualified(schema, table)
        );
        let mut conn = self.conn.lock().await;
        let result = sqlx::query(&sql)
            .bind(entry.kind.code())
            .bind(entry.version.map(ToString::to_string))
            .bind(entry.description)
            .bind(entry.name)
            .bind(entry.checksum)
            .bind(entry.installed_on.to_rfc3339())
            .bind(entry.installed_by)
            .bind(entry.success)
            .execute(&mut *conn)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn load_metadata_entries(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<AppliedMigration>> {
        let sql = format!(
            "SELECT id, type, version, description, name, checksum, installed_on, installed_by, success \
             FROM {} ORDER BY id",
            self.qualified(schema, table)
        );
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get(0);
            let code: i64 = row.get(1);
            let kind = MetadataKind::from_code(code as i32).ok_or_else(|| {
                MigrateError::CorruptMetadata(format!("unknown entry type {code} in row {id}"))
            })?;
            let version = row
                .get::<Option<String>, _>(2)
                .map(|text| {
                    MigrationVersion::parse(&text).map_err(|_| {
                        MigrateError::CorruptMetadata(format!(
                            "unparseable version '{text}' in row {id}"
                        ))
                    })
                })
                .transpose()?;
            entries.push(AppliedMigration {
                id,
                kind,
                version,
                description: row.get(3),
                name: row.get(4),
                checksum: row.get(5),
                installed_on: parse_timestamp(&row.get::<String, _>(6)),
                installed_by: row.get(7),
                success: row.get(8),
            });
        }
        Ok(entries)
    }

    async fn update_metadata_checksum(
        &self,
        schema: &str,
        table: &str,
        id: i64,
        checksum: &str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET checksum = ? WHERE id = ?",
            self.qualified(schema, table)
        );
        let mut conn = self.conn.lock().await;
        sqlx::query(&sql)
            .bind(checksum)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Parses the stored timestamp, falling back to SQLite's `datetime('now')`
/// format for rows written outside the engine.
fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}
