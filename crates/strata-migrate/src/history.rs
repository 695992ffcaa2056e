//! The migration ledger.
//!
//! Every engine action is recorded in a metadata table inside the target
//! database: script applications (including failed ones), schema-lifecycle
//! markers, and baseline entries. [`MigrationHistory`] is the typed API over
//! that table; the SQL behind it comes from the dialect helper.

use chrono::{DateTime, Utc};

use crate::dialect::DatabaseHelper;
use crate::error::Result;
use crate::version::MigrationVersion;

/// Kind of ledger entry, stored as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    /// A migration script application.
    Migration,
    /// The engine created this schema, so the engine may drop it.
    NewSchema,
    /// The engine found this schema empty, so the engine may empty it again.
    EmptySchema,
    /// Baseline marker: versions below it are considered already applied.
    StartVersion,
}

impl MetadataKind {
    /// The persisted discriminant.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Migration => 10,
            Self::NewSchema => 20,
            Self::EmptySchema => 30,
            Self::StartVersion => 40,
        }
    }

    /// Decodes a persisted discriminant.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            10 => Some(Self::Migration),
            20 => Some(Self::NewSchema),
            30 => Some(Self::EmptySchema),
            40 => Some(Self::StartVersion),
            _ => None,
        }
    }
}

/// One persisted ledger row.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    /// Ledger primary key; id order is insertion order.
    pub id: i64,
    /// Entry kind.
    pub kind: MetadataKind,
    /// Version, present for Migration and StartVersion entries.
    pub version: Option<MigrationVersion>,
    /// Script description, or the schema name for lifecycle markers.
    pub description: String,
    /// Script file name, or the schema name for lifecycle markers.
    pub name: String,
    /// Checksum, present for Migration entries.
    pub checksum: Option<String>,
    /// When the entry was written.
    pub installed_on: DateTime<Utc>,
    /// Identity of the caller.
    pub installed_by: String,
    /// Whether the recorded action succeeded.
    pub success: bool,
}

/// A ledger row about to be inserted.
#[derive(Debug)]
pub struct NewMetadataEntry<'a> {
    /// Entry kind.
    pub kind: MetadataKind,
    /// Version, for Migration and StartVersion entries.
    pub version: Option<&'a MigrationVersion>,
    /// Script description or schema name.
    pub description: &'a str,
    /// Script file name or schema name.
    pub name: &'a str,
    /// Checksum, for Migration entries.
    pub checksum: Option<&'a str>,
    /// Timestamp of the action.
    pub installed_on: DateTime<Utc>,
    /// Identity of the caller.
    pub installed_by: &'a str,
    /// Whether the recorded action succeeded.
    pub success: bool,
}

/// Typed ledger API bound to one schema and table.
pub struct MigrationHistory<'a, D: DatabaseHelper> {
    helper: &'a D,
    schema: String,
    table: String,
}

impl<'a, D: DatabaseHelper> MigrationHistory<'a, D> {
    /// Binds a ledger to `schema.table` on the given helper.
    pub fn new(helper: &'a D, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            helper,
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// The schema holding the ledger table.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The ledger table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the ledger table has been created yet.
    pub async fn exists(&self) -> Result<bool> {
        self.helper
            .metadata_table_exists(&self.schema, &self.table)
            .await
    }

    /// Creates the ledger table if absent. Idempotent.
    pub async fn ensure(&self) -> Result<()> {
        self.helper
            .create_metadata_table(&self.schema, &self.table)
            .await
    }

    /// Appends one entry and returns its assigned id.
    ///
    /// Creates the ledger table first if needed.
    pub async fn save(
        &self,
        kind: MetadataKind,
        version: Option<&MigrationVersion>,
        description: &str,
        name: &str,
        checksum: Option<&str>,
        success: bool,
    ) -> Result<i64> {
        self.ensure().await?;
        let installed_by = caller_identity();
        let entry = NewMetadataEntry {
            kind,
            version,
            description,
            name,
            checksum,
            installed_on: Utc::now(),
            installed_by: &installed_by,
            success,
        };
        self.helper
            .insert_metadata_entry(&self.schema, &self.table, &entry)
            .await
    }

    /// Appends a schema-lifecycle marker tagged with the schema name.
    pub async fn save_schema_marker(&self, kind: MetadataKind, schema_name: &str) -> Result<i64> {
        self.save(kind, None, schema_name, schema_name, None, true)
            .await
    }

    /// Every ledger entry, in id order. Empty if the table is absent.
    pub async fn list_all(&self) -> Result<Vec<AppliedMigration>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        self.helper
            .load_metadata_entries(&self.schema, &self.table)
            .await
    }

    /// Successfully applied migrations, in id order.
    pub async fn list_applied(&self) -> Result<Vec<AppliedMigration>> {
        let entries = self.list_all().await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == MetadataKind::Migration && e.success)
            .collect())
    }

    /// Version of the most recent StartVersion entry, else the zero
    /// sentinel.
    pub async fn find_start_version(&self) -> Result<MigrationVersion> {
        let entries = self.list_all().await?;
        Ok(entries
            .into_iter()
            .rev()
            .find(|e| e.kind == MetadataKind::StartVersion)
            .and_then(|e| e.version)
            .unwrap_or(MigrationVersion::Zero))
    }

    /// Rewrites the checksum of one existing row. Used only by Repair.
    pub async fn update_checksum(&self, id: i64, checksum: &str) -> Result<()> {
        self.helper
            .update_metadata_checksum(&self.schema, &self.table, id, checksum)
            .await
    }

    /// Whether the engine created `schema_name` and may therefore drop it.
    pub async fn can_drop_schema(&self, schema_name: &str) -> Result<bool> {
        self.has_marker(MetadataKind::NewSchema, schema_name).await
    }

    /// Whether the engine found `schema_name` empty and may therefore empty
    /// it again.
    pub async fn can_erase_schema(&self, schema_name: &str) -> Result<bool> {
        self.has_marker(MetadataKind::EmptySchema, schema_name).await
    }

    async fn has_marker(&self, kind: MetadataKind, schema_name: &str) -> Result<bool> {
        let entries = self.list_all().await?;
        Ok(entries
            .iter()
            .any(|e| e.kind == kind && e.name.eq_ignore_ascii_case(schema_name)))
    }
}

/// Identity recorded in `installed_by`.
fn caller_identity() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
