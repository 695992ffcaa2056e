//! The migration engine.
//!
//! Hosts the four commands (Migrate, Validate, Repair, Erase) and owns
//! their ordering and transactional discipline. Every command starts from
//! the same Initialize step: reset counters, validate the connection, and
//! resolve the managed schemas and metadata location.

use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::config::{MigrationCommand, MigrationConfig};
use crate::connection;
use crate::dialect::{DatabaseHelper, SqliteHelper};
use crate::error::{MigrateError, Result};
use crate::history::{AppliedMigration, MetadataKind, MigrationHistory};
use crate::loader::MigrationLoader;
use crate::script::MigrationScript;
use crate::version::MigrationVersion;

/// How Validate reacts to a checksum mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateMode {
    /// A mismatch is fatal.
    Strict,
    /// A mismatch is fixed in place by rewriting the ledger checksum.
    Repair,
}

/// Outcome of a Migrate command.
#[derive(Debug, Clone)]
pub struct MigrateReport {
    /// Number of scripts applied by this run.
    pub applied_count: usize,
    /// Version of the last script applied by this run, if any.
    pub final_version: Option<MigrationVersion>,
}

/// Schemas and metadata location resolved during Initialize.
#[derive(Debug)]
struct CommandContext {
    schemas: Vec<String>,
    metadata_schema: String,
}

impl CommandContext {
    /// Union of the managed schemas and the metadata schema: blanks dropped,
    /// case-insensitive ASCII dedup, first-appearance order.
    fn schemas_to_consider(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in self.schemas.iter().chain([&self.metadata_schema]) {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if !out.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                out.push(name.to_string());
            }
        }
        out
    }
}

enum EraseAction {
    Drop,
    Erase,
}

/// Coordinates the ledger, the on-disk scripts and the dialect helper.
pub struct MigrationEngine<D: DatabaseHelper> {
    config: MigrationConfig,
    helper: D,
    nb_migration: usize,
    nb_repair: usize,
}

impl MigrationEngine<SqliteHelper> {
    /// Opens a connection per the configuration and builds an engine for it.
    pub async fn connect(config: MigrationConfig) -> Result<Self> {
        let conn = connection::open(&config.driver, &config.connection_string).await?;
        Ok(Self::new(config, SqliteHelper::new(conn)))
    }

    /// Adopts a caller-supplied open connection.
    pub async fn with_connection(config: MigrationConfig, conn: SqliteConnection) -> Result<Self> {
        let conn = connection::validate(conn).await?;
        Ok(Self::new(config, SqliteHelper::new(conn)))
    }
}

impl<D: DatabaseHelper> MigrationEngine<D> {
    /// Builds an engine over an already-constructed dialect helper.
    pub fn new(config: MigrationConfig, helper: D) -> Self {
        Self {
            config,
            helper,
            nb_migration: 0,
            nb_repair: 0,
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The dialect helper bound to the engine's connection.
    #[must_use]
    pub fn helper(&self) -> &D {
        &self.helper
    }

    /// Scripts applied by the last command.
    #[must_use]
    pub fn nb_migration(&self) -> usize {
        self.nb_migration
    }

    /// Checksums repaired by the last command.
    #[must_use]
    pub fn nb_repair(&self) -> usize {
        self.nb_repair
    }

    /// Executes the configured command.
    pub async fn run(&mut self) -> Result<()> {
        match self.config.command {
            MigrationCommand::Migrate => self.migrate().await.map(|_| ()),
            MigrationCommand::Repair => self.repair().await.map(|_| ()),
            MigrationCommand::Erase => self.erase().await,
        }
    }

    /// Applies outstanding scripts in version order, up to the configured
    /// target version.
    pub async fn migrate(&mut self) -> Result<MigrateReport> {
        let ctx = self.initialize().await?;

        if let Err(err) = self.validate_inner(&ctx, ValidateMode::Strict).await {
            if err.is_validation_error() && self.config.must_erase_on_validation_error {
                warn!(error = %err, "Validation failed; erasing managed schemas and migrating from scratch");
                self.erase_guarded(&ctx).await?;
            } else {
                return Err(err);
            }
        }

        self.manage_schemas(&ctx).await?;

        let history = MigrationHistory::new(
            &self.helper,
            &ctx.metadata_schema,
            &self.config.metadata_table_name,
        );
        history.ensure().await?;
        let applied = history.list_applied().await?;
        let last_applied = applied
            .last()
            .and_then(|entry| entry.version.clone())
            .unwrap_or(MigrationVersion::Zero);

        let scripts = MigrationLoader::new(&self.config).load()?;
        let plan: Vec<&MigrationScript> = scripts
            .iter()
            .skip_while(|s| s.version() <= &last_applied)
            .take_while(|s| s.version() <= &self.config.target_version)
            .collect();
        debug!(outstanding = plan.len(), "Computed migration plan");

        let mut final_version = None;
        for script in plan {
            apply_script(&self.helper, &history, &self.config, script).await?;
            self.nb_migration += 1;
            final_version = Some(script.version().clone());
        }

        match &final_version {
            None => info!("Nothing to migrate; database is up to date"),
            Some(version) => info!(
                "Database migrated to version {}. {} migration(s) applied.",
                version, self.nb_migration
            ),
        }

        Ok(MigrateReport {
            applied_count: self.nb_migration,
            final_version,
        })
    }

    /// Checks the applied range of the ledger against the scripts on disk.
    pub async fn validate(&mut self) -> Result<()> {
        let ctx = self.initialize().await?;
        self.validate_inner(&ctx, ValidateMode::Strict).await
    }

    /// Realigns ledger checksums with the scripts on disk.
    pub async fn repair(&mut self) -> Result<usize> {
        let ctx = self.initialize().await?;
        self.validate_inner(&ctx, ValidateMode::Repair).await?;
        if self.nb_repair == 0 {
            info!("Nothing to repair; every checksum matches");
        } else {
            info!("Successfully repaired {} migration(s).", self.nb_repair);
        }
        Ok(self.nb_repair)
    }

    /// Drops every schema the engine created and empties every schema the
    /// engine first observed empty. All other schemas are untouched.
    pub async fn erase(&mut self) -> Result<()> {
        if self.config.is_erase_disabled {
            warn!("Erase is disabled by configuration; nothing happens");
            return Ok(());
        }
        let ctx = self.initialize().await?;
        self.erase_inner(&ctx).await
    }

    /// The ledger, in id order.
    pub async fn info(&mut self) -> Result<Vec<AppliedMigration>> {
        let ctx = self.initialize().await?;
        let history = MigrationHistory::new(
            &self.helper,
            &ctx.metadata_schema,
            &self.config.metadata_table_name,
        );
        history.list_all().await
    }

    /// Common precondition of every command.
    async fn initialize(&mut self) -> Result<CommandContext> {
        self.nb_migration = 0;
        self.nb_repair = 0;

        self.helper.validate_connection().await?;
        debug!(dialect = self.helper.kind().name(), "Database classified");

        let mut schemas: Vec<String> = self
            .config
            .schemas
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if schemas.is_empty() {
            schemas.push(self.helper.current_schema().await?);
        }

        let metadata_schema = self
            .config
            .metadata_table_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| schemas[0].clone());

        Ok(CommandContext {
            schemas,
            metadata_schema,
        })
    }

    async fn validate_inner(&mut self, ctx: &CommandContext, mode: ValidateMode) -> Result<()> {
        let history = MigrationHistory::new(
            &self.helper,
            &ctx.metadata_schema,
            &self.config.metadata_table_name,
        );
        if !history.exists().await? {
            info!("No metadata found; nothing to validate");
            return Ok(());
        }

        let applied = history.list_applied().await?;
        let Some(last) = applied.last() else {
            debug!("No applied migrations; nothing to validate");
            return Ok(());
        };
        let last_version = last.version.clone().ok_or_else(|| {
            MigrateError::CorruptMetadata(format!("migration row {} has no version", last.id))
        })?;
        let start = history.find_start_version().await?;

        let scripts = MigrationLoader::new(&self.config).load()?;
        let mut repaired = 0usize;
        for script in scripts
            .iter()
            .filter(|s| s.version() >= &start && s.version() <= &last_version)
        {
            let Some(entry) = applied
                .iter()
                .find(|a| a.version.as_ref() == Some(script.version()))
            else {
                return Err(MigrateError::MigrationMetadataNotFound {
                    name: script.name().to_string(),
                });
            };

            let actual = script.checksum(&self.config)?;
            let recorded = entry.checksum.clone().unwrap_or_default();
            if recorded != actual {
                match mode {
                    ValidateMode::Repair => {
                        history.update_checksum(entry.id, &actual).await?;
                        repaired += 1;
                        info!(name = script.name(), "Repaired migration checksum");
                    }
                    ValidateMode::Strict => {
                        return Err(MigrateError::IncorrectMigrationChecksum {
                            name: script.name().to_string(),
                            expected: recorded,
                            actual,
                        });
                    }
                }
            }
        }

        self.nb_repair += repaired;
        Ok(())
    }

    /// Creates missing schemas and records the consent markers Erase relies
    /// on.
    async fn manage_schemas(&self, ctx: &CommandContext) -> Result<()> {
        let history = MigrationHistory::new(
            &self.helper,
            &ctx.metadata_schema,
            &self.config.metadata_table_name,
        );

        for schema in ctx.schemas_to_consider() {
            if !self.helper.schema_exists(&schema).await? {
                info!(schema = %schema, "Creating schema");
                self.helper.begin().await?;
                let attempt: Result<()> = async {
                    self.helper.create_schema(&schema).await?;
                    history
                        .save_schema_marker(MetadataKind::NewSchema, &schema)
                        .await?;
                    Ok(())
                }
                .await;
                match attempt {
                    Ok(()) => self.helper.commit().await?,
                    Err(err) => {
                        if let Err(rollback_err) = self.helper.rollback().await {
                            warn!(error = %rollback_err, "Rollback failed after schema creation error");
                        }
                        return Err(err);
                    }
                }
            } else if self.helper.schema_is_empty(&schema).await? {
                debug!(schema = %schema, "Schema is empty; recording empty-schema marker");
                history
                    .save_schema_marker(MetadataKind::EmptySchema, &schema)
                    .await?;
            }
        }
        Ok(())
    }

    /// Erase honoring the safety switch, used on the Migrate intercept path.
    async fn erase_guarded(&self, ctx: &CommandContext) -> Result<()> {
        if self.config.is_erase_disabled {
            warn!("Erase is disabled by configuration; nothing happens");
            return Ok(());
        }
        self.erase_inner(ctx).await
    }

    async fn erase_inner(&self, ctx: &CommandContext) -> Result<()> {
        let history = MigrationHistory::new(
            &self.helper,
            &ctx.metadata_schema,
            &self.config.metadata_table_name,
        );

        // The ledger may live inside one of the schemas about to go away, so
        // every consent flag is read before the first destructive action.
        let mut plan: Vec<(String, Option<EraseAction>)> = Vec::new();
        for schema in ctx.schemas_to_consider() {
            let action = if history.can_drop_schema(&schema).await? {
                Some(EraseAction::Drop)
            } else if history.can_erase_schema(&schema).await? {
                Some(EraseAction::Erase)
            } else {
                None
            };
            plan.push((schema, action));
        }

        self.helper.begin().await?;
        let attempt: Result<()> = async {
            for (schema, action) in &plan {
                match action {
                    Some(EraseAction::Drop) => {
                        info!(schema = %schema, "Dropping schema");
                        self.helper.drop_schema(schema).await.map_err(|err| {
                            MigrateError::DropSchemaFailed {
                                schema: schema.clone(),
                                source: Box::new(err),
                            }
                        })?;
                    }
                    Some(EraseAction::Erase) => {
                        info!(schema = %schema, "Erasing schema objects");
                        self.helper.erase_schema(schema).await.map_err(|err| {
                            MigrateError::EraseSchemaFailed {
                                schema: schema.clone(),
                                source: Box::new(err),
                            }
                        })?;
                    }
                    None => {
                        debug!(schema = %schema, "No erase mandate for schema; skipping");
                    }
                }
            }
            Ok(())
        }
        .await;

        match attempt {
            Ok(()) => self.helper.commit().await,
            Err(err) => {
                if let Err(rollback_err) = self.helper.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after erase error");
                }
                Err(err)
            }
        }
    }
}

/// Applies one script in its own transaction.
///
/// The batch execution and the `success=true` ledger insert share the
/// transaction; on failure the transaction is rolled back and the
/// `success=false` record is written as its own committed statement so the
/// forensic history survives.
async fn apply_script<D: DatabaseHelper>(
    helper: &D,
    history: &MigrationHistory<'_, D>,
    config: &MigrationConfig,
    script: &MigrationScript,
) -> Result<()> {
    let body = script.resolved_body(config)?;
    let checksum = script.checksum(config)?;

    info!(version = %script.version(), name = script.name(), "Applying migration");
    helper.begin().await?;
    let attempt: Result<()> = async {
        helper.execute(&body).await?;
        history
            .save(
                MetadataKind::Migration,
                Some(script.version()),
                script.description(),
                script.name(),
                Some(&checksum),
                true,
            )
            .await?;
        helper.commit().await?;
        Ok(())
    }
    .await;

    if let Err(cause) = attempt {
        if let Err(rollback_err) = helper.rollback().await {
            warn!(error = %rollback_err, "Rollback failed after migration error");
        }
        if let Err(record_err) = history
            .save(
                MetadataKind::Migration,
                Some(script.version()),
                script.description(),
                script.name(),
                Some(&checksum),
                false,
            )
            .await
        {
            warn!(error = %record_err, "Failed to record the migration failure");
        }
        return Err(MigrateError::Migration {
            name: script.name().to_string(),
            source: Box::new(cause),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use sqlx::{Connection, SqliteConnection};
    use tempfile::TempDir;

    use super::*;

    fn v(text: &str) -> MigrationVersion {
        MigrationVersion::parse(text).unwrap()
    }

    fn write(dir: &TempDir, name: &str, body: &str) {
        fs::write(dir.path().join(name), body).unwrap();
    }

    async fn engine_with(dir: &TempDir, config: MigrationConfig) -> MigrationEngine<SqliteHelper> {
        let config = config
            .connect("sqlite", "sqlite::memory:")
            .locations(vec![dir.path().to_path_buf()]);
        MigrationEngine::connect(config).await.unwrap()
    }

    async fn engine_for(dir: &TempDir) -> MigrationEngine<SqliteHelper> {
        engine_with(dir, MigrationConfig::default()).await
    }

    async fn ledger(engine: &MigrationEngine<SqliteHelper>) -> Vec<AppliedMigration> {
        MigrationHistory::new(engine.helper(), "main", "changelog")
            .list_all()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_applies_all_scripts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");
        write(&dir, "V2__add_users.sql", "INSERT INTO users (id) VALUES (1);");

        let mut engine = engine_for(&dir).await;
        let report = engine.migrate().await.unwrap();

        assert_eq!(report.applied_count, 2);
        assert_eq!(report.final_version, Some(v("2")));
        assert_eq!(engine.nb_migration(), 2);

        let entries = ledger(&engine).await;
        assert_eq!(entries[0].kind, MetadataKind::EmptySchema);
        assert_eq!(entries[0].name, "main");
        let applied: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == MetadataKind::Migration)
            .collect();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|e| e.success));
        assert_eq!(applied[0].version, Some(v("1")));
        assert_eq!(applied[1].version, Some(v("2")));

        assert!(
            engine
                .helper()
                .metadata_table_exists("main", "users")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");
        write(&dir, "V2__more.sql", "CREATE TABLE posts (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();
        let before = ledger(&engine).await.len();

        let report = engine.migrate().await.unwrap();
        assert_eq!(report.applied_count, 0);
        assert!(report.final_version.is_none());
        assert_eq!(engine.nb_migration(), 0);
        assert_eq!(ledger(&engine).await.len(), before);
    }

    #[tokio::test]
    async fn test_target_version_caps_the_plan() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__a.sql", "CREATE TABLE a (id INTEGER);");
        write(&dir, "V2__b.sql", "CREATE TABLE b (id INTEGER);");
        write(&dir, "V3__c.sql", "CREATE TABLE c (id INTEGER);");

        let config = MigrationConfig::default().target_version(v("2"));
        let mut engine = engine_with(&dir, config).await;
        let report = engine.migrate().await.unwrap();

        assert_eq!(report.applied_count, 2);
        assert_eq!(report.final_version, Some(v("2")));
        assert!(!engine.helper().metadata_table_exists("main", "c").await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_script_fails_then_repair_fixes_it() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");
        write(&dir, "V2__more.sql", "CREATE TABLE posts (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();

        // Edit an already-applied script.
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER, name TEXT);");

        let err = engine.migrate().await.unwrap_err();
        match err {
            MigrateError::IncorrectMigrationChecksum { name, .. } => {
                assert_eq!(name, "V1__init.sql");
            }
            other => panic!("unexpected error: {other}"),
        }

        let repaired = engine.repair().await.unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(engine.nb_repair(), 1);

        // The ledger now matches the edited script.
        engine.validate().await.unwrap();
        let report = engine.migrate().await.unwrap();
        assert_eq!(report.applied_count, 0);
    }

    #[tokio::test]
    async fn test_repair_only_rewrites_checksums() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();
        let before = ledger(&engine).await;

        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER, name TEXT);");
        engine.repair().await.unwrap();

        let after = ledger(&engine).await;
        assert_eq!(before.len(), after.len());
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.id, new.id);
            assert_eq!(old.kind, new.kind);
            assert_eq!(old.version, new.version);
            assert_eq!(old.name, new.name);
            assert_eq!(old.success, new.success);
        }
        let row = after
            .iter()
            .find(|e| e.kind == MetadataKind::Migration)
            .unwrap();
        assert_ne!(
            row.checksum,
            before
                .iter()
                .find(|e| e.kind == MetadataKind::Migration)
                .unwrap()
                .checksum
        );
    }

    #[tokio::test]
    async fn test_repair_with_clean_ledger_repairs_nothing() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();
        assert_eq!(engine.repair().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_ledger_row_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__a.sql", "CREATE TABLE a (id INTEGER);");
        write(&dir, "V2__b.sql", "CREATE TABLE b (id INTEGER);");
        write(&dir, "V3__c.sql", "CREATE TABLE c (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();

        engine
            .helper()
            .execute("DELETE FROM \"main\".\"changelog\" WHERE version = '2'")
            .await
            .unwrap();

        let err = engine.migrate().await.unwrap_err();
        match err {
            MigrateError::MigrationMetadataNotFound { name } => assert_eq!(name, "V2__b.sql"),
            other => panic!("unexpected error: {other}"),
        }

        // Repair does not resurrect deleted rows either.
        let err = engine.repair().await.unwrap_err();
        assert!(matches!(err, MigrateError::MigrationMetadataNotFound { .. }));
    }

    #[tokio::test]
    async fn test_erase_on_validation_error_migrates_from_scratch() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");
        write(&dir, "V2__more.sql", "CREATE TABLE posts (id INTEGER);");

        let config = MigrationConfig::default().erase_on_validation_error(true);
        let mut engine = engine_with(&dir, config).await;
        engine.migrate().await.unwrap();

        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER, name TEXT);");

        let report = engine.migrate().await.unwrap();
        assert_eq!(report.applied_count, 2);

        let entries = ledger(&engine).await;
        let applied: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == MetadataKind::Migration)
            .collect();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|e| e.success));

        // The rebuilt ledger carries the current checksums.
        engine.validate().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_script_rolls_back_and_records_failure() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");
        write(
            &dir,
            "V2__broken.sql",
            "CREATE TABLE t (id INTEGER);\nINSERT INTO missing VALUES (1);",
        );

        let mut engine = engine_for(&dir).await;
        let err = engine.migrate().await.unwrap_err();
        match &err {
            MigrateError::Migration { name, .. } => assert_eq!(name, "V2__broken.sql"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.nb_migration(), 1);

        // Nothing from the failing script survived the rollback.
        assert!(!engine.helper().metadata_table_exists("main", "t").await.unwrap());
        // The earlier script stayed applied.
        assert!(engine.helper().metadata_table_exists("main", "users").await.unwrap());

        let entries = ledger(&engine).await;
        let failure = entries
            .iter()
            .find(|e| e.name == "V2__broken.sql")
            .expect("failure record");
        assert!(!failure.success);
        assert!(failure.checksum.is_some());
        // The failure record does not advance the applied set.
        let history = MigrationHistory::new(engine.helper(), "main", "changelog");
        let applied = history.list_applied().await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].version, Some(v("1")));
    }

    #[tokio::test]
    async fn test_erase_empties_consented_schema() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();
        assert!(!engine.helper().schema_is_empty("main").await.unwrap());

        engine.erase().await.unwrap();
        assert!(engine.helper().schema_is_empty("main").await.unwrap());
    }

    #[tokio::test]
    async fn test_erase_skips_schemas_without_mandate() {
        // The schema already holds objects before the engine ever runs, so
        // no consent marker is recorded and Erase must leave it alone.
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::raw_sql("CREATE TABLE keep (id INTEGER)")
            .execute(&mut conn)
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");
        let config = MigrationConfig::default().locations(vec![dir.path().to_path_buf()]);
        let mut engine = MigrationEngine::with_connection(config, conn).await.unwrap();

        engine.migrate().await.unwrap();
        engine.erase().await.unwrap();

        assert!(engine.helper().metadata_table_exists("main", "keep").await.unwrap());
        assert!(engine.helper().metadata_table_exists("main", "users").await.unwrap());
    }

    #[tokio::test]
    async fn test_erase_disabled_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");

        let config = MigrationConfig::default().disable_erase(true);
        let mut engine = engine_with(&dir, config).await;
        engine.migrate().await.unwrap();

        engine.erase().await.unwrap();
        assert!(engine.helper().metadata_table_exists("main", "users").await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_passes_on_fresh_database() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_for(&dir).await;
        engine.validate().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_version_exempts_older_scripts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__legacy.sql", "CREATE TABLE legacy (id INTEGER);");
        write(&dir, "V2__current.sql", "CREATE TABLE current_t (id INTEGER);");
        write(&dir, "V3__next.sql", "CREATE TABLE next_t (id INTEGER);");

        let mut engine = engine_for(&dir).await;

        // Out-of-band baseline at version 2, then only V2 and V3 recorded.
        let history = MigrationHistory::new(engine.helper(), "main", "changelog");
        history
            .save(MetadataKind::StartVersion, Some(&v("2")), "baseline", "baseline", None, true)
            .await
            .unwrap();
        let config = engine.config().clone();
        let scripts = MigrationLoader::new(&config).load().unwrap();
        for script in scripts.iter().skip(1) {
            let checksum = script.checksum(&config).unwrap();
            history
                .save(
                    MetadataKind::Migration,
                    Some(script.version()),
                    script.description(),
                    script.name(),
                    Some(&checksum),
                    true,
                )
                .await
                .unwrap();
        }

        // V1 has no ledger row, but it sits below the baseline.
        engine.validate().await.unwrap();

        let report = engine.migrate().await.unwrap();
        assert_eq!(report.applied_count, 0);
    }

    #[tokio::test]
    async fn test_counters_reset_between_commands() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();
        assert_eq!(engine.nb_migration(), 1);

        engine.repair().await.unwrap();
        assert_eq!(engine.nb_migration(), 0);
        assert_eq!(engine.nb_repair(), 0);
    }

    #[tokio::test]
    async fn test_run_dispatches_on_configured_command() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");

        let config = MigrationConfig::default().command(MigrationCommand::Migrate);
        let mut engine = engine_with(&dir, config).await;
        engine.run().await.unwrap();
        assert_eq!(engine.nb_migration(), 1);
    }

    #[tokio::test]
    async fn test_info_lists_the_ledger() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1__init.sql", "CREATE TABLE users (id INTEGER);");

        let mut engine = engine_for(&dir).await;
        engine.migrate().await.unwrap();

        let entries = engine.info().await.unwrap();
        assert!(entries.iter().any(|e| e.name == "V1__init.sql"));
    }

    #[test]
    fn test_schemas_to_consider_dedups_case_insensitively() {
        let ctx = CommandContext {
            schemas: vec![
                "App".to_string(),
                "app".to_string(),
                " ".to_string(),
                "reporting".to_string(),
            ],
            metadata_schema: "APP".to_string(),
        };
        assert_eq!(ctx.schemas_to_consider(), vec!["App", "reporting"]);
    }

    #[test]
    fn test_metadata_schema_joins_the_considered_set() {
        let ctx = CommandContext {
            schemas: vec!["app".to_string()],
            metadata_schema: "meta".to_string(),
        };
        assert_eq!(ctx.schemas_to_consider(), vec!["app", "meta"]);
    }

    mod fake {
        //! Engine tests against a scripted helper for the schema-ful paths
        //! SQLite cannot express (CREATE SCHEMA / DROP SCHEMA).

        use std::collections::BTreeMap;
        use std::sync::Mutex;

        use super::*;
        use crate::dialect::DbmsKind;
        use crate::history::NewMetadataEntry;

        #[derive(Default)]
        struct FakeState {
            /// schema name -> is_empty
            schemas: BTreeMap<String, bool>,
            ledger: Vec<AppliedMigration>,
            table_created: bool,
            next_id: i64,
            log: Vec<String>,
        }

        #[derive(Default)]
        struct FakeHelper {
            state: Mutex<FakeState>,
        }

        impl FakeHelper {
            fn with_schemas(schemas: &[(&str, bool)]) -> Self {
                let helper = Self::default();
                {
                    let mut state = helper.state.lock().unwrap();
                    for (name, empty) in schemas {
                        state.schemas.insert((*name).to_string(), *empty);
                    }
                    state.next_id = 1;
                }
                helper
            }

            fn log(&self) -> Vec<String> {
                self.state.lock().unwrap().log.clone()
            }

            fn schema_names(&self) -> Vec<String> {
                self.state.lock().unwrap().schemas.keys().cloned().collect()
            }
        }

        impl DatabaseHelper for FakeHelper {
            fn kind(&self) -> DbmsKind {
                DbmsKind::Postgres
            }

            async fn validate_connection(&self) -> Result<()> {
                Ok(())
            }

            async fn current_schema(&self) -> Result<String> {
                Ok("public".to_string())
            }

            async fn schema_exists(&self, schema: &str) -> Result<bool> {
                Ok(self.state.lock().unwrap().schemas.contains_key(schema))
            }

            async fn schema_is_empty(&self, schema: &str) -> Result<bool> {
                Ok(*self
                    .state
                    .lock()
                    .unwrap()
                    .schemas
                    .get(schema)
                    .unwrap_or(&false))
            }

            async fn create_schema(&self, schema: &str) -> Result<()> {
                let mut state = self.state.lock().unwrap();
                state.schemas.insert(schema.to_string(), true);
                state.log.push(format!("create {schema}"));
                Ok(())
            }

            async fn drop_schema(&self, schema: &str) -> Result<()> {
                let mut state = self.state.lock().unwrap();
                state.schemas.remove(schema);
                state.log.push(format!("drop {schema}"));
                Ok(())
            }

            async fn erase_schema(&self, schema: &str) -> Result<()> {
                let mut state = self.state.lock().unwrap();
                state.schemas.insert(schema.to_string(), true);
                state.log.push(format!("erase {schema}"));
                Ok(())
            }

            async fn begin(&self) -> Result<()> {
                self.state.lock().unwrap().log.push("begin".to_string());
                Ok(())
            }

            async fn commit(&self) -> Result<()> {
                self.state.lock().unwrap().log.push("commit".to_string());
                Ok(())
            }

            async fn rollback(&self) -> Result<()> {
                self.state.lock().unwrap().log.push("rollback".to_string());
                Ok(())
            }

            async fn execute(&self, sql: &str) -> Result<u64> {
                let mut state = self.state.lock().unwrap();
                state.log.push(format!("execute {sql}"));
                if let Some(schema) = state.schemas.get_mut("public") {
                    *schema = false;
                }
                Ok(0)
            }

            async fn metadata_table_exists(&self, _schema: &str, _table: &str) -> Result<bool> {
                Ok(self.state.lock().unwrap().table_created)
            }

            async fn create_metadata_table(&self, _schema: &str, _table: &str) -> Result<()> {
                self.state.lock().unwrap().table_created = true;
                Ok(())
            }

            async fn insert_metadata_entry(
                &self,
                _schema: &str,
                _table: &str,
                entry: &NewMetadataEntry<'_>,
            ) -> Result<i64> {
                let mut state = self.state.lock().unwrap();
                let id = state.next_id;
                state.next_id += 1;
                state.log.push(format!("insert {:?} {}", entry.kind, entry.name));
                state.ledger.push(AppliedMigration {
                    id,
                    kind: entry.kind,
                    version: entry.version.cloned(),
                    description: entry.description.to_string(),
                    name: entry.name.to_string(),
                    checksum: entry.checksum.map(str::to_string),
                    installed_on: entry.installed_on,
                    installed_by: entry.installed_by.to_string(),
                    success: entry.success,
                });
                Ok(id)
            }

            async fn load_metadata_entries(
                &self,
                _schema: &str,
                _table: &str,
            ) -> Result<Vec<AppliedMigration>> {
                let mut state = self.state.lock().unwrap();
                state.log.push("load".to_string());
                Ok(state.ledger.clone())
            }

            async fn update_metadata_checksum(
                &self,
                _schema: &str,
                _table: &str,
                id: i64,
                checksum: &str,
            ) -> Result<()> {
                let mut state = self.state.lock().unwrap();
                if let Some(row) = state.ledger.iter_mut().find(|row| row.id == id) {
                    row.checksum = Some(checksum.to_string());
                }
                Ok(())
            }
        }

        fn fake_config(dir: &TempDir, schemas: &[&str]) -> MigrationConfig {
            MigrationConfig::default()
                .schemas(schemas.iter().map(|s| (*s).to_string()).collect())
                .locations(vec![dir.path().to_path_buf()])
        }

        #[tokio::test]
        async fn test_missing_schema_is_created_with_consent_marker() {
            let dir = TempDir::new().unwrap();
            let helper = FakeHelper::with_schemas(&[("public", true)]);
            let mut engine =
                MigrationEngine::new(fake_config(&dir, &["app"]), helper);

            let report = engine.migrate().await.unwrap();
            assert_eq!(report.applied_count, 0);

            assert_eq!(engine.helper().schema_names(), vec!["app", "public"]);
            let log = engine.helper().log();
            let begin = log.iter().position(|l| l == "begin").unwrap();
            let create = log.iter().position(|l| l == "create app").unwrap();
            let marker = log
                .iter()
                .position(|l| l == "insert NewSchema app")
                .unwrap();
            let commit = log.iter().position(|l| l == "commit").unwrap();
            assert!(begin < create && create < marker && marker < commit);
        }

        #[tokio::test]
        async fn test_erase_drops_created_schema_only() {
            let dir = TempDir::new().unwrap();
            let helper = FakeHelper::with_schemas(&[("public", false)]);
            let mut engine =
                MigrationEngine::new(fake_config(&dir, &["app", "public"]), helper);

            engine.migrate().await.unwrap();
            assert_eq!(engine.helper().schema_names(), vec!["app", "public"]);

            engine.erase().await.unwrap();

            // "app" carried a NewSchema marker and was dropped; "public" was
            // neither created by the engine nor found empty, so it stays.
            assert_eq!(engine.helper().schema_names(), vec!["public"]);
            let log = engine.helper().log();
            assert!(log.contains(&"drop app".to_string()));
            assert!(!log.iter().any(|l| l.starts_with("erase ")));

            // Consent was read before anything was destroyed.
            let first_load = log.iter().position(|l| l == "load").unwrap();
            let drop = log.iter().position(|l| l == "drop app").unwrap();
            assert!(first_load < drop);
        }

        #[tokio::test]
        async fn test_empty_schema_is_erased_not_dropped() {
            let dir = TempDir::new().unwrap();
            let helper = FakeHelper::with_schemas(&[("public", true)]);
            let mut engine = MigrationEngine::new(fake_config(&dir, &[]), helper);

            engine.migrate().await.unwrap();
            engine.erase().await.unwrap();

            let log = engine.helper().log();
            assert!(log.contains(&"erase public".to_string()));
            assert!(!log.iter().any(|l| l.starts_with("drop ")));
            assert_eq!(engine.helper().schema_names(), vec!["public"]);
        }
    }
}
