//! Migration runner.
//!
//! This module applies outstanding migration records to a live database.
//! A run holds one dedicated connection, serializes against other runs
//! through a dialect-specific lock owned by that connection, and records
//! every applied migration in the ledger inside the same transaction as its
//! DDL.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{AnyConnection, Connection};
use tracing::{debug, error, info, warn};

use crate::chain::MigrationChain;
use crate::dialect::{render_record, MigrationDialect, RenderedMigration, RunLock};
use crate::error::{MigrateError, Result};
use crate::history::{AppliedMigration, Ledger, DEFAULT_LEDGER_TABLE};
use crate::migration::{MigrationId, MigrationRecord};
use crate::state::SchemaState;

/// Opens the dedicated connection a run works on.
pub async fn connect(url: &str) -> Result<AnyConnection> {
    sqlx::any::install_default_drivers();
    Ok(AnyConnection::connect(url).await?)
}

/// How outstanding records are grouped into transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// One transaction per record.
    #[default]
    PerMigration,
    /// One transaction for the whole run.
    Single,
}

/// Lifecycle of a record during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Not applied yet.
    Pending,
    /// Statements are executing.
    Applying,
    /// Committed and recorded in the ledger.
    Applied,
    /// Execution failed and was rolled back.
    Failed,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Applying => write!(f, "applying"),
            Self::Applied => write!(f, "applied"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status of one record after (or during) a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    /// Record identifier.
    pub id: MigrationId,
    /// Current status.
    pub status: MigrationStatus,
}

/// A chain record together with its ledger entry, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    /// Record identifier.
    pub id: MigrationId,
    /// When the record was applied.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Options for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Name of the ledger table.
    pub ledger_table: String,
    /// Transaction grouping.
    pub transaction_mode: TransactionMode,
    /// Stop after this record.
    pub apply_until: Option<String>,
    /// Render the outstanding SQL without executing it.
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            transaction_mode: TransactionMode::default(),
            apply_until: None,
            dry_run: false,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Every record up to the target was already applied.
    UpToDate,
    /// These records were applied, in order.
    Applied(Vec<MigrationId>),
    /// Dry run: the statements that would execute.
    DryRun(Vec<RenderedMigration>),
}

impl RunReport {
    /// Returns whether the run had nothing to do.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Self::UpToDate)
    }
}

/// Applies migration records to a database.
pub struct MigrationRunner {
    dialect: Box<dyn MigrationDialect>,
    options: RunOptions,
    progress: Vec<MigrationProgress>,
}

impl MigrationRunner {
    /// Creates a runner with default options.
    #[must_use]
    pub fn new(dialect: Box<dyn MigrationDialect>) -> Self {
        Self {
            dialect,
            options: RunOptions::default(),
            progress: Vec::new(),
        }
    }

    /// Replaces the run options.
    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the run options.
    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn MigrationDialect {
        self.dialect.as_ref()
    }

    /// Per-record status of the last run.
    #[must_use]
    pub fn progress(&self) -> &[MigrationProgress] {
        &self.progress
    }

    /// Applies every outstanding record of `chain`.
    pub async fn run(
        &mut self,
        conn: &mut AnyConnection,
        chain: &MigrationChain,
    ) -> Result<RunReport> {
        self.progress = chain
            .records()
            .iter()
            .map(|record| MigrationProgress {
                id: record.id.clone(),
                status: MigrationStatus::Pending,
            })
            .collect();

        let mut run = Run {
            dialect: self.dialect.as_ref(),
            ledger: Ledger::new(self.dialect.as_ref(), &self.options.ledger_table),
            options: &self.options,
            progress: &mut self.progress,
            applied_now: Vec::new(),
        };

        if run.options.dry_run {
            return run.execute(conn, chain).await;
        }

        if !run.dialect.transactional_ddl() {
            warn!(
                dialect = run.dialect.name(),
                "DDL commits implicitly on this database; a failed migration may be partially applied"
            );
        }

        match run.dialect.run_lock(run.ledger.table()) {
            RunLock::Session { acquire, release } => {
                debug!(sql = %acquire, "Acquiring migration lock");
                sqlx::raw_sql(&acquire).execute(&mut *conn).await?;
                let outcome = run.execute(conn, chain).await;
                let released = sqlx::raw_sql(&release).execute(&mut *conn).await;
                debug!("Released migration lock");
                finish(outcome, released.map(|_| ()))
            }
            RunLock::Transaction { begin } => {
                debug!(sql = %begin, "Acquiring migration lock");
                let mut tx = conn.begin_with(begin).await.map_err(|e| match e {
                    sqlx::Error::Database(e) => MigrateError::LockHeld(format!(
                        "another run holds the database write lock ({})",
                        e.message()
                    )),
                    e => e.into(),
                })?;
                let outcome = run.execute(&mut tx, chain).await;
                let released = tx.commit().await;
                debug!("Released migration lock");
                if released.is_err() {
                    run.revert_applied();
                }
                finish(outcome, released)
            }
        }
    }

    /// Lists chain records with their ledger timestamps.
    pub async fn status(
        &self,
        conn: &mut AnyConnection,
        chain: &MigrationChain,
    ) -> Result<Vec<ChainEntry>> {
        let ledger = Ledger::new(self.dialect.as_ref(), &self.options.ledger_table);
        ledger.ensure_table(conn).await?;
        let applied = ledger.applied(conn).await?;

        for entry in &applied {
            if chain.position(&entry.id).is_none() {
                warn!(migration = %entry.id, "Applied migration is missing from the migration directory");
            }
        }

        Ok(chain
            .records()
            .iter()
            .map(|record| {
                let id = record.id.to_string();
                ChainEntry {
                    id: record.id.clone(),
                    applied_at: applied
                        .iter()
                        .find(|entry| entry.id == id)
                        .map(|entry| entry.applied_at),
                }
            })
            .collect())
    }
}

fn finish(
    outcome: Result<RunReport>,
    released: std::result::Result<(), sqlx::Error>,
) -> Result<RunReport> {
    match (outcome, released) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Err(release_error)) => {
            warn!(error = %release_error, "Releasing the migration lock failed");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

/// Fails unless the applied identifiers form a prefix of the chain.
fn verify_prefix(chain: &MigrationChain, applied: &[AppliedMigration]) -> Result<()> {
    for entry in applied {
        if chain.position(&entry.id).is_none() {
            return Err(MigrateError::ChainIntegrity(format!(
                "migration '{}' is applied but missing from the migration directory",
                entry.id
            )));
        }
    }

    let applied_ids: HashSet<&str> = applied.iter().map(|entry| entry.id.as_str()).collect();
    if let Some(gap) = chain
        .records()
        .iter()
        .take(applied.len())
        .find(|record| !applied_ids.contains(record.id.to_string().as_str()))
    {
        return Err(MigrateError::ChainIntegrity(format!(
            "migration '{}' is not applied but later migrations are",
            gap.id
        )));
    }
    Ok(())
}

struct Run<'a> {
    dialect: &'a dyn MigrationDialect,
    ledger: Ledger<'a>,
    options: &'a RunOptions,
    progress: &'a mut Vec<MigrationProgress>,
    applied_now: Vec<MigrationId>,
}

impl Run<'_> {
    fn mark(&mut self, id: &MigrationId, status: MigrationStatus) {
        if let Some(entry) = self.progress.iter_mut().find(|p| &p.id == id) {
            entry.status = status;
        }
    }

    /// Returns records committed by this run to `Pending` after the
    /// enclosing lock transaction failed to commit.
    fn revert_applied(&mut self) {
        for id in std::mem::take(&mut self.applied_now) {
            self.mark(&id, MigrationStatus::Pending);
        }
    }

    async fn execute(&mut self, conn: &mut AnyConnection, chain: &MigrationChain) -> Result<RunReport> {
        self.ledger.ensure_table(conn).await?;
        let applied = self.ledger.applied(conn).await?;
        verify_prefix(chain, &applied)?;

        let start = applied.len();
        let end = match &self.options.apply_until {
            Some(target) => {
                chain.position(target).ok_or_else(|| {
                    MigrateError::InvalidState(format!("Unknown migration '{target}'"))
                })? + 1
            }
            None => chain.len(),
        };

        let records = chain.records();
        let mut state = SchemaState::new();
        for record in &records[..start] {
            state.apply_record(record)?;
            self.mark(&record.id, MigrationStatus::Applied);
        }

        if end <= start {
            info!(applied = start, "No migrations to apply");
            return Ok(RunReport::UpToDate);
        }
        let pending = &records[start..end];

        if self.options.dry_run {
            let mut rendered = Vec::with_capacity(pending.len());
            for record in pending {
                rendered.push(RenderedMigration {
                    id: record.id.clone(),
                    statements: render_record(self.dialect, record, &mut state)?,
                });
            }
            return Ok(RunReport::DryRun(rendered));
        }

        info!(count = pending.len(), "Applying migrations");
        match self.options.transaction_mode {
            TransactionMode::PerMigration => self.apply_each(conn, pending, &mut state).await,
            TransactionMode::Single => self.apply_together(conn, pending, &mut state).await,
        }
    }

    async fn apply_each(
        &mut self,
        conn: &mut AnyConnection,
        pending: &[MigrationRecord],
        state: &mut SchemaState,
    ) -> Result<RunReport> {
        let mut done = Vec::with_capacity(pending.len());
        for record in pending {
            let statements = match render_record(self.dialect, record, state) {
                Ok(statements) => statements,
                Err(e) => {
                    self.mark(&record.id, MigrationStatus::Failed);
                    return Err(e);
                }
            };

            self.mark(&record.id, MigrationStatus::Applying);
            info!(migration = %record.id, "Applying migration");

            let mut tx = conn.begin().await?;
            let outcome = match self.apply_record(&mut tx, &record.id, &statements).await {
                Ok(()) => tx.commit().await.map_err(|source| MigrateError::Execution {
                    migration: record.id.to_string(),
                    statement: "COMMIT".to_string(),
                    source,
                }),
                Err(e) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        warn!(error = %rollback_error, "Rollback failed");
                    }
                    Err(e)
                }
            };

            if let Err(e) = outcome {
                self.mark(&record.id, MigrationStatus::Failed);
                error!(migration = %record.id, error = %e, "Migration failed");
                return Err(e);
            }

            self.mark(&record.id, MigrationStatus::Applied);
            info!(migration = %record.id, "Migration applied successfully");
            self.applied_now.push(record.id.clone());
            done.push(record.id.clone());
        }
        Ok(RunReport::Applied(done))
    }

    async fn apply_together(
        &mut self,
        conn: &mut AnyConnection,
        pending: &[MigrationRecord],
        state: &mut SchemaState,
    ) -> Result<RunReport> {
        let mut tx = conn.begin().await?;
        let mut done: Vec<MigrationId> = Vec::with_capacity(pending.len());

        let mut failure = None;
        for record in pending {
            self.mark(&record.id, MigrationStatus::Applying);
            info!(migration = %record.id, "Applying migration");

            let result = match render_record(self.dialect, record, state) {
                Ok(statements) => self.apply_record(&mut tx, &record.id, &statements).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => done.push(record.id.clone()),
                Err(e) => {
                    failure = Some((record.id.clone(), e));
                    break;
                }
            }
        }

        let failure = match failure {
            None => match tx.commit().await {
                Ok(()) => {
                    for id in &done {
                        self.mark(id, MigrationStatus::Applied);
                    }
                    self.applied_now.extend(done.iter().cloned());
                    info!(count = done.len(), "Migrations applied successfully");
                    return Ok(RunReport::Applied(done));
                }
                Err(source) => {
                    let last = done.pop();
                    let migration = last.as_ref().map(ToString::to_string).unwrap_or_default();
                    (
                        last,
                        MigrateError::Execution {
                            migration,
                            statement: "COMMIT".to_string(),
                            source,
                        },
                    )
                }
            },
            Some((id, e)) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                (Some(id), e)
            }
        };

        let (failed, e) = failure;
        for id in &done {
            self.mark(id, MigrationStatus::Pending);
        }
        if let Some(id) = failed {
            self.mark(&id, MigrationStatus::Failed);
            error!(migration = %id, error = %e, "Migration failed, run rolled back");
        }
        Err(e)
    }

    async fn apply_record(
        &self,
        conn: &mut AnyConnection,
        id: &MigrationId,
        statements: &[String],
    ) -> Result<()> {
        for sql in statements {
            debug!(migration = %id, sql = %sql, "Executing SQL");
            sqlx::raw_sql(sql)
                .execute(&mut *conn)
                .await
                .map_err(|source| MigrateError::Execution {
                    migration: id.to_string(),
                    statement: sql.clone(),
                    source,
                })?;
        }
        self.ledger
            .record(conn, id)
            .await
            .map_err(|source| MigrateError::Execution {
                migration: id.to_string(),
                statement: self.ledger.insert_sql(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_schema::{Field, FieldType, Index};

    use crate::dialect::SqliteDialect;
    use crate::operations::MigrationOperation;

    async fn memory_connection() -> AnyConnection {
        connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite database")
    }

    fn runner() -> MigrationRunner {
        MigrationRunner::new(Box::new(SqliteDialect::new()))
    }

    fn users_chain() -> MigrationChain {
        let initial = MigrationId::new(1, "initial").unwrap();
        let add_email = MigrationId::new(2, "add_email").unwrap();
        MigrationChain::from_records(vec![
            MigrationRecord::new(
                initial.clone(),
                None,
                "hash-1",
                vec![MigrationOperation::create_table(
                    "users",
                    vec![
                        Field::new("id", FieldType::Int64)
                            .primary_key()
                            .auto_increment(),
                        Field::new("username", FieldType::VarChar).max_length(255),
                    ],
                )],
            ),
            MigrationRecord::new(
                add_email,
                Some(initial),
                "hash-2",
                vec![
                    MigrationOperation::add_column(
                        "users",
                        Field::new("email", FieldType::VarChar)
                            .max_length(255)
                            .nullable(),
                    ),
                    MigrationOperation::add_index(
                        "users",
                        Index::new("users_email_idx", ["email"], true),
                    ),
                ],
            ),
        ])
        .unwrap()
    }

    async fn table_exists(conn: &mut AnyConnection, name: &str) -> bool {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name.to_string())
                .fetch_optional(&mut *conn)
                .await
                .unwrap();
        row.is_some()
    }

    #[tokio::test]
    async fn test_apply_chain() {
        let mut conn = memory_connection().await;
        let mut runner = runner();

        let report = runner.run(&mut conn, &users_chain()).await.unwrap();
        let RunReport::Applied(ids) = report else {
            panic!("Expected applied report");
        };
        assert_eq!(ids.len(), 2);
        assert!(table_exists(&mut conn, "users").await);
        assert!(runner
            .progress()
            .iter()
            .all(|p| p.status == MigrationStatus::Applied));
    }

    #[tokio::test]
    async fn test_second_run_is_up_to_date() {
        let mut conn = memory_connection().await;
        let mut runner = runner();
        let chain = users_chain();

        runner.run(&mut conn, &chain).await.unwrap();
        let report = runner.run(&mut conn, &chain).await.unwrap();
        assert!(report.is_up_to_date());
    }

    #[tokio::test]
    async fn test_apply_until() {
        let mut conn = memory_connection().await;
        let mut runner = runner().with_options(RunOptions {
            apply_until: Some("0001_initial".to_string()),
            ..RunOptions::default()
        });
        let chain = users_chain();

        let report = runner.run(&mut conn, &chain).await.unwrap();
        assert_eq!(
            report,
            RunReport::Applied(vec![MigrationId::new(1, "initial").unwrap()])
        );
        assert_eq!(runner.progress()[1].status, MigrationStatus::Pending);

        let mut runner = runner.with_options(RunOptions::default());
        let report = runner.run(&mut conn, &chain).await.unwrap();
        assert_eq!(
            report,
            RunReport::Applied(vec![MigrationId::new(2, "add_email").unwrap()])
        );
    }

    #[tokio::test]
    async fn test_apply_until_unknown() {
        let mut conn = memory_connection().await;
        let mut runner = runner().with_options(RunOptions {
            apply_until: Some("0009_missing".to_string()),
            ..RunOptions::default()
        });
        let err = runner.run(&mut conn, &users_chain()).await.unwrap_err();
        assert!(matches!(err, MigrateError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let mut conn = memory_connection().await;
        let mut runner = runner().with_options(RunOptions {
            dry_run: true,
            ..RunOptions::default()
        });

        let report = runner.run(&mut conn, &users_chain()).await.unwrap();
        let RunReport::DryRun(rendered) = report else {
            panic!("Expected dry-run report");
        };
        assert_eq!(rendered.len(), 2);
        assert!(rendered[0].statements[0].starts_with("CREATE TABLE \"users\""));
        assert!(!table_exists(&mut conn, "users").await);

        let ledger_dialect = SqliteDialect::new();
        let ledger = Ledger::new(&ledger_dialect, DEFAULT_LEDGER_TABLE);
        assert!(ledger.applied(&mut conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("lock.sqlite3").display()
        );
        let mut holder = connect(&url).await.unwrap();
        let held = holder.begin_with("BEGIN IMMEDIATE").await.unwrap();

        let mut conn = connect(&url).await.unwrap();
        let err = runner().run(&mut conn, &users_chain()).await.unwrap_err();
        assert!(matches!(err, MigrateError::LockHeld(_)));

        held.rollback().await.unwrap();
        assert!(!table_exists(&mut conn, "users").await);
    }

    #[tokio::test]
    async fn test_status() {
        let mut conn = memory_connection().await;
        let chain = users_chain();
        let mut runner = runner().with_options(RunOptions {
            apply_until: Some("0001_initial".to_string()),
            ..RunOptions::default()
        });
        runner.run(&mut conn, &chain).await.unwrap();

        let entries = runner.status(&mut conn, &chain).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].applied_at.is_some());
        assert!(entries[1].applied_at.is_none());
    }

    #[test]
    fn test_verify_prefix() {
        let chain = users_chain();
        let applied = |id: &str| AppliedMigration {
            id: id.to_string(),
            applied_at: Utc::now(),
        };

        assert!(verify_prefix(&chain, &[]).is_ok());
        assert!(verify_prefix(&chain, &[applied("0001_initial")]).is_ok());
        assert!(matches!(
            verify_prefix(&chain, &[applied("0002_add_email")]),
            Err(MigrateError::ChainIntegrity(_))
        ));
        assert!(matches!(
            verify_prefix(&chain, &[applied("0001_initial"), applied("0003_ghost")]),
            Err(MigrateError::ChainIntegrity(_))
        ));
    }

    #[test]
    fn test_transaction_mode_serde() {
        let mode: TransactionMode = serde_json::from_str("\"single\"").unwrap();
        assert_eq!(mode, TransactionMode::Single);
        let mode: TransactionMode = serde_json::from_str("\"per_migration\"").unwrap();
        assert_eq!(mode, TransactionMode::PerMigration);
    }
}
