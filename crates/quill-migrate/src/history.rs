//! Migration history tracking.
//!
//! This module manages the ledger table (`_quill_migrations` by default)
//! that records which migrations have been applied to the database. Rows
//! are only ever inserted, in the same transaction as the migration they
//! describe.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::AnyConnection;
use tracing::{debug, warn};

use crate::dialect::MigrationDialect;
use crate::error::Result;
use crate::migration::MigrationId;

/// Default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "_quill_migrations";

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Identifier of the migration record.
    pub id: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
                .ok()
        })
}

/// Reads and writes the ledger table through a dialect.
pub struct Ledger<'a> {
    dialect: &'a dyn MigrationDialect,
    table: String,
}

impl<'a> Ledger<'a> {
    /// Creates a ledger over `table`.
    pub fn new(dialect: &'a dyn MigrationDialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
        }
    }

    /// Name of the ledger table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ensures the ledger table exists.
    pub async fn ensure_table(&self, conn: &mut AnyConnection) -> Result<()> {
        let sql = self.dialect.ledger_table_sql(&self.table);
        debug!(sql = %sql, "Ensuring ledger table");
        sqlx::raw_sql(&sql).execute(&mut *conn).await?;
        Ok(())
    }

    /// Gets all applied migrations. A failed read is retried once.
    pub async fn applied(&self, conn: &mut AnyConnection) -> Result<Vec<AppliedMigration>> {
        match self.fetch_applied(conn).await {
            Ok(applied) => Ok(applied),
            Err(e) => {
                warn!(error = %e, ledger = %self.table, "Reading the ledger failed, retrying");
                self.fetch_applied(conn).await
            }
        }
    }

    async fn fetch_applied(&self, conn: &mut AnyConnection) -> Result<Vec<AppliedMigration>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as(&self.dialect.select_applied_sql(&self.table))
                .fetch_all(&mut *conn)
                .await?;

        let mut applied = Vec::with_capacity(rows.len());
        for (id, applied_at) in rows {
            let applied_at = parse_timestamp(&applied_at).unwrap_or_else(|| {
                warn!(migration = %id, value = %applied_at, "Unreadable ledger timestamp");
                DateTime::<Utc>::UNIX_EPOCH
            });
            applied.push(AppliedMigration { id, applied_at });
        }
        Ok(applied)
    }

    /// Statement recording `id` as applied, for use in error reports.
    #[must_use]
    pub fn insert_sql(&self) -> String {
        self.dialect.insert_applied_sql(&self.table)
    }

    /// Records a migration as applied.
    pub async fn record(
        &self,
        conn: &mut AnyConnection,
        id: &MigrationId,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(&self.insert_sql())
            .bind(id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
