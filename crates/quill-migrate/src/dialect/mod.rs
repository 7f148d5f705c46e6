//! Database dialect implementations.
//!
//! Each dialect knows how to generate SQL for migration operations
//! specific to that database system. Operations are rendered against the
//! [`SchemaState`] they apply to, so dialects that must restate a whole
//! column or rebuild a table can see the full table definition.

mod mysql;
mod postgres;
mod sqlite;

use std::fmt;
use std::str::FromStr;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use quill_schema::{ColumnDefault, DefaultValue, Field, FieldType, Index, Model};
use serde::{Deserialize, Serialize};

use crate::chain::MigrationChain;
use crate::error::{MigrateError, Result};
use crate::migration::{MigrationId, MigrationRecord};
use crate::operations::MigrationOperation;
use crate::state::SchemaState;

/// Which attribute of an existing column an alter targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnChange {
    /// Type or maximum length.
    Type,
    /// NULL allowed or not.
    Nullability,
    /// Default value.
    Default,
}

/// How a run serializes against concurrent runs.
///
/// Either way the lock belongs to the run's connection, so a cancelled or
/// crashed run never leaves it behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLock {
    /// Session lock: `acquire` blocks while another session holds it.
    Session {
        /// Takes the lock.
        acquire: String,
        /// Releases the lock.
        release: String,
    },
    /// Write transaction opened with `begin` around the whole run; records
    /// commit as savepoints and the lock ends with the transaction.
    Transaction {
        /// Opens the transaction and takes the write lock.
        begin: String,
    },
}

/// SQL expression for "now" matching a temporal type.
#[must_use]
pub fn current_time_expression(field_type: &FieldType) -> &'static str {
    match field_type {
        FieldType::Date => "CURRENT_DATE",
        FieldType::Time => "CURRENT_TIME",
        _ => "CURRENT_TIMESTAMP",
    }
}

/// Name of the trigger maintaining an auto-update column.
#[must_use]
pub fn trigger_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_auto_update_time")
}

/// Name of the CHECK constraint restricting a choices column.
#[must_use]
pub fn choices_constraint_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_choices")
}

fn find_model<'a>(state: &'a SchemaState, table: &str) -> Result<&'a Model> {
    state
        .get_model(table)
        .ok_or_else(|| MigrateError::InvalidState(format!("Table '{table}' does not exist")))
}

fn find_field<'a>(model: &'a Model, column: &str) -> Result<&'a Field> {
    model.get_field(column).ok_or_else(|| {
        MigrateError::InvalidState(format!(
            "Column '{column}' does not exist in table '{}'",
            model.name
        ))
    })
}

/// Trait for database-specific SQL generation.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the column type for a field.
    fn type_name(&self, field: &Field) -> String;

    /// Full column definition as used in CREATE TABLE and ADD COLUMN.
    fn column_definition(&self, table: &str, field: &Field) -> String;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a string literal.
    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Renders a literal default for a column of the given type.
    fn render_value(&self, field_type: &FieldType, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Boolean(true) => "1".to_string(),
            DefaultValue::Boolean(false) => "0".to_string(),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) if *field_type == FieldType::VarBinary => format!("X'{s}'"),
            DefaultValue::String(s) => self.quote_string(s),
        }
    }

    /// Renders the default clause value of a column.
    fn render_default(&self, field: &Field, default: &ColumnDefault) -> String {
        match default {
            ColumnDefault::CurrentTime => current_time_expression(&field.field_type).to_string(),
            ColumnDefault::Value(value) => self.render_value(&field.field_type, value),
        }
    }

    /// Quoted, comma separated column list.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `IN (...)` list of the allowed values of a choices column.
    fn choices_list(&self, values: &[String]) -> String {
        values
            .iter()
            .map(|v| self.quote_string(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// CREATE TABLE plus the triggers of its auto-update columns.
    fn create_table(&self, model: &Model) -> Result<Vec<String>>;

    /// DROP TABLE plus anything the table leaves behind.
    fn drop_table(&self, model: &Model) -> Vec<String>;

    /// Renames `before` to `new_name`.
    fn rename_table(&self, before: &Model, new_name: &str) -> Result<Vec<String>>;

    /// Adds `field` to a table; `after` already contains it.
    fn add_column(&self, before: &Model, after: &Model, field: &Field) -> Result<Vec<String>>;

    /// Drops `column`; `after` no longer contains it.
    fn drop_column(&self, before: &Model, after: &Model, column: &str) -> Result<Vec<String>>;

    /// Renames a column.
    fn rename_column(&self, before: &Model, old_name: &str, new_name: &str)
        -> Result<Vec<String>>;

    /// Changes one attribute of `column`.
    fn alter_column(
        &self,
        before: &Model,
        after: &Model,
        column: &str,
        change: ColumnChange,
    ) -> Result<Vec<String>>;

    /// Generates SQL for creating an index.
    fn create_index(&self, table: &str, index: &Index) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(table),
            self.column_list(&index.columns)
        )
    }

    /// Generates SQL for dropping an index.
    fn drop_index(&self, _table: &str, name: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(name))
    }

    /// Creates the trigger maintaining an auto-update column.
    fn create_auto_update_trigger(&self, table: &str, field: &Field) -> Vec<String>;

    /// Drops the trigger maintaining an auto-update column.
    fn drop_auto_update_trigger(&self, table: &str, column: &str) -> Vec<String>;

    /// Triggers for every auto-update column of a model.
    fn create_triggers(&self, model: &Model) -> Vec<String> {
        model
            .auto_update_fields()
            .flat_map(|f| self.create_auto_update_trigger(&model.name, f))
            .collect()
    }

    /// Drops the triggers of every auto-update column of a model.
    fn drop_triggers(&self, model: &Model) -> Vec<String> {
        model
            .auto_update_fields()
            .flat_map(|f| self.drop_auto_update_trigger(&model.name, &f.name))
            .collect()
    }

    /// Bind placeholder for the 1-based parameter `position`.
    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    /// Whether DDL statements take part in transactions.
    fn transactional_ddl(&self) -> bool {
        true
    }

    /// Creates the ledger table if missing.
    fn ledger_table_sql(&self, ledger: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (migration_id VARCHAR(255) NOT NULL PRIMARY KEY, \
             applied_at VARCHAR(64) NOT NULL)",
            self.quote_identifier(ledger)
        )
    }

    /// Lists applied migrations.
    fn select_applied_sql(&self, ledger: &str) -> String {
        format!(
            "SELECT migration_id, applied_at FROM {} ORDER BY migration_id",
            self.quote_identifier(ledger)
        )
    }

    /// Records one applied migration; binds id and timestamp.
    fn insert_applied_sql(&self, ledger: &str) -> String {
        format!(
            "INSERT INTO {} (migration_id, applied_at) VALUES ({}, {})",
            self.quote_identifier(ledger),
            self.placeholder(1),
            self.placeholder(2)
        )
    }

    /// Lock serializing concurrent runs against the same ledger.
    fn run_lock(&self, ledger: &str) -> RunLock;

    /// Generates SQL for a migration operation applied to `state`.
    fn generate_sql(
        &self,
        operation: &MigrationOperation,
        state: &SchemaState,
    ) -> Result<Vec<String>> {
        let mut after = state.clone();
        after.apply_operation(operation)?;

        match operation {
            MigrationOperation::CreateTable { table, .. } => {
                self.create_table(find_model(&after, table)?)
            }

            MigrationOperation::DropTable { table } => {
                Ok(self.drop_table(find_model(state, table)?))
            }

            MigrationOperation::RenameTable { old_name, new_name } => {
                self.rename_table(find_model(state, old_name)?, new_name)
            }

            MigrationOperation::AddColumn { table, field } => self.add_column(
                find_model(state, table)?,
                find_model(&after, table)?,
                field,
            ),

            MigrationOperation::DropColumn { table, column } => self.drop_column(
                find_model(state, table)?,
                find_model(&after, table)?,
                column,
            ),

            MigrationOperation::RenameColumn {
                table,
                old_name,
                new_name,
            } => self.rename_column(find_model(state, table)?, old_name, new_name),

            MigrationOperation::AlterColumnType { table, column, .. } => self.alter_column(
                find_model(state, table)?,
                find_model(&after, table)?,
                column,
                ColumnChange::Type,
            ),

            MigrationOperation::AlterColumnNullability { table, column, .. } => self
                .alter_column(
                    find_model(state, table)?,
                    find_model(&after, table)?,
                    column,
                    ColumnChange::Nullability,
                ),

            MigrationOperation::SetDefault { table, column, .. }
            | MigrationOperation::DropDefault { table, column } => self.alter_column(
                find_model(state, table)?,
                find_model(&after, table)?,
                column,
                ColumnChange::Default,
            ),

            MigrationOperation::AlterColumnAutoUpdate {
                table,
                column,
                auto_update_time,
            } => {
                let field = find_field(find_model(&after, table)?, column)?;
                if *auto_update_time {
                    Ok(self.create_auto_update_trigger(table, field))
                } else {
                    Ok(self.drop_auto_update_trigger(table, column))
                }
            }

            MigrationOperation::AddIndex { table, index } => {
                Ok(vec![self.create_index(table, index)])
            }

            MigrationOperation::DropIndex { table, name } => Ok(vec![self.drop_index(table, name)]),
        }
    }
}

/// Options shared by the dialect implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectOptions {
    /// Allow SQLite table rebuilds for column alterations.
    pub sqlite_table_rebuild: bool,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            sqlite_table_rebuild: true,
        }
    }
}

/// The supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite 3.35 or newer.
    Sqlite,
    /// MySQL 8 or MariaDB 10.5 or newer.
    #[serde(alias = "mariadb")]
    Mysql,
    /// PostgreSQL 11 or newer.
    #[serde(alias = "postgresql")]
    Postgres,
}

impl Dialect {
    /// Detects the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        scheme.parse().map_err(MigrateError::Config)
    }

    /// Builds the SQL generator for this dialect.
    #[must_use]
    pub fn generator(self, options: DialectOptions) -> Box<dyn MigrationDialect> {
        match self {
            Self::Sqlite => Box::new(
                SqliteDialect::new().with_table_rebuild(options.sqlite_table_rebuild),
            ),
            Self::Mysql => Box::new(MysqlDialect::new()),
            Self::Postgres => Box::new(PostgresDialect::new()),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Mysql => write!(f, "mysql"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("Unknown database dialect '{other}'")),
        }
    }
}

/// The statements of one migration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMigration {
    /// Record identifier.
    pub id: MigrationId,
    /// Statements in execution order.
    pub statements: Vec<String>,
}

/// Renders a record against `state` and advances `state` past it.
pub fn render_record(
    dialect: &dyn MigrationDialect,
    record: &MigrationRecord,
    state: &mut SchemaState,
) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for operation in &record.operations {
        statements.extend(dialect.generate_sql(operation, state)?);
        state.apply_operation(operation)?;
    }
    Ok(statements)
}

/// Renders a whole chain without touching a database.
pub fn render_chain_sql(
    dialect: &dyn MigrationDialect,
    chain: &MigrationChain,
) -> Result<Vec<RenderedMigration>> {
    let mut state = SchemaState::new();
    chain
        .records()
        .iter()
        .map(|record| {
            Ok(RenderedMigration {
                id: record.id.clone(),
                statements: render_record(dialect, record, &mut state)?,
            })
        })
        .collect()
}
