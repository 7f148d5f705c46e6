//! Schema migrations for SQLite, MySQL/MariaDB and PostgreSQL.
//!
//! `quill-migrate` turns model snapshots into an append-only chain of
//! migration records and applies that chain to a live database:
//! - Records are TOML files forming a single linear chain
//! - The autodetector diffs the replayed chain against the current models
//! - Dialects render each operation as DDL for the target database
//! - The runner applies outstanding records and tracks them in a ledger
//!
//! # Architecture
//!
//! - **Operations** - Schema changes like `CreateTable`, `AddColumn`, `DropIndex`, etc.
//! - **Chain** - Loads and validates the ordered migration records
//! - **State** - Replays operations into an in-memory schema
//! - **Autodetector** - Diffs snapshots to generate migration operations
//! - **Writer** - Appends new records to the migration directory
//! - **Dialect** - Database-specific SQL generation
//! - **Executor** - Applies records to a database, tracking them in the ledger
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_migrate::prelude::*;
//!
//! let options = SnapshotOptions::default();
//! let current = SchemaSnapshot::from_json(&std::fs::read_to_string(".models.json")?, &options)?;
//! MigrationWriter::new("migrations").make_migration(&current)?;
//!
//! let chain = MigrationChain::load(Path::new("migrations"))?;
//! let mut conn = connect("sqlite://app.sqlite3?mode=rwc").await?;
//! let mut runner = MigrationRunner::new(Dialect::Sqlite.generator(DialectOptions::default()));
//! let report = runner.run(&mut conn, &chain).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Generate a migration from model changes
//! quill-migrate make-migrations --models .models.json
//!
//! # Apply outstanding migrations
//! quill-migrate migrate
//!
//! # Show migration status
//! quill-migrate show-migrations
//!
//! # Print the DDL of the whole chain
//! quill-migrate sql-migrate --dialect postgres
//! ```

pub mod autodetector;
pub mod chain;
pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod history;
pub mod migration;
pub mod operations;
pub mod state;
pub mod writer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::autodetector::{Autodetector, AutodetectorOptions};
    pub use crate::chain::MigrationChain;
    pub use crate::config::{Config, DatabaseConfig, DriverConfig};
    pub use crate::dialect::{
        render_chain_sql, Dialect, DialectOptions, MigrationDialect, MysqlDialect,
        PostgresDialect, RenderedMigration, SqliteDialect,
    };
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{
        connect, MigrationRunner, MigrationStatus, RunOptions, RunReport, TransactionMode,
    };
    pub use crate::history::{AppliedMigration, Ledger};
    pub use crate::migration::{MigrationId, MigrationRecord};
    pub use crate::operations::MigrationOperation;
    pub use crate::state::SchemaState;
    pub use crate::writer::{MigrationWriter, NewMigration};
    pub use quill_schema::{SchemaSnapshot, SnapshotOptions};
}
