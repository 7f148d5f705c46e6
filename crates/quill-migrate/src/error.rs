//! Error types for the migration engine.

use std::path::PathBuf;

use quill_schema::SchemaError;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The model snapshot is malformed or contradictory.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A detected change cannot be applied without operator input.
    #[error("Irreversible change to '{table}.{column}': {reason}")]
    Irreversible {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Why the change cannot be applied automatically.
        reason: String,
    },

    /// A dialect cannot express an operation.
    #[error("{dialect} cannot render {operation}")]
    UnsupportedOperation {
        /// Dialect name.
        dialect: &'static str,
        /// Description of the operation.
        operation: String,
    },

    /// The migration chain on disk and the ledger disagree, or the chain
    /// itself is not linear.
    #[error("Chain integrity violated: {0}")]
    ChainIntegrity(String),

    /// A statement failed against the live database.
    #[error("Migration {migration} failed at `{statement}`: {source}")]
    Execution {
        /// Identifier of the failing migration.
        migration: String,
        /// The statement that failed.
        statement: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Another run holds the migration lock.
    #[error("Migration lock is held: {0}")]
    LockHeld(String),

    /// Replaying operations hit an impossible state.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),

    /// Database error outside of migration statements.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A migration or config file could not be parsed.
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// Path of the file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A migration could not be encoded.
    #[error("Failed to encode migration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Refusing to overwrite an existing migration file.
    #[error("Migration file already exists: {0}")]
    MigrationExists(PathBuf),

    /// Configuration is incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
