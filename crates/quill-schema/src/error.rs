//! Error types for snapshot construction.

/// Errors raised while flattening and validating a snapshot document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The snapshot document could not be decoded.
    #[error("Invalid snapshot document: {0}")]
    Document(String),

    /// Two fields of one flattened model share a name.
    #[error("Duplicate field '{field}' in model '{model}' after flattening")]
    DuplicateField {
        /// Model name.
        model: String,
        /// Field name.
        field: String,
    },

    /// A model, table, group, enumeration or index name is declared twice.
    #[error("Duplicate {kind} '{name}'")]
    DuplicateDeclaration {
        /// Kind of declaration.
        kind: &'static str,
        /// Offending name.
        name: String,
    },

    /// An ignored field carries an attribute that only makes sense on a column.
    #[error("Field '{field}' in model '{model}' is ignored but declares {attribute}")]
    IgnoredWithAttribute {
        /// Model name.
        model: String,
        /// Field name.
        field: String,
        /// The attribute that is meaningless without storage.
        attribute: &'static str,
    },

    /// A composite index references a field the model does not store.
    #[error("Index '{index}' on model '{model}' references unknown field '{field}'")]
    UnknownIndexField {
        /// Model name.
        model: String,
        /// Index name.
        index: String,
        /// Missing field name.
        field: String,
    },

    /// A primary key is nullable or ignored.
    #[error("Primary key '{field}' in model '{model}' must not be {reason}")]
    InvalidPrimaryKey {
        /// Model name.
        model: String,
        /// Field name.
        field: String,
        /// `"nullable"` or `"ignored"`.
        reason: &'static str,
    },

    /// A concrete model declares no primary key.
    #[error("Model '{0}' has no primary key")]
    MissingPrimaryKey(String),

    /// A model extends a model that does not exist.
    #[error("Model '{model}' extends unknown model '{base}'")]
    UnknownBase {
        /// Model name.
        model: String,
        /// Base model name.
        base: String,
    },

    /// A model extends a concrete model.
    #[error("Model '{model}' extends '{base}', which is not abstract")]
    BaseNotAbstract {
        /// Model name.
        model: String,
        /// Base model name.
        base: String,
    },

    /// The `extends` relation loops.
    #[error("Inheritance cycle through model '{0}'")]
    InheritanceCycle(String),

    /// A model embeds a group that is not declared.
    #[error("Model '{model}' embeds unknown group '{group}'")]
    UnknownGroup {
        /// Model name.
        model: String,
        /// Group name.
        group: String,
    },

    /// A field references an enumeration that is not declared.
    #[error("Field '{field}' in model '{model}' references unknown enumeration '{name}'")]
    UnknownEnum {
        /// Model name.
        model: String,
        /// Field name.
        field: String,
        /// Enumeration name.
        name: String,
    },

    /// An enumeration declaration is malformed.
    #[error("Enumeration '{name}': {message}")]
    InvalidEnum {
        /// Enumeration name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A default value does not fit the field kind.
    #[error("Invalid default for field '{field}' in model '{model}': {message}")]
    InvalidDefault {
        /// Model name.
        model: String,
        /// Field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A combination of attributes is contradictory.
    #[error("Invalid attributes on field '{field}' in model '{model}': {message}")]
    InvalidAnnotations {
        /// Model name.
        model: String,
        /// Field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A model, table, field or index name is not a usable identifier.
    #[error("Invalid identifier '{name}': {message}")]
    InvalidIdentifier {
        /// Offending identifier.
        name: String,
        /// Rule it breaks.
        message: &'static str,
    },

    /// The flattened snapshot could not be encoded for hashing.
    #[error("Failed to encode snapshot: {0}")]
    Encoding(String),
}

/// Result type for snapshot construction.
pub type Result<T> = std::result::Result<T, SchemaError>;
