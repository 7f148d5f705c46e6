//! Schema snapshot model for the quill migration engine.
//!
//! The migration engine never looks at application source. It reads a
//! [`SnapshotDocument`] describing models, embedded field groups and
//! enumerations, and flattens it into a [`SchemaSnapshot`]: an ordered list
//! of [`Model`]s, each holding its stored columns with inherited fields
//! prepended and embedded groups spliced in.
//!
//! # Example
//!
//! ```rust
//! use quill_schema::prelude::*;
//!
//! let document = SnapshotDocument::new()
//!     .model(ModelDef::new("Base").abstract_model().field(
//!         FieldDef::new("id", FieldType::Int64).primary_key().auto_increment(),
//!     ))
//!     .model(
//!         ModelDef::new("User")
//!             .table("users")
//!             .extends("Base")
//!             .field(FieldDef::new("email", FieldType::VarChar).max_length(255).unique()),
//!     );
//!
//! let snapshot = SchemaSnapshot::from_document(&document, &SnapshotOptions::default())?;
//! let users = snapshot.get_model("users").unwrap();
//! assert_eq!(users.fields.len(), 2);
//! assert_eq!(users.indexes[0].name, "uq_users_email");
//! # Ok::<(), quill_schema::SchemaError>(())
//! ```

pub mod document;
pub mod error;
pub mod lints;
pub mod model;
pub mod snapshot;
pub mod types;

pub use document::{
    EmbedDef, EnumDef, EnumVariant, FieldDef, FieldEntry, FieldTypeDef, GroupDef, IndexAttr,
    IndexDef, ModelDef, SnapshotDocument,
};
pub use error::{Result, SchemaError};
pub use model::{Field, Index, Model};
pub use snapshot::{NullableAutoUpdate, SchemaSnapshot, SnapshotOptions};
pub use types::{ColumnDefault, DefaultValue, FieldType};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::document::{EnumDef, FieldDef, GroupDef, IndexDef, ModelDef, SnapshotDocument};
    pub use crate::error::SchemaError;
    pub use crate::model::{Field, Index, Model};
    pub use crate::snapshot::{NullableAutoUpdate, SchemaSnapshot, SnapshotOptions};
    pub use crate::types::{ColumnDefault, DefaultValue, FieldType};
}
