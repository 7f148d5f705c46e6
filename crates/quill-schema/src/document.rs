//! The serialized snapshot document.
//!
//! This is the input produced by the model extractor: declarations as the
//! application wrote them, before inheritance and embedded groups are
//! flattened. [`SchemaSnapshot`](crate::SchemaSnapshot) turns it into the
//! flattened form the migration engine works with.

use serde::{Deserialize, Serialize};

use crate::types::{DefaultValue, FieldType};

/// Root of a snapshot document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotDocument {
    /// Optional monotonic version stamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Enumerations referenced by fields.
    #[serde(default)]
    pub enums: Vec<EnumDef>,
    /// Field groups that models embed.
    #[serde(default)]
    pub groups: Vec<GroupDef>,
    /// Model declarations, in application order.
    pub models: Vec<ModelDef>,
}

impl SnapshotDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a document from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Sets the version stamp.
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Adds a model.
    #[must_use]
    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    /// Adds an embeddable field group.
    #[must_use]
    pub fn group(mut self, group: GroupDef) -> Self {
        self.groups.push(group);
        self
    }

    /// Adds an enumeration.
    #[must_use]
    pub fn enumeration(mut self, enumeration: EnumDef) -> Self {
        self.enums.push(enumeration);
        self
    }
}

/// A string-backed enumeration with its encoding table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumDef {
    /// Enumeration name.
    pub name: String,
    /// Variants, in declaration order.
    pub variants: Vec<EnumVariant>,
}

impl EnumDef {
    /// Creates an enumeration whose variants are stored under their own names.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variants: variants
                .into_iter()
                .map(|v| EnumVariant {
                    name: v.into(),
                    value: None,
                })
                .collect(),
        }
    }
}

/// One enumeration variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumVariant {
    /// Variant name in the application.
    pub name: String,
    /// Stored string; defaults to the variant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl EnumVariant {
    /// The string written to the database for this variant.
    #[must_use]
    pub fn encoding(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.name)
    }
}

/// A group of fields declared once and embedded into models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDef {
    /// Group name.
    pub name: String,
    /// Fields of the group.
    pub fields: Vec<FieldDef>,
}

impl GroupDef {
    /// Creates an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }
}

/// A model declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDef {
    /// Model name.
    pub name: String,
    /// Table name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Abstract models only contribute fields to models extending them.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Abstract base model whose fields are prepended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Fields and embedded groups, in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
    /// Model-level composite indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDef>,
}

impl ModelDef {
    /// Creates an empty model.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            is_abstract: false,
            extends: None,
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Overrides the table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Marks the model abstract.
    #[must_use]
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Sets the abstract base model.
    #[must_use]
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends = Some(base.into());
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(FieldEntry::Field(field));
        self
    }

    /// Embeds a field group.
    #[must_use]
    pub fn embed(mut self, group: impl Into<String>) -> Self {
        self.fields.push(FieldEntry::Embed(EmbedDef {
            embed: group.into(),
            prefix: None,
        }));
        self
    }

    /// Embeds a field group with a column name prefix.
    #[must_use]
    pub fn embed_prefixed(mut self, group: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.fields.push(FieldEntry::Embed(EmbedDef {
            embed: group.into(),
            prefix: Some(prefix.into()),
        }));
        self
    }

    /// Adds a composite index.
    #[must_use]
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// The table this model maps to.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

/// An entry in a model's field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldEntry {
    /// An embedded group.
    Embed(EmbedDef),
    /// A plain field.
    Field(FieldDef),
}

/// Reference to an embedded group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedDef {
    /// Group name.
    pub embed: String,
    /// Prefix prepended to every column of the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Type reference as written in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldTypeDef {
    /// Reference to a declared enumeration.
    Enum {
        /// Enumeration name.
        #[serde(rename = "enum")]
        name: String,
    },
    /// A concrete type.
    Type(FieldType),
}

impl From<FieldType> for FieldTypeDef {
    fn from(field_type: FieldType) -> Self {
        Self::Type(field_type)
    }
}

/// Index attribute on a single field.
///
/// Fields sharing a `name` form one composite index, ordered by `priority`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexAttr {
    /// Name of the composite index this field belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Position within the composite index; lower comes first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// A model-level index over several fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed fields, in order.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Creates a non-unique index.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldTypeDef,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the field is (part of) the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether values must be unique.
    #[serde(default)]
    pub unique: bool,
    /// Index membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexAttr>,
    /// Fixed default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Maximum length for text and binary fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Populate with the current time on insert.
    #[serde(default)]
    pub auto_create_time: bool,
    /// Populate with the current time on every update.
    #[serde(default)]
    pub auto_update_time: bool,
    /// Generated by the database on insert.
    #[serde(default)]
    pub auto_increment: bool,
    /// Present in the application but never stored.
    #[serde(default)]
    pub ignored: bool,
}

impl FieldDef {
    /// Creates a non-nullable field without attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: impl Into<FieldTypeDef>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            nullable: false,
            primary_key: false,
            unique: false,
            index: None,
            default: None,
            max_length: None,
            auto_create_time: false,
            auto_update_time: false,
            auto_increment: false,
            ignored: false,
        }
    }

    /// Creates a field typed by a declared enumeration.
    #[must_use]
    pub fn enumeration(name: impl Into<String>, enumeration: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldTypeDef::Enum {
                name: enumeration.into(),
            },
        )
    }

    /// Allows NULL.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the field as primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Requires unique values.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Adds a single-field index.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.index = Some(IndexAttr::default());
        self
    }

    /// Joins the named composite index at the given priority.
    #[must_use]
    pub fn composite_index(mut self, name: impl Into<String>, priority: i32) -> Self {
        self.index = Some(IndexAttr {
            name: Some(name.into()),
            priority: Some(priority),
        });
        self
    }

    /// Sets a fixed default.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Populates the field with the current time on insert.
    #[must_use]
    pub fn auto_create_time(mut self) -> Self {
        self.auto_create_time = true;
        self
    }

    /// Populates the field with the current time on update.
    #[must_use]
    pub fn auto_update_time(mut self) -> Self {
        self.auto_update_time = true;
        self
    }

    /// Lets the database generate the value.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Excludes the field from storage.
    #[must_use]
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document() {
        let json = r#"{
            "version": 3,
            "enums": [{"name": "Role", "variants": [{"name": "Admin", "value": "admin"}, {"name": "User"}]}],
            "groups": [{"name": "Audit", "fields": [{"name": "created_at", "type": "date_time", "auto_create_time": true}]}],
            "models": [
                {
                    "name": "User",
                    "table": "users",
                    "fields": [
                        {"name": "id", "type": "int64", "primary_key": true, "auto_increment": true},
                        {"name": "role", "type": {"enum": "Role"}},
                        {"embed": "Audit"},
                        {"name": "nick", "type": "var_char", "max_length": 32, "index": {"name": "by_nick", "priority": 1}}
                    ]
                }
            ]
        }"#;

        let doc = SnapshotDocument::from_json(json).unwrap();
        assert_eq!(doc.version, Some(3));
        assert_eq!(doc.enums[0].variants[0].encoding(), "admin");
        assert_eq!(doc.enums[0].variants[1].encoding(), "User");

        let user = &doc.models[0];
        assert_eq!(user.table_name(), "users");
        assert_eq!(user.fields.len(), 4);
        assert!(matches!(&user.fields[2], FieldEntry::Embed(e) if e.embed == "Audit"));
        match &user.fields[1] {
            FieldEntry::Field(f) => {
                assert_eq!(
                    f.field_type,
                    FieldTypeDef::Enum {
                        name: "Role".to_string()
                    }
                );
            }
            FieldEntry::Embed(_) => panic!("Expected field"),
        }
        match &user.fields[3] {
            FieldEntry::Field(f) => {
                assert_eq!(f.max_length, Some(32));
                assert_eq!(f.index.as_ref().unwrap().priority, Some(1));
            }
            FieldEntry::Embed(_) => panic!("Expected field"),
        }
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let json = r#"{"models": [{"name": "User", "fields": [{"name": "id", "type": "int64", "primary": true}]}]}"#;
        assert!(SnapshotDocument::from_json(json).is_err());
    }

    #[test]
    fn test_builders() {
        let model = ModelDef::new("Post")
            .extends("Base")
            .field(FieldDef::new("title", FieldType::VarChar).max_length(100))
            .embed_prefixed("Audit", "audit_")
            .index(IndexDef::new("post_title", ["title"]).unique());

        assert_eq!(model.extends.as_deref(), Some("Base"));
        assert_eq!(model.table_name(), "Post");
        assert_eq!(model.fields.len(), 2);
        assert!(model.indexes[0].unique);
    }
}
