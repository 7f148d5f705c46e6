//! Flattened models: one table, its stored columns and its indexes.

use serde::{Deserialize, Serialize};

use crate::types::{ColumnDefault, DefaultValue, FieldType};

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// A stored column of a flattened model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether NULL is allowed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,
    /// Whether this column is part of the primary key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    /// Whether the database generates the value.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,
    /// Maximum length for text and binary columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Fixed default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Populated with the current time on insert.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_create_time: bool,
    /// Populated with the current time on update.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_update_time: bool,
}

impl Field {
    /// Creates a non-nullable column without attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            max_length: None,
            default: None,
            auto_create_time: false,
            auto_update_time: false,
        }
    }

    /// Allows NULL.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the column as primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Lets the database generate the value.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Sets a fixed default.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Populates the column with the current time on insert.
    #[must_use]
    pub fn auto_create_time(mut self) -> Self {
        self.auto_create_time = true;
        self
    }

    /// Populates the column with the current time on update.
    #[must_use]
    pub fn auto_update_time(mut self) -> Self {
        self.auto_update_time = true;
        self
    }

    /// The default the database applies on insert, if any.
    #[must_use]
    pub fn column_default(&self) -> Option<ColumnDefault> {
        if self.auto_create_time {
            Some(ColumnDefault::CurrentTime)
        } else {
            self.default.clone().map(ColumnDefault::Value)
        }
    }

    /// Applies a column default, replacing both the literal and the
    /// auto-create flag.
    pub fn set_column_default(&mut self, default: Option<ColumnDefault>) {
        match default {
            Some(ColumnDefault::CurrentTime) => {
                self.default = None;
                self.auto_create_time = true;
            }
            Some(ColumnDefault::Value(value)) => {
                self.default = Some(value);
                self.auto_create_time = false;
            }
            None => {
                self.default = None;
                self.auto_create_time = false;
            }
        }
    }

    /// Whether rows can be inserted without naming this column.
    #[must_use]
    pub fn can_be_omitted(&self) -> bool {
        self.nullable || self.auto_increment || self.column_default().is_some()
    }
}

/// An index over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
}

impl Index {
    /// Creates an index.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, columns: I, unique: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique,
        }
    }

    /// Indexes are compared by column list and uniqueness, not by name.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.unique == other.unique && self.columns == other.columns
    }

    /// Whether the index covers the given column.
    #[must_use]
    pub fn references(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// A flattened model: one table with its stored columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Table name.
    pub name: String,
    /// Stored columns in declaration order.
    pub fields: Vec<Field>,
    /// Indexes on this table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
}

impl Model {
    /// Creates a model for the given table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Gets a mutable column by name.
    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Gets an index by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Primary key columns, in declaration order.
    pub fn primary_key(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// Columns maintained by an update trigger.
    pub fn auto_update_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.auto_update_time)
    }
}
