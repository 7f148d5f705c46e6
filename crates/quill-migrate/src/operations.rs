//! Migration operations.
//!
//! This module defines the structural schema changes a migration record can
//! contain. Operations are dialect independent; the [`dialect`](crate::dialect)
//! module renders them into SQL.

use serde::{Deserialize, Serialize};

use quill_schema::{ColumnDefault, Field, FieldType, Index};

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MigrationOperation {
    /// Create a table with its full column list.
    CreateTable {
        /// Table name.
        table: String,
        /// Columns in declaration order.
        fields: Vec<Field>,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },

    /// Rename a table.
    RenameTable {
        /// Current table name.
        old_name: String,
        /// New table name.
        new_name: String,
    },

    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        field: Field,
    },

    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Change the type (and length limit) of a column.
    AlterColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New type.
        field_type: FieldType,
        /// New maximum length.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },

    /// Allow or forbid NULL in a column.
    AlterColumnNullability {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Whether NULL is allowed afterwards.
        nullable: bool,
    },

    /// Set the default of a column.
    SetDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New default.
        default: ColumnDefault,
    },

    /// Remove the default of a column.
    DropDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Enable or disable populating a column with the current time on update.
    AlterColumnAutoUpdate {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Whether the column is maintained on update afterwards.
        auto_update_time: bool,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        old_name: String,
        /// New column name.
        new_name: String,
    },

    /// Create an index.
    AddIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: Index,
    },

    /// Drop an index.
    DropIndex {
        /// Table name.
        table: String,
        /// Index name.
        name: String,
    },
}

impl MigrationOperation {
    /// Creates a CREATE TABLE operation.
    #[must_use]
    pub fn create_table(table: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::CreateTable {
            table: table.into(),
            fields,
        }
    }

    /// Creates a DROP TABLE operation.
    #[must_use]
    pub fn drop_table(table: impl Into<String>) -> Self {
        Self::DropTable {
            table: table.into(),
        }
    }

    /// Creates a RENAME TABLE operation.
    #[must_use]
    pub fn rename_table(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self::RenameTable {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an ADD COLUMN operation.
    #[must_use]
    pub fn add_column(table: impl Into<String>, field: Field) -> Self {
        Self::AddColumn {
            table: table.into(),
            field,
        }
    }

    /// Creates a DROP COLUMN operation.
    #[must_use]
    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a RENAME COLUMN operation.
    #[must_use]
    pub fn rename_column(
        table: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self::RenameColumn {
            table: table.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an index operation.
    #[must_use]
    pub fn add_index(table: impl Into<String>, index: Index) -> Self {
        Self::AddIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates a DROP INDEX operation.
    #[must_use]
    pub fn drop_index(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropIndex {
            table: table.into(),
            name: name.into(),
        }
    }

    /// The table this operation acts on (the new name for renames).
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::RenameTable { new_name, .. } => new_name,
            Self::CreateTable { table, .. }
            | Self::DropTable { table }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumnType { table, .. }
            | Self::AlterColumnNullability { table, .. }
            | Self::SetDefault { table, .. }
            | Self::DropDefault { table, .. }
            | Self::AlterColumnAutoUpdate { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. } => table,
        }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table, .. } => format!("Create table '{table}'"),
            Self::DropTable { table } => format!("Drop table '{table}'"),
            Self::RenameTable { old_name, new_name } => {
                format!("Rename table '{old_name}' to '{new_name}'")
            }
            Self::AddColumn { table, field } => {
                format!("Add column '{}' to table '{table}'", field.name)
            }
            Self::DropColumn { table, column } => {
                format!("Drop column '{column}' from table '{table}'")
            }
            Self::AlterColumnType {
                table,
                column,
                field_type,
                ..
            } => format!(
                "Change type of '{table}.{column}' to {}",
                field_type.kind_name()
            ),
            Self::AlterColumnNullability {
                table,
                column,
                nullable,
            } => {
                if *nullable {
                    format!("Allow NULL in '{table}.{column}'")
                } else {
                    format!("Forbid NULL in '{table}.{column}'")
                }
            }
            Self::SetDefault { table, column, .. } => {
                format!("Set default of '{table}.{column}'")
            }
            Self::DropDefault { table, column } => format!("Drop default of '{table}.{column}'"),
            Self::AlterColumnAutoUpdate {
                table,
                column,
                auto_update_time,
            } => {
                if *auto_update_time {
                    format!("Maintain '{table}.{column}' on update")
                } else {
                    format!("Stop maintaining '{table}.{column}' on update")
                }
            }
            Self::RenameColumn {
                table,
                old_name,
                new_name,
            } => format!("Rename column '{old_name}' to '{new_name}' in table '{table}'"),
            Self::AddIndex { table, index } => {
                format!("Create index '{}' on table '{table}'", index.name)
            }
            Self::DropIndex { table, name } => {
                format!("Drop index '{name}' from table '{table}'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_schema::DefaultValue;

    #[test]
    fn test_create_table() {
        let op = MigrationOperation::create_table(
            "users",
            vec![Field::new("id", FieldType::Int64).primary_key()],
        );

        match &op {
            MigrationOperation::CreateTable { table, fields } => {
                assert_eq!(table, "users");
                assert_eq!(fields.len(), 1);
            }
            _ => panic!("Expected CreateTable"),
        }
        assert_eq!(op.table(), "users");
    }

    #[test]
    fn test_rename_table_targets_new_name() {
        let op = MigrationOperation::rename_table("users", "accounts");
        assert_eq!(op.table(), "accounts");
        assert_eq!(op.description(), "Rename table 'users' to 'accounts'");
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            MigrationOperation::drop_column("users", "email").description(),
            "Drop column 'email' from table 'users'"
        );
        assert_eq!(
            MigrationOperation::AlterColumnNullability {
                table: "users".into(),
                column: "age".into(),
                nullable: false,
            }
            .description(),
            "Forbid NULL in 'users.age'"
        );
        assert_eq!(
            MigrationOperation::add_index("users", Index::new("idx_users_age", ["age"], false))
                .description(),
            "Create index 'idx_users_age' on table 'users'"
        );
    }

    #[test]
    fn test_serde_tag() {
        let op = MigrationOperation::SetDefault {
            table: "users".into(),
            column: "age".into(),
            default: ColumnDefault::Value(DefaultValue::Integer(0)),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "SetDefault");
        assert_eq!(json["default"]["value"], 0);

        let back: MigrationOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
