//! State reconstruction from migrations.
//!
//! Replaying the operations of a migration chain from an empty database
//! yields the schema the chain has created. The autodetector diffs the
//! current snapshot against this state, and the dialects render each
//! operation against the state it applies to.

use quill_schema::{Model, SchemaSnapshot};

use crate::error::{MigrateError, Result};
use crate::migration::MigrationRecord;
use crate::operations::MigrationOperation;

/// Schema reconstructed by replaying operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaState {
    models: Vec<Model>,
}

fn missing_table(table: &str) -> MigrateError {
    MigrateError::InvalidState(format!("Table '{table}' does not exist"))
}

fn missing_column(table: &str, column: &str) -> MigrateError {
    MigrateError::InvalidState(format!(
        "Column '{column}' does not exist in table '{table}'"
    ))
}

impl SchemaState {
    /// Creates a new empty schema state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays a sequence of records from an empty schema.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a MigrationRecord>) -> Result<Self> {
        let mut state = Self::new();
        for record in records {
            state.apply_record(record)?;
        }
        Ok(state)
    }

    /// Tables in creation order.
    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    fn model_mut(&mut self, name: &str) -> Result<&mut Model> {
        self.models
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| missing_table(name))
    }

    /// Converts the state into a snapshot for diffing.
    pub fn to_snapshot(&self) -> Result<SchemaSnapshot> {
        Ok(SchemaSnapshot::from_models(None, self.models.clone())?)
    }

    /// Applies a record's operations to the schema state.
    pub fn apply_record(&mut self, record: &MigrationRecord) -> Result<()> {
        for operation in &record.operations {
            self.apply_operation(operation)?;
        }
        Ok(())
    }

    /// Applies a single operation to the schema state.
    pub fn apply_operation(&mut self, operation: &MigrationOperation) -> Result<()> {
        match operation {
            MigrationOperation::CreateTable { table, fields } => {
                if self.get_model(table).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{table}' already exists"
                    )));
                }
                self.models.push(Model {
                    name: table.clone(),
                    fields: fields.clone(),
                    indexes: Vec::new(),
                });
            }

            MigrationOperation::DropTable { table } => {
                let idx = self
                    .models
                    .iter()
                    .position(|m| m.name == *table)
                    .ok_or_else(|| missing_table(table))?;
                self.models.remove(idx);
            }

            MigrationOperation::RenameTable { old_name, new_name } => {
                if self.get_model(new_name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Table '{new_name}' already exists"
                    )));
                }
                self.model_mut(old_name)?.name.clone_from(new_name);
            }

            MigrationOperation::AddColumn { table, field } => {
                let model = self.model_mut(table)?;
                if model.get_field(&field.name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Column '{}' already exists in table '{table}'",
                        field.name
                    )));
                }
                model.fields.push(field.clone());
            }

            MigrationOperation::DropColumn { table, column } => {
                let model = self.model_mut(table)?;
                let idx = model
                    .fields
                    .iter()
                    .position(|f| f.name == *column)
                    .ok_or_else(|| missing_column(table, column))?;
                model.fields.remove(idx);
                // Databases drop indexes together with their columns.
                model.indexes.retain(|i| !i.references(column));
            }

            MigrationOperation::RenameColumn {
                table,
                old_name,
                new_name,
            } => {
                let model = self.model_mut(table)?;
                if model.get_field(new_name).is_some() {
                    return Err(MigrateError::InvalidState(format!(
                        "Column '{new_name}' already exists in table '{table}'"
                    )));
                }
                model
                    .get_field_mut(old_name)
                    .ok_or_else(|| missing_column(table, old_name))?
                    .name
                    .clone_from(new_name);
                for index in &mut model.indexes {
                    for column in &mut index.columns {
                        if column == old_name {
                            column.clone_from(new_name);
                        }
                    }
                }
            }

            MigrationOperation::AlterColumnType {
                table,
                column,
                field_type,
                max_length,
            } => {
                let field = self
                    .model_mut(table)?
                    .get_field_mut(column)
                    .ok_or_else(|| missing_column(table, column))?;
                field.field_type = field_type.clone();
                field.max_length = *max_length;
            }

            MigrationOperation::AlterColumnNullability {
                table,
                column,
                nullable,
            } => {
                let field = self
                    .model_mut(table)?
                    .get_field_mut(column)
                    .ok_or_else(|| missing_column(table, column))?;
                if field.primary_key && *nullable {
                    return Err(MigrateError::InvalidState(format!(
                        "Primary key '{table}.{column}' cannot be nullable"
                    )));
                }
                field.nullable = *nullable;
            }

            MigrationOperation::SetDefault {
                table,
                column,
                default,
            } => {
                self.model_mut(table)?
                    .get_field_mut(column)
                    .ok_or_else(|| missing_column(table, column))?
                    .set_column_default(Some(default.clone()));
            }

            MigrationOperation::DropDefault { table, column } => {
                self.model_mut(table)?
                    .get_field_mut(column)
                    .ok_or_else(|| missing_column(table, column))?
                    .set_column_default(None);
            }

            MigrationOperation::AlterColumnAutoUpdate {
                table,
                column,
                auto_update_time,
            } => {
                self.model_mut(table)?
                    .get_field_mut(column)
                    .ok_or_else(|| missing_column(table, column))?
                    .auto_update_time = *auto_update_time;
            }

            MigrationOperation::AddIndex { table, index } => {
                if self
                    .models
                    .iter()
                    .any(|m| m.get_index(&index.name).is_some())
                {
                    return Err(MigrateError::InvalidState(format!(
                        "Index '{}' already exists",
                        index.name
                    )));
                }
                let model = self.model_mut(table)?;
                if let Some(column) = index.columns.iter().find(|c| model.get_field(c).is_none()) {
                    return Err(missing_column(table, column));
                }
                model.indexes.push(index.clone());
            }

            MigrationOperation::DropIndex { table, name } => {
                let model = self.model_mut(table)?;
                let idx = model
                    .indexes
                    .iter()
                    .position(|i| i.name == *name)
                    .ok_or_else(|| {
                        MigrateError::InvalidState(format!(
                            "Index '{name}' does not exist on table '{table}'"
                        ))
                    })?;
                model.indexes.remove(idx);
            }
        }

        Ok(())
    }
}
