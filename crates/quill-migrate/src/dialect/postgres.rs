//! PostgreSQL dialect for migrations.
//!
//! PostgreSQL alters columns in place and runs DDL inside transactions.
//! Auto-update columns are maintained by a plpgsql function and a
//! `BEFORE UPDATE` trigger, both named after the table and column.

use quill_schema::{DefaultValue, Field, FieldType, Model};
use sha2::{Digest, Sha256};

use crate::error::Result;

use super::{
    choices_constraint_name, find_field, trigger_name, ColumnChange, MigrationDialect,
    RunLock,
};

/// PostgreSQL migration dialect.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn serial_type(field_type: &FieldType) -> &'static str {
        match field_type {
            FieldType::Int64 => "BIGSERIAL",
            FieldType::Int32 => "SERIAL",
            _ => "SMALLSERIAL",
        }
    }

    fn alter_table(&self, table: &str, action: &str) -> String {
        format!("ALTER TABLE {} {action}", self.quote_identifier(table))
    }

    fn choices_check(&self, table: &str, field: &Field) -> Option<String> {
        match &field.field_type {
            FieldType::Choices { values, .. } => Some(format!(
                "CONSTRAINT {} CHECK ({} IN ({}))",
                self.quote_identifier(&choices_constraint_name(table, &field.name)),
                self.quote_identifier(&field.name),
                self.choices_list(values)
            )),
            _ => None,
        }
    }

    fn rename_choices_constraint(&self, table: &str, old: &str, new: &str) -> String {
        self.alter_table(
            table,
            &format!(
                "RENAME CONSTRAINT {} TO {}",
                self.quote_identifier(old),
                self.quote_identifier(new)
            ),
        )
    }

    /// Advisory lock key derived from the ledger name.
    fn lock_key(ledger: &str) -> i64 {
        let digest = Sha256::digest(format!("quill:{ledger}").as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn type_name(&self, field: &Field) -> String {
        match &field.field_type {
            FieldType::VarChar => field
                .max_length
                .map_or_else(|| "TEXT".to_string(), |n| format!("VARCHAR({n})")),
            FieldType::VarBinary => "BYTEA".to_string(),
            FieldType::Int8 | FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::Int32 => "INTEGER".to_string(),
            FieldType::Int64 => "BIGINT".to_string(),
            FieldType::Float => "REAL".to_string(),
            FieldType::Double => "DOUBLE PRECISION".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::DateTime => "TIMESTAMP".to_string(),
            FieldType::Timestamp => "TIMESTAMP WITH TIME ZONE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Choices { values, .. } => {
                let longest = values.iter().map(String::len).max().unwrap_or(1).max(1);
                format!("VARCHAR({longest})")
            }
        }
    }

    fn render_value(&self, field_type: &FieldType, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Boolean(true) => "TRUE".to_string(),
            DefaultValue::Boolean(false) => "FALSE".to_string(),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) if *field_type == FieldType::VarBinary => {
                format!("'\\x{s}'")
            }
            DefaultValue::String(s) => self.quote_string(s),
        }
    }

    fn column_definition(&self, table: &str, field: &Field) -> String {
        let column_type = if field.auto_increment {
            Self::serial_type(&field.field_type).to_string()
        } else {
            self.type_name(field)
        };
        let mut parts = vec![self.quote_identifier(&field.name), column_type];

        if !field.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default) = field.column_default() {
            parts.push(format!("DEFAULT {}", self.render_default(field, &default)));
        }

        parts.extend(self.choices_check(table, field));
        parts.join(" ")
    }

    fn create_table(&self, model: &Model) -> Result<Vec<String>> {
        let mut definitions: Vec<String> = model
            .fields
            .iter()
            .map(|f| self.column_definition(&model.name, f))
            .collect();

        let primary_key: Vec<String> = model.primary_key().map(|f| f.name.clone()).collect();
        if !primary_key.is_empty() {
            definitions.push(format!("PRIMARY KEY ({})", self.column_list(&primary_key)));
        }

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&model.name),
            definitions.join(",\n  ")
        )];
        statements.extend(self.create_triggers(model));
        Ok(statements)
    }

    fn drop_table(&self, model: &Model) -> Vec<String> {
        // Triggers go with the table, their functions do not.
        let mut statements = vec![format!("DROP TABLE {}", self.quote_identifier(&model.name))];
        statements.extend(model.auto_update_fields().map(|f| {
            format!(
                "DROP FUNCTION IF EXISTS {}()",
                self.quote_identifier(&trigger_name(&model.name, &f.name))
            )
        }));
        statements
    }

    fn rename_table(&self, before: &Model, new_name: &str) -> Result<Vec<String>> {
        let mut statements = self.drop_triggers(before);
        statements.push(self.alter_table(
            &before.name,
            &format!("RENAME TO {}", self.quote_identifier(new_name)),
        ));
        for field in &before.fields {
            if matches!(field.field_type, FieldType::Choices { .. }) {
                statements.push(self.rename_choices_constraint(
                    new_name,
                    &choices_constraint_name(&before.name, &field.name),
                    &choices_constraint_name(new_name, &field.name),
                ));
            }
        }
        let renamed = Model {
            name: new_name.to_string(),
            ..before.clone()
        };
        statements.extend(self.create_triggers(&renamed));
        Ok(statements)
    }

    fn add_column(&self, _before: &Model, after: &Model, field: &Field) -> Result<Vec<String>> {
        let mut statements = vec![self.alter_table(
            &after.name,
            &format!("ADD COLUMN {}", self.column_definition(&after.name, field)),
        )];
        if field.auto_update_time {
            statements.extend(self.create_auto_update_trigger(&after.name, field));
        }
        Ok(statements)
    }

    fn drop_column(&self, before: &Model, _after: &Model, column: &str) -> Result<Vec<String>> {
        let field = find_field(before, column)?;

        let mut statements = Vec::new();
        if field.auto_update_time {
            statements.extend(self.drop_auto_update_trigger(&before.name, column));
        }
        statements.push(self.alter_table(
            &before.name,
            &format!("DROP COLUMN {}", self.quote_identifier(column)),
        ));
        Ok(statements)
    }

    fn rename_column(
        &self,
        before: &Model,
        old_name: &str,
        new_name: &str,
    ) -> Result<Vec<String>> {
        let field = find_field(before, old_name)?;
        let table = before.name.as_str();

        let mut statements = Vec::new();
        if field.auto_update_time {
            statements.extend(self.drop_auto_update_trigger(table, old_name));
        }
        statements.push(self.alter_table(
            table,
            &format!(
                "RENAME COLUMN {} TO {}",
                self.quote_identifier(old_name),
                self.quote_identifier(new_name)
            ),
        ));
        if matches!(field.field_type, FieldType::Choices { .. }) {
            statements.push(self.rename_choices_constraint(
                table,
                &choices_constraint_name(table, old_name),
                &choices_constraint_name(table, new_name),
            ));
        }
        if field.auto_update_time {
            let renamed = Field {
                name: new_name.to_string(),
                ..field.clone()
            };
            statements.extend(self.create_auto_update_trigger(table, &renamed));
        }
        Ok(statements)
    }

    fn alter_column(
        &self,
        before: &Model,
        after: &Model,
        column: &str,
        change: ColumnChange,
    ) -> Result<Vec<String>> {
        let old = find_field(before, column)?;
        let new = find_field(after, column)?;
        let table = after.name.as_str();
        let quoted = self.quote_identifier(column);

        let mut statements = Vec::new();
        match change {
            ColumnChange::Type => {
                let was_choices = matches!(old.field_type, FieldType::Choices { .. });
                if was_choices {
                    statements.push(self.alter_table(
                        table,
                        &format!(
                            "DROP CONSTRAINT IF EXISTS {}",
                            self.quote_identifier(&choices_constraint_name(table, column))
                        ),
                    ));
                }
                let new_type = self.type_name(new);
                if self.type_name(old) != new_type {
                    statements.push(self.alter_table(
                        table,
                        &format!("ALTER COLUMN {quoted} TYPE {new_type} USING {quoted}::{new_type}"),
                    ));
                }
                if let Some(check) = self.choices_check(table, new) {
                    statements.push(self.alter_table(table, &format!("ADD {check}")));
                }
            }

            ColumnChange::Nullability if new.nullable => {
                statements.push(
                    self.alter_table(table, &format!("ALTER COLUMN {quoted} DROP NOT NULL")),
                );
            }

            ColumnChange::Nullability => {
                if let Some(default) = new.column_default() {
                    statements.push(format!(
                        "UPDATE {} SET {quoted} = {} WHERE {quoted} IS NULL",
                        self.quote_identifier(table),
                        self.render_default(new, &default)
                    ));
                }
                statements.push(
                    self.alter_table(table, &format!("ALTER COLUMN {quoted} SET NOT NULL")),
                );
            }

            ColumnChange::Default => {
                let action = match new.column_default() {
                    Some(default) => format!(
                        "ALTER COLUMN {quoted} SET DEFAULT {}",
                        self.render_default(new, &default)
                    ),
                    None => format!("ALTER COLUMN {quoted} DROP DEFAULT"),
                };
                statements.push(self.alter_table(table, &action));
            }
        }
        Ok(statements)
    }

    fn create_auto_update_trigger(&self, table: &str, field: &Field) -> Vec<String> {
        let name = self.quote_identifier(&trigger_name(table, &field.name));
        vec![
            format!(
                "CREATE OR REPLACE FUNCTION {name}() RETURNS TRIGGER AS $$ BEGIN NEW.{} = now(); \
                 RETURN NEW; END; $$ LANGUAGE plpgsql",
                self.quote_identifier(&field.name)
            ),
            format!(
                "CREATE TRIGGER {name} BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {name}()",
                self.quote_identifier(table)
            ),
        ]
    }

    fn drop_auto_update_trigger(&self, table: &str, column: &str) -> Vec<String> {
        let name = self.quote_identifier(&trigger_name(table, column));
        vec![
            format!(
                "DROP TRIGGER IF EXISTS {name} ON {}",
                self.quote_identifier(table)
            ),
            format!("DROP FUNCTION IF EXISTS {name}()"),
        ]
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn run_lock(&self, ledger: &str) -> RunLock {
        let key = Self::lock_key(ledger);
        RunLock::Session {
            acquire: format!("DO $$ BEGIN PERFORM pg_advisory_lock({key}); END $$"),
            release: format!("DO $$ BEGIN PERFORM pg_advisory_unlock({key}); END $$"),
        }
    }
}
