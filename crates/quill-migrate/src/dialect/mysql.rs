//! MySQL and MariaDB dialect for migrations.
//!
//! Columns are altered with `MODIFY COLUMN`, which restates the whole column
//! definition. DDL commits implicitly on these servers, so a failing
//! migration can leave earlier statements of the same record applied.

use quill_schema::{ColumnDefault, DefaultValue, Field, FieldType, Model};

use crate::error::Result;

use super::{find_field, trigger_name, ColumnChange, MigrationDialect, RunLock};

/// MySQL/MariaDB migration dialect.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn alter_table(&self, table: &str, action: &str) -> String {
        format!("ALTER TABLE {} {action}", self.quote_identifier(table))
    }

    fn modify_column(&self, table: &str, field: &Field) -> String {
        self.alter_table(
            table,
            &format!("MODIFY COLUMN {}", self.column_definition(table, field)),
        )
    }

    /// BLOB and TEXT columns only accept expression defaults.
    fn is_blob(field: &Field) -> bool {
        field.field_type == FieldType::VarBinary && field.max_length.is_none()
    }
}

impl MigrationDialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn type_name(&self, field: &Field) -> String {
        match &field.field_type {
            FieldType::VarChar => field
                .max_length
                .map_or_else(|| "LONGTEXT".to_string(), |n| format!("VARCHAR({n})")),
            FieldType::VarBinary => field
                .max_length
                .map_or_else(|| "LONGBLOB".to_string(), |n| format!("VARBINARY({n})")),
            FieldType::Int8 => "TINYINT".to_string(),
            FieldType::Int16 => "SMALLINT".to_string(),
            FieldType::Int32 => "INT".to_string(),
            FieldType::Int64 => "BIGINT".to_string(),
            FieldType::Float => "FLOAT".to_string(),
            FieldType::Double => "DOUBLE".to_string(),
            FieldType::Boolean => "BOOL".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::DateTime => "DATETIME".to_string(),
            FieldType::Timestamp => "TIMESTAMP".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Choices { values, .. } => format!("ENUM({})", self.choices_list(values)),
        }
    }

    fn render_default(&self, field: &Field, default: &ColumnDefault) -> String {
        match (default, &field.field_type) {
            (ColumnDefault::CurrentTime, FieldType::Date) => "(CURRENT_DATE)".to_string(),
            (ColumnDefault::CurrentTime, FieldType::Time) => "(CURRENT_TIME)".to_string(),
            (ColumnDefault::CurrentTime, _) => "CURRENT_TIMESTAMP".to_string(),
            (ColumnDefault::Value(value @ DefaultValue::String(_)), _) if Self::is_blob(field) => {
                format!("({})", self.render_value(&field.field_type, value))
            }
            (ColumnDefault::Value(value), _) => self.render_value(&field.field_type, value),
        }
    }

    fn column_definition(&self, _table: &str, field: &Field) -> String {
        let mut parts = vec![self.quote_identifier(&field.name), self.type_name(field)];

        parts.push(if field.nullable { "NULL" } else { "NOT NULL" }.to_string());

        if field.auto_increment {
            parts.push("AUTO_INCREMENT".to_string());
        }

        if let Some(default) = field.column_default() {
            parts.push(format!("DEFAULT {}", self.render_default(field, &default)));
        }

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
            "CREATE TABLE {} (\n  {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            self.quote_identifier(&model.name),
            definitions.join(",\n  ")
        )];
        statements.extend(self.create_triggers(model));
        Ok(statements)
    }

    fn drop_table(&self, model: &Model) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.quote_identifier(&model.name))]
    }

    fn rename_table(&self, before: &Model, new_name: &str) -> Result<Vec<String>> {
        let mut statements = self.drop_triggers(before);
        statements.push(format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(&before.name),
            self.quote_identifier(new_name)
        ));
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
            ColumnChange::Type => statements.push(self.modify_column(table, new)),

            ColumnChange::Nullability => {
                if old.nullable && !new.nullable {
                    if let Some(default) = new.column_default() {
                        statements.push(format!(
                            "UPDATE {} SET {quoted} = {} WHERE {quoted} IS NULL",
                            self.quote_identifier(table),
                            self.render_default(new, &default)
                        ));
                    }
                }
                statements.push(self.modify_column(table, new));
            }

            ColumnChange::Default => match new.column_default() {
                // CURRENT_TIMESTAMP is only accepted in a full column definition.
                Some(ColumnDefault::CurrentTime) => {
                    statements.push(self.modify_column(table, new));
                }
                Some(default) => statements.push(self.alter_table(
                    table,
                    &format!(
                        "ALTER COLUMN {quoted} SET DEFAULT {}",
                        self.render_default(new, &default)
                    ),
                )),
                None => statements.push(
                    self.alter_table(table, &format!("ALTER COLUMN {quoted} DROP DEFAULT")),
                ),
            },
        }
        Ok(statements)
    }

    fn drop_index(&self, table: &str, name: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(name),
            self.quote_identifier(table)
        )
    }

    fn create_auto_update_trigger(&self, table: &str, field: &Field) -> Vec<String> {
        vec![format!(
            "CREATE TRIGGER {} BEFORE UPDATE ON {} FOR EACH ROW SET NEW.{} = {}",
            self.quote_identifier(&trigger_name(table, &field.name)),
            self.quote_identifier(table),
            self.quote_identifier(&field.name),
            super::current_time_expression(&field.field_type)
        )]
    }

    fn drop_auto_update_trigger(&self, table: &str, column: &str) -> Vec<String> {
        vec![format!(
            "DROP TRIGGER IF EXISTS {}",
            self.quote_identifier(&trigger_name(table, column))
        )]
    }

    fn transactional_ddl(&self) -> bool {
        false
    }

    fn run_lock(&self, ledger: &str) -> RunLock {
        let lock = self.quote_string(&format!("quill.{ledger}"));
        RunLock::Session {
            acquire: format!("DO GET_LOCK({lock}, -1)"),
            release: format!("DO RELEASE_LOCK({lock})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_schema::Index;

    use crate::operations::MigrationOperation;
    use crate::state::SchemaState;

    fn dialect() -> MysqlDialect {
        MysqlDialect::new()
    }

    fn users_state() -> SchemaState {
        let mut state = SchemaState::new();
        state
            .apply_operation(&MigrationOperation::create_table(
                "users",
                vec![
                    Field::new("id", FieldType::Int64).primary_key().auto_increment(),
                    Field::new("name", FieldType::VarChar).max_length(100),
                    Field::new("age", FieldType::Int32).nullable(),
                    Field::new("born", FieldType::Date).auto_create_time(),
                    Field::new("updated_at", FieldType::DateTime).auto_update_time().nullable(),
                ],
            ))
            .unwrap();
        state
    }

    #[test]
    fn test_create_table() {
        let state = users_state();
        let sql = dialect()
            .create_table(state.get_model("users").unwrap())
            .unwrap();

        assert_eq!(sql.len(), 2);
        assert!(sql[0].starts_with("CREATE TABLE `users` (\n  `id` BIGINT NOT NULL AUTO_INCREMENT,"));
        assert!(sql[0].contains("`born` DATE NOT NULL DEFAULT (CURRENT_DATE)"));
        assert!(sql[0].contains("`updated_at` DATETIME NULL"));
        assert!(sql[0].contains("PRIMARY KEY (`id`)\n) ENGINE=InnoDB"));
        assert_eq!(
            sql[1],
            "CREATE TRIGGER `users_updated_at_auto_update_time` BEFORE UPDATE ON `users` \
             FOR EACH ROW SET NEW.`updated_at` = CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_type_names() {
        let d = dialect();
        assert_eq!(d.type_name(&Field::new("a", FieldType::Int8)), "TINYINT");
        assert_eq!(d.type_name(&Field::new("a", FieldType::Int32)), "INT");
        assert_eq!(d.type_name(&Field::new("a", FieldType::Boolean)), "BOOL");
        assert_eq!(
            d.type_name(&Field::new("a", FieldType::VarBinary).max_length(16)),
            "VARBINARY(16)"
        );
        assert_eq!(d.type_name(&Field::new("a", FieldType::VarBinary)), "LONGBLOB");
        assert_eq!(
            d.type_name(&Field::new(
                "a",
                FieldType::Choices {
                    name: "Role".into(),
                    values: vec!["admin".into(), "user".into()],
                }
            )),
            "ENUM('admin', 'user')"
        );
    }

    #[test]
    fn test_blob_default_is_expression() {
        let blob = Field::new("data", FieldType::VarBinary);
        assert_eq!(
            dialect().render_default(
                &blob,
                &ColumnDefault::Value(DefaultValue::String("00ff".into()))
            ),
            "(X'00ff')"
        );
    }

    #[test]
    fn test_modify_column_omits_primary_key() {
        let op = MigrationOperation::AlterColumnType {
            table: "users".into(),
            column: "id".into(),
            field_type: FieldType::Int32,
            max_length: None,
        };
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(
            sql,
            vec!["ALTER TABLE `users` MODIFY COLUMN `id` INT NOT NULL AUTO_INCREMENT"]
        );
    }

    #[test]
    fn test_alter_default() {
        let op = MigrationOperation::SetDefault {
            table: "users".into(),
            column: "age".into(),
            default: ColumnDefault::Value(DefaultValue::Integer(21)),
        };
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(
            sql,
            vec!["ALTER TABLE `users` ALTER COLUMN `age` SET DEFAULT 21"]
        );

        let op = MigrationOperation::SetDefault {
            table: "users".into(),
            column: "updated_at".into(),
            default: ColumnDefault::CurrentTime,
        };
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert!(sql[0].contains("MODIFY COLUMN `updated_at` DATETIME NULL DEFAULT CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_drop_index_names_table() {
        assert_eq!(
            dialect().drop_index("users", "idx_users_age"),
            "DROP INDEX `idx_users_age` ON `users`"
        );
        assert_eq!(
            dialect().create_index("users", &Index::new("idx_users_age", ["age"], false)),
            "CREATE INDEX `idx_users_age` ON `users` (`age`)"
        );
    }

    #[test]
    fn test_rename_column_recreates_trigger() {
        let op = MigrationOperation::rename_column("users", "updated_at", "changed_at");
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(sql.len(), 3);
        assert_eq!(
            sql[0],
            "DROP TRIGGER IF EXISTS `users_updated_at_auto_update_time`"
        );
        assert_eq!(
            sql[1],
            "ALTER TABLE `users` RENAME COLUMN `updated_at` TO `changed_at`"
        );
        assert!(sql[2].contains("`users_changed_at_auto_update_time`"));
    }

    #[test]
    fn test_quoting() {
        let d = dialect();
        assert_eq!(d.quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(d.quote_string("it's \\ ok"), "'it''s \\\\ ok'");
        assert!(!d.transactional_ddl());
        assert_eq!(
            d.run_lock("_quill_migrations"),
            RunLock::Session {
                acquire: "DO GET_LOCK('quill._quill_migrations', -1)".to_string(),
                release: "DO RELEASE_LOCK('quill._quill_migrations')".to_string(),
            }
        );
    }
}
