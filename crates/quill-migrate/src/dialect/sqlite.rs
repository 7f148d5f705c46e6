//! SQLite dialect for migrations.
//!
//! SQLite has limited ALTER TABLE support, so column alterations use the
//! "table recreation" strategy: create a shadow table with the new
//! definition, copy the rows, drop the old table, rename the shadow table
//! and recreate indexes and triggers. All of it runs inside the migration's
//! transaction.

use quill_schema::{ColumnDefault, Field, FieldType, Model};

use crate::error::{MigrateError, Result};

use super::{find_field, trigger_name, ColumnChange, MigrationDialect, RunLock};

const REBUILD_PREFIX: &str = "__quill_rebuild_";

/// SQLite migration dialect.
#[derive(Debug, Clone)]
pub struct SqliteDialect {
    table_rebuild: bool,
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteDialect {
    /// Creates a new SQLite dialect with table rebuilds enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table_rebuild: true,
        }
    }

    /// Enables or disables table rebuilds.
    #[must_use]
    pub fn with_table_rebuild(mut self, enabled: bool) -> Self {
        self.table_rebuild = enabled;
        self
    }

    fn column_sql(&self, field: &Field, inline_primary_key: bool) -> String {
        let mut parts = vec![self.quote_identifier(&field.name), self.type_name(field)];

        if inline_primary_key {
            parts.push("PRIMARY KEY AUTOINCREMENT".to_string());
        }

        if !field.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default) = field.column_default() {
            parts.push(format!("DEFAULT {}", self.render_default(field, &default)));
        }

        if let FieldType::Choices { values, .. } = &field.field_type {
            parts.push(format!(
                "CHECK ({} IN ({}))",
                self.quote_identifier(&field.name),
                self.choices_list(values)
            ));
        }

        parts.join(" ")
    }

    /// CREATE TABLE for `model` under the name `name`.
    fn create_table_sql(&self, name: &str, model: &Model) -> Result<String> {
        let primary_key: Vec<&Field> = model.primary_key().collect();
        let inline = primary_key.len() == 1 && primary_key[0].auto_increment;
        if !inline && primary_key.iter().any(|f| f.auto_increment) {
            return Err(MigrateError::UnsupportedOperation {
                dialect: self.name(),
                operation: format!("auto increment in composite primary key of '{name}'"),
            });
        }

        let mut definitions: Vec<String> = model
            .fields
            .iter()
            .map(|f| self.column_sql(f, inline && f.primary_key))
            .collect();

        if !inline && !primary_key.is_empty() {
            let columns: Vec<String> = primary_key.iter().map(|f| f.name.clone()).collect();
            definitions.push(format!("PRIMARY KEY ({})", self.column_list(&columns)));
        }

        Ok(format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(name),
            definitions.join(",\n  ")
        ))
    }

    /// Recreates a table with the definition of `after`, keeping the rows of
    /// every column both versions share.
    fn rebuild(&self, before: &Model, after: &Model, reason: &str) -> Result<Vec<String>> {
        if !self.table_rebuild {
            return Err(MigrateError::UnsupportedOperation {
                dialect: self.name(),
                operation: format!("{reason} (table rebuilds are disabled)"),
            });
        }

        let table = after.name.as_str();
        let shadow = format!("{REBUILD_PREFIX}{table}");
        let mut statements = vec![self.create_table_sql(&shadow, after)?];

        let mut columns = Vec::new();
        let mut expressions = Vec::new();
        for field in &after.fields {
            let Some(old) = before.get_field(&field.name) else {
                continue;
            };
            let mut expression = self.quote_identifier(&field.name);
            if self.type_name(old) != self.type_name(field) {
                expression = format!("CAST({expression} AS {})", self.type_name(field));
            }
            if old.nullable && !field.nullable {
                if let Some(default) = field.column_default() {
                    expression = format!(
                        "COALESCE({expression}, {})",
                        self.render_default(field, &default)
                    );
                }
            }
            columns.push(field.name.clone());
            expressions.push(expression);
        }

        if !columns.is_empty() {
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_identifier(&shadow),
                self.column_list(&columns),
                expressions.join(", "),
                self.quote_identifier(&before.name)
            ));
        }

        statements.push(format!("DROP TABLE {}", self.quote_identifier(&before.name)));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(&shadow),
            self.quote_identifier(table)
        ));
        statements.extend(after.indexes.iter().map(|i| self.create_index(table, i)));
        statements.extend(self.create_triggers(after));

        Ok(statements)
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, field: &Field) -> String {
        match field.field_type {
            FieldType::Int8
            | FieldType::Int16
            | FieldType::Int32
            | FieldType::Int64
            | FieldType::Boolean => "INTEGER",
            FieldType::Float | FieldType::Double => "REAL",
            FieldType::VarBinary => "BLOB",
            FieldType::VarChar
            | FieldType::Date
            | FieldType::DateTime
            | FieldType::Timestamp
            | FieldType::Time
            | FieldType::Choices { .. } => "TEXT",
        }
        .to_string()
    }

    fn column_definition(&self, _table: &str, field: &Field) -> String {
        self.column_sql(field, false)
    }

    fn create_table(&self, model: &Model) -> Result<Vec<String>> {
        let mut statements = vec![self.create_table_sql(&model.name, model)?];
        statements.extend(self.create_triggers(model));
        Ok(statements)
    }

    fn drop_table(&self, model: &Model) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.quote_identifier(&model.name))]
    }

    fn rename_table(&self, before: &Model, new_name: &str) -> Result<Vec<String>> {
        let mut statements = self.drop_triggers(before);
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
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

    fn add_column(&self, before: &Model, after: &Model, field: &Field) -> Result<Vec<String>> {
        // ADD COLUMN rejects non-constant defaults and key columns.
        if field.primary_key || field.column_default() == Some(ColumnDefault::CurrentTime) {
            return self.rebuild(before, after, &format!("adding column '{}'", field.name));
        }

        let mut statements = vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(&after.name),
            self.column_sql(field, false)
        )];
        if field.auto_update_time {
            statements.extend(self.create_auto_update_trigger(&after.name, field));
        }
        Ok(statements)
    }

    fn drop_column(&self, before: &Model, after: &Model, column: &str) -> Result<Vec<String>> {
        let field = find_field(before, column)?;

        let mut statements = Vec::new();
        if field.auto_update_time {
            statements.extend(self.drop_auto_update_trigger(&before.name, column));
        }
        if field.primary_key {
            statements.extend(self.rebuild(before, after, &format!("dropping key column '{column}'"))?);
            return Ok(statements);
        }

        // DROP COLUMN fails while an index still covers the column.
        for index in before.indexes.iter().filter(|i| i.references(column)) {
            statements.push(format!(
                "DROP INDEX IF EXISTS {}",
                self.quote_identifier(&index.name)
            ));
        }
        statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(&before.name),
            self.quote_identifier(column)
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

        let mut statements = Vec::new();
        if field.auto_update_time {
            statements.extend(self.drop_auto_update_trigger(&before.name, old_name));
        }
        statements.push(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_identifier(&before.name),
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        ));
        if field.auto_update_time {
            let renamed = Field {
                name: new_name.to_string(),
                ..field.clone()
            };
            statements.extend(self.create_auto_update_trigger(&before.name, &renamed));
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
        if self.column_sql(old, false) == self.column_sql(new, false) {
            return Ok(Vec::new());
        }

        let reason = match change {
            ColumnChange::Type => format!("changing the type of '{}.{column}'", after.name),
            ColumnChange::Nullability => {
                format!("changing the nullability of '{}.{column}'", after.name)
            }
            ColumnChange::Default => format!("changing the default of '{}.{column}'", after.name),
        };
        self.rebuild(before, after, &reason)
    }

    fn create_auto_update_trigger(&self, table: &str, field: &Field) -> Vec<String> {
        vec![format!(
            "CREATE TRIGGER IF NOT EXISTS {} AFTER UPDATE ON {} FOR EACH ROW BEGIN \
             UPDATE {} SET {} = {} WHERE ROWID = NEW.ROWID; END",
            self.quote_identifier(&trigger_name(table, &field.name)),
            self.quote_identifier(table),
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

    fn run_lock(&self, _ledger: &str) -> RunLock {
        RunLock::Transaction {
            begin: "BEGIN IMMEDIATE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_schema::{DefaultValue, Index};

    use crate::operations::MigrationOperation;
    use crate::state::SchemaState;

    fn dialect() -> SqliteDialect {
        SqliteDialect::new()
    }

    fn users_state() -> SchemaState {
        let mut state = SchemaState::new();
        let ops = [
            MigrationOperation::create_table(
                "users",
                vec![
                    Field::new("id", FieldType::Int64).primary_key().auto_increment(),
                    Field::new("name", FieldType::VarChar).max_length(100),
                    Field::new("age", FieldType::Int32).nullable(),
                    Field::new("updated_at", FieldType::DateTime)
                        .auto_create_time()
                        .auto_update_time(),
                ],
            ),
            MigrationOperation::add_index("users", Index::new("idx_users_age", ["age"], false)),
        ];
        for op in &ops {
            state.apply_operation(op).unwrap();
        }
        state
    }

    #[test]
    fn test_create_table_simple() {
        let op = MigrationOperation::create_table(
            "users",
            vec![
                Field::new("id", FieldType::Int64).primary_key().auto_increment(),
                Field::new("name", FieldType::VarChar).max_length(255),
                Field::new("active", FieldType::Boolean).default(DefaultValue::Boolean(true)),
            ],
        );

        let sql = dialect().generate_sql(&op, &SchemaState::new()).unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"users\" (\n  \
                 \"id\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,\n  \
                 \"name\" TEXT NOT NULL,\n  \
                 \"active\" INTEGER NOT NULL DEFAULT 1\n)"
            ]
        );
    }

    #[test]
    fn test_create_table_composite_key_and_choices() {
        let op = MigrationOperation::create_table(
            "members",
            vec![
                Field::new("group_id", FieldType::Int64).primary_key(),
                Field::new("user_id", FieldType::Int64).primary_key(),
                Field::new(
                    "role",
                    FieldType::Choices {
                        name: "Role".into(),
                        values: vec!["admin".into(), "user".into()],
                    },
                ),
            ],
        );

        let sql = dialect().generate_sql(&op, &SchemaState::new()).unwrap();
        assert!(sql[0].contains("\"role\" TEXT NOT NULL CHECK (\"role\" IN ('admin', 'user'))"));
        assert!(sql[0].contains("PRIMARY KEY (\"group_id\", \"user_id\")"));
        assert!(!sql[0].contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_create_table_with_trigger() {
        let state = users_state();
        let sql = dialect()
            .create_table(state.get_model("users").unwrap())
            .unwrap();
        assert_eq!(sql.len(), 2);
        assert!(sql[0].contains("\"updated_at\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP"));
        assert_eq!(
            sql[1],
            "CREATE TRIGGER IF NOT EXISTS \"users_updated_at_auto_update_time\" AFTER UPDATE ON \
             \"users\" FOR EACH ROW BEGIN UPDATE \"users\" SET \"updated_at\" = CURRENT_TIMESTAMP \
             WHERE ROWID = NEW.ROWID; END"
        );
    }

    #[test]
    fn test_add_column() {
        let op = MigrationOperation::add_column(
            "users",
            Field::new("score", FieldType::Double).default(DefaultValue::Float(0.5)),
        );
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(
            sql,
            vec!["ALTER TABLE \"users\" ADD COLUMN \"score\" REAL NOT NULL DEFAULT 0.5"]
        );
    }

    #[test]
    fn test_add_column_with_current_time_rebuilds() {
        let op = MigrationOperation::add_column(
            "users",
            Field::new("seen_at", FieldType::Timestamp).auto_create_time(),
        );
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert!(sql[0].starts_with("CREATE TABLE \"__quill_rebuild_users\""));
        assert!(sql[1].starts_with("INSERT INTO \"__quill_rebuild_users\""));
        assert!(!sql[1].contains("seen_at"));
        assert_eq!(sql[2], "DROP TABLE \"users\"");
        assert_eq!(
            sql[3],
            "ALTER TABLE \"__quill_rebuild_users\" RENAME TO \"users\""
        );
        assert!(sql[4].starts_with("CREATE INDEX \"idx_users_age\""));
        assert!(sql[5].starts_with("CREATE TRIGGER"));
    }

    #[test]
    fn test_drop_column_drops_covering_index() {
        let op = MigrationOperation::drop_column("users", "age");
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(
            sql,
            vec![
                "DROP INDEX IF EXISTS \"idx_users_age\"",
                "ALTER TABLE \"users\" DROP COLUMN \"age\"",
            ]
        );
    }

    #[test]
    fn test_drop_auto_update_column_drops_trigger() {
        let op = MigrationOperation::drop_column("users", "updated_at");
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(
            sql[0],
            "DROP TRIGGER IF EXISTS \"users_updated_at_auto_update_time\""
        );
    }

    #[test]
    fn test_rename_column() {
        let op = MigrationOperation::rename_column("users", "name", "full_name");
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(
            sql,
            vec!["ALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\""]
        );
    }

    #[test]
    fn test_rename_table_recreates_triggers() {
        let op = MigrationOperation::rename_table("users", "accounts");
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(sql.len(), 3);
        assert!(sql[0].starts_with("DROP TRIGGER IF EXISTS \"users_updated_at"));
        assert_eq!(sql[1], "ALTER TABLE \"users\" RENAME TO \"accounts\"");
        assert!(sql[2].contains("\"accounts_updated_at_auto_update_time\""));
    }

    #[test]
    fn test_tighten_nullability_coalesces_default() {
        let mut state = users_state();
        state
            .apply_operation(&MigrationOperation::SetDefault {
                table: "users".into(),
                column: "age".into(),
                default: ColumnDefault::Value(DefaultValue::Integer(18)),
            })
            .unwrap();

        let op = MigrationOperation::AlterColumnNullability {
            table: "users".into(),
            column: "age".into(),
            nullable: false,
        };
        let sql = dialect().generate_sql(&op, &state).unwrap();
        assert!(sql[1].contains("COALESCE(\"age\", 18)"));
    }

    #[test]
    fn test_type_change_casts() {
        let op = MigrationOperation::AlterColumnType {
            table: "users".into(),
            column: "age".into(),
            field_type: FieldType::VarChar,
            max_length: Some(10),
        };
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert!(sql[1].contains("CAST(\"age\" AS TEXT)"));
    }

    #[test]
    fn test_rebuild_skipped_when_definition_unchanged() {
        let op = MigrationOperation::AlterColumnType {
            table: "users".into(),
            column: "name".into(),
            field_type: FieldType::VarChar,
            max_length: Some(500),
        };
        assert!(dialect().generate_sql(&op, &users_state()).unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_disabled() {
        let op = MigrationOperation::DropDefault {
            table: "users".into(),
            column: "updated_at".into(),
        };
        let result = SqliteDialect::new()
            .with_table_rebuild(false)
            .generate_sql(&op, &users_state());
        assert!(matches!(
            result,
            Err(MigrateError::UnsupportedOperation { dialect: "sqlite", .. })
        ));
    }

    #[test]
    fn test_auto_update_toggle() {
        let op = MigrationOperation::AlterColumnAutoUpdate {
            table: "users".into(),
            column: "updated_at".into(),
            auto_update_time: false,
        };
        let sql = dialect().generate_sql(&op, &users_state()).unwrap();
        assert_eq!(
            sql,
            vec!["DROP TRIGGER IF EXISTS \"users_updated_at_auto_update_time\""]
        );
    }

    #[test]
    fn test_indexes() {
        let d = dialect();
        assert_eq!(
            d.create_index("users", &Index::new("uq_users_email", ["email"], true)),
            "CREATE UNIQUE INDEX \"uq_users_email\" ON \"users\" (\"email\")"
        );
        assert_eq!(
            d.drop_index("users", "uq_users_email"),
            "DROP INDEX \"uq_users_email\""
        );
    }

    #[test]
    fn test_type_names() {
        let d = dialect();
        assert_eq!(d.type_name(&Field::new("a", FieldType::Int64)), "INTEGER");
        assert_eq!(
            d.type_name(&Field::new("a", FieldType::VarChar).max_length(10)),
            "TEXT"
        );
        assert_eq!(d.type_name(&Field::new("a", FieldType::Boolean)), "INTEGER");
        assert_eq!(d.type_name(&Field::new("a", FieldType::DateTime)), "TEXT");
        assert_eq!(d.type_name(&Field::new("a", FieldType::VarBinary)), "BLOB");
        assert_eq!(d.type_name(&Field::new("a", FieldType::Float)), "REAL");
    }

    #[test]
    fn test_run_lock() {
        assert_eq!(
            dialect().run_lock("_quill_migrations"),
            RunLock::Transaction {
                begin: "BEGIN IMMEDIATE".to_string()
            }
        );
        assert!(dialect().transactional_ddl());
    }
}
