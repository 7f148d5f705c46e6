//! Autodetector for generating migrations from schema changes.
//!
//! This module compares two schema snapshots and generates the migration
//! operations needed to transform one into the other. Renames are never
//! guessed: a renamed table or column is a drop plus an add unless the
//! caller passes a hint in [`AutodetectorOptions`].

use std::collections::{BTreeMap, BTreeSet};

use quill_schema::{Field, Index, Model, SchemaSnapshot};

use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;

/// Options for the autodetector.
#[derive(Debug, Clone, Default)]
pub struct AutodetectorOptions {
    /// Table renames, old name to new name.
    pub table_renames: BTreeMap<String, String>,
    /// Column renames per table (keyed by the current table name), old
    /// column name to new column name.
    pub column_renames: BTreeMap<String, BTreeMap<String, String>>,
}

impl AutodetectorOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `old` was renamed to `new`.
    #[must_use]
    pub fn rename_table(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.table_renames.insert(old.into(), new.into());
        self
    }

    /// Declares that column `old` of `table` was renamed to `new`.
    #[must_use]
    pub fn rename_column(
        mut self,
        table: impl Into<String>,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        self.column_renames
            .entry(table.into())
            .or_default()
            .insert(old.into(), new.into());
        self
    }
}

fn bad_hint(message: String) -> MigrateError {
    MigrateError::InvalidState(format!("Invalid rename hint: {message}"))
}

fn irreversible(table: &str, column: &str, reason: &str) -> MigrateError {
    MigrateError::Irreversible {
        table: table.to_string(),
        column: column.to_string(),
        reason: reason.to_string(),
    }
}

/// Detects schema changes and generates migration operations.
#[derive(Debug, Default)]
pub struct Autodetector {
    options: AutodetectorOptions,
}

impl Autodetector {
    /// Creates a new autodetector without rename hints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new autodetector with custom options.
    #[must_use]
    pub fn with_options(options: AutodetectorOptions) -> Self {
        Self { options }
    }

    /// Compares two snapshots and returns the operations needed to transform
    /// `previous` into `current`. A missing previous snapshot is an empty
    /// database.
    pub fn diff(
        &self,
        previous: Option<&SchemaSnapshot>,
        current: &SchemaSnapshot,
    ) -> Result<Vec<MigrationOperation>> {
        let from: BTreeMap<&str, &Model> = previous.map(SchemaSnapshot::by_name).unwrap_or_default();
        let to = current.by_name();

        // Current table name -> previous table it continues.
        let mut sources: BTreeMap<&str, &Model> = BTreeMap::new();
        let mut renamed_from: BTreeSet<&str> = BTreeSet::new();
        for (old, new) in &self.options.table_renames {
            let old_model = from
                .get(old.as_str())
                .ok_or_else(|| bad_hint(format!("table '{old}' does not exist")))?;
            if !to.contains_key(new.as_str()) {
                return Err(bad_hint(format!("table '{new}' is not in the models")));
            }
            if to.contains_key(old.as_str()) || from.contains_key(new.as_str()) {
                return Err(bad_hint(format!("'{old}' -> '{new}' collides with an existing table")));
            }
            sources.insert(new.as_str(), old_model);
            renamed_from.insert(old.as_str());
        }
        for &name in to.keys() {
            if let Some(&previous_model) = from.get(name) {
                sources.insert(name, previous_model);
            }
        }
        for table in self.options.column_renames.keys() {
            if !sources.contains_key(table.as_str()) {
                return Err(bad_hint(format!("table '{table}' is not altered")));
            }
        }

        let mut operations = Vec::new();

        for (&name, &model) in &to {
            if sources.contains_key(name) {
                continue;
            }
            operations.push(MigrationOperation::create_table(name, model.fields.clone()));
            for index in &model.indexes {
                operations.push(MigrationOperation::add_index(name, index.clone()));
            }
        }

        for (&name, &model) in &to {
            if let Some(&source) = sources.get(name) {
                operations.extend(self.diff_model(source, model)?);
            }
        }

        for &name in from.keys().rev() {
            if !to.contains_key(name) && !renamed_from.contains(name) {
                operations.push(MigrationOperation::drop_table(name));
            }
        }

        Ok(operations)
    }

    /// Compares two versions of one table.
    fn diff_model(&self, from: &Model, to: &Model) -> Result<Vec<MigrationOperation>> {
        let mut operations = Vec::new();
        let table = to.name.as_str();

        if from.name != to.name {
            operations.push(MigrationOperation::rename_table(&from.name, table));
        }

        let renames = self.column_renames(from, to)?;
        let current_name =
            |name: &str| renames.get(name).map_or_else(|| name.to_string(), Clone::clone);

        // Previous indexes as they look after the hinted column renames.
        let previous_indexes: Vec<Index> = from
            .indexes
            .iter()
            .map(|index| Index {
                columns: index.columns.iter().map(|c| current_name(c)).collect(),
                ..index.clone()
            })
            .collect();

        // An index survives only under the same name; a renamed index is
        // dropped and added so the database object follows the models.
        let kept = |index: &Index, among: &[Index]| {
            among
                .iter()
                .any(|i| i.name == index.name && i.same_structure(index))
        };

        for index in &previous_indexes {
            if !kept(index, to.indexes.as_slice()) {
                operations.push(MigrationOperation::drop_index(table, &index.name));
            }
        }

        for (old, new) in &renames {
            operations.push(MigrationOperation::rename_column(table, old, new));
        }

        for field in &from.fields {
            if to.get_field(&current_name(&field.name)).is_none() {
                operations.push(MigrationOperation::drop_column(table, &field.name));
            }
        }

        for field in &to.fields {
            let previous = from.fields.iter().find(|f| current_name(&f.name) == field.name);
            match previous {
                Some(previous) => operations.extend(Self::diff_field(table, previous, field)?),
                None => {
                    Self::check_addable(table, field)?;
                    operations.push(MigrationOperation::add_column(table, field.clone()));
                }
            }
        }

        for index in &to.indexes {
            if !kept(index, previous_indexes.as_slice()) {
                operations.push(MigrationOperation::add_index(table, index.clone()));
            }
        }

        Ok(operations)
    }

    /// Validated column rename hints for a table, old name to new name.
    fn column_renames(&self, from: &Model, to: &Model) -> Result<BTreeMap<String, String>> {
        let Some(hints) = self.options.column_renames.get(&to.name) else {
            return Ok(BTreeMap::new());
        };
        for (old, new) in hints {
            if from.get_field(old).is_none() {
                return Err(bad_hint(format!("column '{}.{old}' does not exist", from.name)));
            }
            if to.get_field(new).is_none() {
                return Err(bad_hint(format!("column '{}.{new}' is not in the models", to.name)));
            }
            if to.get_field(old).is_some() || from.get_field(new).is_some() {
                return Err(bad_hint(format!(
                    "'{old}' -> '{new}' collides with an existing column of '{}'",
                    to.name
                )));
            }
        }
        Ok(hints.clone())
    }

    /// A column can only be added if existing rows get a value for it.
    fn check_addable(table: &str, field: &Field) -> Result<()> {
        if field.primary_key {
            return Err(irreversible(
                table,
                &field.name,
                "adding a primary key column to an existing table",
            ));
        }
        if !field.can_be_omitted() {
            return Err(irreversible(
                table,
                &field.name,
                "new non-nullable column has no default for existing rows",
            ));
        }
        Ok(())
    }

    /// One operation per changed attribute, in a fixed order.
    fn diff_field(table: &str, from: &Field, to: &Field) -> Result<Vec<MigrationOperation>> {
        if from.primary_key != to.primary_key {
            return Err(irreversible(table, &to.name, "primary key membership changed"));
        }
        if from.auto_increment != to.auto_increment {
            return Err(irreversible(table, &to.name, "auto increment changed"));
        }

        let mut operations = Vec::new();
        let column = to.name.clone();

        if from.field_type != to.field_type || from.max_length != to.max_length {
            operations.push(MigrationOperation::AlterColumnType {
                table: table.to_string(),
                column: column.clone(),
                field_type: to.field_type.clone(),
                max_length: to.max_length,
            });
        }

        if from.nullable != to.nullable {
            operations.push(MigrationOperation::AlterColumnNullability {
                table: table.to_string(),
                column: column.clone(),
                nullable: to.nullable,
            });
        }

        let (old_default, new_default) = (from.column_default(), to.column_default());
        if old_default != new_default {
            operations.push(match new_default {
                Some(default) => MigrationOperation::SetDefault {
                    table: table.to_string(),
                    column: column.clone(),
                    default,
                },
                None => MigrationOperation::DropDefault {
                    table: table.to_string(),
                    column: column.clone(),
                },
            });
        }

        if from.auto_update_time != to.auto_update_time {
            operations.push(MigrationOperation::AlterColumnAutoUpdate {
                table: table.to_string(),
                column,
                auto_update_time: to.auto_update_time,
            });
        }

        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_schema::{ColumnDefault, DefaultValue, FieldType};

    use crate::state::SchemaState;

    fn snapshot(models: Vec<Model>) -> SchemaSnapshot {
        SchemaSnapshot::from_models(None, models).unwrap()
    }

    fn id() -> Field {
        Field::new("id", FieldType::Int64).primary_key().auto_increment()
    }

    fn users(extra: Vec<Field>) -> Model {
        let mut model = Model::new("users")
            .field(id())
            .field(Field::new("name", FieldType::VarChar).max_length(100));
        model.fields.extend(extra);
        model
    }

    fn detector() -> Autodetector {
        Autodetector::new()
    }

    #[test]
    fn test_detect_new_table() {
        let to = snapshot(vec![users(vec![])
            .index(Index::new("idx_users_name", ["name"], false))]);

        let ops = detector().diff(None, &to).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], MigrationOperation::CreateTable { .. }));
        assert!(matches!(ops[1], MigrationOperation::AddIndex { .. }));
    }

    #[test]
    fn test_detect_dropped_tables_in_reverse_order() {
        let from = snapshot(vec![
            Model::new("alpha").field(id()),
            Model::new("beta").field(id()),
        ]);
        let to = snapshot(vec![]);

        let ops = detector().diff(Some(&from), &to).unwrap();
        assert_eq!(
            ops,
            vec![
                MigrationOperation::drop_table("beta"),
                MigrationOperation::drop_table("alpha"),
            ]
        );
    }

    #[test]
    fn test_add_required_column_is_irreversible() {
        let from = snapshot(vec![users(vec![])]);
        let to = snapshot(vec![users(vec![Field::new("age", FieldType::Int32)])]);

        let err = detector().diff(Some(&from), &to).unwrap_err();
        match err {
            MigrateError::Irreversible { table, column, .. } => {
                assert_eq!(table, "users");
                assert_eq!(column, "age");
            }
            other => panic!("Expected Irreversible, got {other:?}"),
        }
    }

    #[test]
    fn test_add_column_with_default() {
        let age = Field::new("age", FieldType::Int32).default(DefaultValue::Integer(0));
        let from = snapshot(vec![users(vec![])]);
        let to = snapshot(vec![users(vec![age.clone()])]);

        let ops = detector().diff(Some(&from), &to).unwrap();
        assert_eq!(ops, vec![MigrationOperation::add_column("users", age)]);
    }

    #[test]
    fn test_rename_without_hint_is_drop_and_add() {
        let email = Field::new("email", FieldType::VarChar).max_length(255).nullable();
        let mail = Field::new("mail", FieldType::VarChar).max_length(255).nullable();
        let from = snapshot(vec![users(vec![email])]);
        let to = snapshot(vec![users(vec![mail.clone()])]);

        let ops = detector().diff(Some(&from), &to).unwrap();
        assert_eq!(
            ops,
            vec![
                MigrationOperation::drop_column("users", "email"),
                MigrationOperation::add_column("users", mail),
            ]
        );
    }

    #[test]
    fn test_column_rename_hint() {
        let email = Field::new("email", FieldType::VarChar).max_length(255);
        let mail = Field::new("mail", FieldType::VarChar).max_length(255);
        let from = snapshot(vec![
            users(vec![email]).index(Index::new("uq_users_contact", ["email"], true))
        ]);
        let to = snapshot(vec![
            users(vec![mail]).index(Index::new("uq_users_contact", ["mail"], true))
        ]);

        let options = AutodetectorOptions::new().rename_column("users", "email", "mail");
        let ops = Autodetector::with_options(options)
            .diff(Some(&from), &to)
            .unwrap();
        assert_eq!(ops, vec![MigrationOperation::rename_column("users", "email", "mail")]);
    }

    #[test]
    fn test_renamed_index_is_dropped_and_added() {
        let email = || Field::new("email", FieldType::VarChar).max_length(255);
        let from = snapshot(vec![
            users(vec![email()]).index(Index::new("uq_users_email", ["email"], true))
        ]);
        let renamed = Index::new("uq_users_address", ["email"], true);
        let to = snapshot(vec![users(vec![email()]).index(renamed.clone())]);

        let ops = detector().diff(Some(&from), &to).unwrap();
        assert_eq!(
            ops,
            vec![
                MigrationOperation::drop_index("users", "uq_users_email"),
                MigrationOperation::add_index("users", renamed),
            ]
        );
    }

    #[test]
    fn test_table_rename_carries_index_names() {
        let email = || Field::new("email", FieldType::VarChar).max_length(255);
        let users_model =
            || users(vec![email()]).index(Index::new("uq_users_email", ["email"], true));
        let accounts_model = || {
            let mut model =
                users(vec![email()]).index(Index::new("uq_accounts_email", ["email"], true));
            model.name = "accounts".to_string();
            model
        };
        let from = snapshot(vec![users_model()]);
        let to = snapshot(vec![accounts_model()]);

        let options = AutodetectorOptions::new().rename_table("users", "accounts");
        let ops = Autodetector::with_options(options)
            .diff(Some(&from), &to)
            .unwrap();
        assert_eq!(
            ops,
            vec![
                MigrationOperation::rename_table("users", "accounts"),
                MigrationOperation::drop_index("accounts", "uq_users_email"),
                MigrationOperation::add_index(
                    "accounts",
                    Index::new("uq_accounts_email", ["email"], true)
                ),
            ]
        );

        // The old index name is free again for a new `users` table.
        let mut state = SchemaState::new();
        for op in detector().diff(None, &from).unwrap().iter().chain(&ops) {
            state.apply_operation(op).unwrap();
        }
        let replayed = state.to_snapshot().unwrap();
        let next = snapshot(vec![accounts_model(), users_model()]);
        for op in detector().diff(Some(&replayed), &next).unwrap() {
            state.apply_operation(&op).unwrap();
        }
        assert!(detector()
            .diff(Some(&state.to_snapshot().unwrap()), &next)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_hint_rejected() {
        let from = snapshot(vec![users(vec![])]);
        let options = AutodetectorOptions::new().rename_table("missing", "users");
        assert!(Autodetector::with_options(options)
            .diff(Some(&from), &from)
            .is_err());
    }

    #[test]
    fn test_attribute_changes_in_fixed_order() {
        let before = Field::new("seen", FieldType::Date).nullable();
        let after = Field::new("seen", FieldType::DateTime)
            .auto_create_time()
            .auto_update_time();
        let from = snapshot(vec![users(vec![before])]);
        let to = snapshot(vec![users(vec![after])]);

        let ops = detector().diff(Some(&from), &to).unwrap();
        assert_eq!(ops.len(), 4);
        assert!(matches!(ops[0], MigrationOperation::AlterColumnType { .. }));
        assert!(matches!(
            ops[1],
            MigrationOperation::AlterColumnNullability { nullable: false, .. }
        ));
        assert!(matches!(
            &ops[2],
            MigrationOperation::SetDefault { default: ColumnDefault::CurrentTime, .. }
        ));
        assert!(matches!(
            ops[3],
            MigrationOperation::AlterColumnAutoUpdate { auto_update_time: true, .. }
        ));
    }

    #[test]
    fn test_drop_default() {
        let before = Field::new("age", FieldType::Int32).default(DefaultValue::Integer(1));
        let after = Field::new("age", FieldType::Int32).nullable();
        let ops = detector()
            .diff(
                Some(&snapshot(vec![users(vec![before])])),
                &snapshot(vec![users(vec![after])]),
            )
            .unwrap();
        assert!(matches!(ops[1], MigrationOperation::DropDefault { .. }));
    }

    #[test]
    fn test_primary_key_change_is_irreversible() {
        let from = snapshot(vec![Model::new("tags")
            .field(Field::new("code", FieldType::Int32))
            .field(id())]);
        let to = snapshot(vec![Model::new("tags")
            .field(Field::new("code", FieldType::Int32).primary_key())
            .field(id())]);

        assert!(matches!(
            detector().diff(Some(&from), &to),
            Err(MigrateError::Irreversible { .. })
        ));
    }

    #[test]
    fn test_index_changes_wrap_column_changes() {
        let age = Field::new("age", FieldType::Int32).nullable();
        let from = snapshot(vec![
            users(vec![age]).index(Index::new("idx_users_age", ["age"], false))
        ]);
        let to = snapshot(vec![users(vec![
            Field::new("age", FieldType::Int64).nullable()
        ])
        .index(Index::new("uq_users_age", ["age"], true))]);

        let ops = detector().diff(Some(&from), &to).unwrap();
        assert!(matches!(&ops[0], MigrationOperation::DropIndex { name, .. } if name == "idx_users_age"));
        assert!(matches!(ops[1], MigrationOperation::AlterColumnType { .. }));
        assert!(matches!(&ops[2], MigrationOperation::AddIndex { index, .. } if index.unique));
    }

    #[test]
    fn test_no_changes() {
        let schema = snapshot(vec![
            users(vec![]).index(Index::new("idx_users_name", ["name"], false)),
            Model::new("posts").field(id()),
        ]);
        assert!(detector().diff(Some(&schema), &schema).unwrap().is_empty());
    }

    #[test]
    fn test_replayed_diff_reaches_target() {
        let from = snapshot(vec![
            users(vec![Field::new("email", FieldType::VarChar).max_length(255).nullable()]),
            Model::new("legacy").field(id()),
        ]);
        let to = snapshot(vec![
            users(vec![
                Field::new("age", FieldType::Int32).default(DefaultValue::Integer(0)),
            ])
            .index(Index::new("idx_users_age", ["age"], false)),
            Model::new("posts")
                .field(id())
                .field(Field::new("title", FieldType::VarChar).max_length(200)),
        ]);

        let mut state = SchemaState::new();
        for op in detector().diff(None, &from).unwrap() {
            state.apply_operation(&op).unwrap();
        }
        for op in detector().diff(Some(&from), &to).unwrap() {
            state.apply_operation(&op).unwrap();
        }

        let replayed = state.to_snapshot().unwrap();
        assert!(detector().diff(Some(&replayed), &to).unwrap().is_empty());
    }

    #[test]
    fn test_deterministic() {
        let from = snapshot(vec![users(vec![]), Model::new("old").field(id())]);
        let to = snapshot(vec![
            Model::new("zeta").field(id()),
            users(vec![Field::new("bio", FieldType::VarChar).max_length(10).nullable()]),
            Model::new("alpha").field(id()),
        ]);

        let first = detector().diff(Some(&from), &to).unwrap();
        for _ in 0..10 {
            assert_eq!(detector().diff(Some(&from), &to).unwrap(), first);
        }
        assert!(matches!(&first[0], MigrationOperation::CreateTable { table, .. } if table == "alpha"));
        assert!(matches!(&first[1], MigrationOperation::CreateTable { table, .. } if table == "zeta"));
    }
}
