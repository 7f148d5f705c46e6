#![allow(dead_code)]

use std::path::Path;

use quill_migrate::prelude::*;
use serde_json::{json, Value};
use sqlx::AnyConnection;

pub fn snapshot(document: &Value) -> SchemaSnapshot {
    SchemaSnapshot::from_json(&document.to_string(), &SnapshotOptions::default())
        .unwrap_or_else(|e| panic!("Invalid snapshot {document}: {e}"))
}

pub fn id_field() -> Value {
    json!({ "name": "id", "type": "int64", "primary_key": true, "auto_increment": true })
}

pub fn user_document(extra_fields: &[Value]) -> Value {
    let mut fields = vec![
        id_field(),
        json!({ "name": "name", "type": "var_char", "max_length": 255 }),
    ];
    fields.extend_from_slice(extra_fields);
    json!({ "models": [{ "name": "user", "fields": fields }] })
}

/// Writes a record for `document` into `dir` and returns the reloaded chain.
pub fn make_migration(dir: &Path, document: &Value) -> MigrationChain {
    MigrationWriter::new(dir)
        .make_migration(&snapshot(document))
        .unwrap_or_else(|e| panic!("make-migrations failed: {e}"));
    MigrationChain::load(dir).unwrap()
}

pub async fn sqlite_connection(path: &Path) -> AnyConnection {
    connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap_or_else(|e| panic!("Failed to open {}: {e}", path.display()))
}

pub fn sqlite_runner() -> MigrationRunner {
    MigrationRunner::new(Dialect::Sqlite.generator(DialectOptions::default()))
}

/// Schema objects that belong to the application, in a stable order.
pub async fn sqlite_schema(conn: &mut AnyConnection) -> Vec<(String, String, Option<String>)> {
    sqlx::query_as(
        "SELECT type, name, sql FROM sqlite_master \
         WHERE substr(name, 1, 6) != '_quill' AND substr(name, 1, 7) != 'sqlite_' \
         ORDER BY type, name",
    )
    .fetch_all(&mut *conn)
    .await
    .unwrap()
}

pub async fn sqlite_columns(conn: &mut AnyConnection, table: &str) -> Vec<String> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info(?) ORDER BY cid")
        .bind(table.to_string())
        .fetch_all(&mut *conn)
        .await
        .unwrap();
    rows.into_iter().map(|(name,)| name).collect()
}

pub async fn applied_ids(conn: &mut AnyConnection) -> Vec<String> {
    let dialect = SqliteDialect::new();
    Ledger::new(&dialect, "_quill_migrations")
        .applied(conn)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect()
}
