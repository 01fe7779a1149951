use crate::cloud::RemoteTable;
use crate::db::models::{LocalColumn, LocalTable, Migration, RollbackInfo};
use crate::db::repos::local::catalog;
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier};

use super::ItemOutcome;
use crate::engine::EngineContext;

/// Map a declared SQLite type onto a Postgres column type, following SQLite's
/// own affinity rules where they apply.
pub fn column_type(decl_type: &str) -> &'static str {
    let t = decl_type.trim().to_ascii_uppercase();
    if t.is_empty() {
        return "TEXT";
    }
    if t.contains("INT") {
        return "BIGINT";
    }
    if t.contains("TIMESTAMP") || t.contains("DATETIME") {
        return "TIMESTAMPTZ";
    }
    if t == "DATE" {
        return "DATE";
    }
    if t.contains("JSON") {
        return "JSONB";
    }
    if t.contains("UUID") {
        return "UUID";
    }
    if t.contains("BOOL") {
        return "BOOLEAN";
    }
    if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
        return "TEXT";
    }
    if t.contains("BLOB") {
        return "BYTEA";
    }
    if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
        return "DOUBLE PRECISION";
    }
    if t.contains("NUMERIC") || t.contains("DECIMAL") {
        return "NUMERIC";
    }
    "TEXT"
}

/// Only literal defaults survive the move; expressions such as
/// `(datetime('now'))` are SQLite-specific and dropped.
fn default_clause(column: &LocalColumn) -> Option<String> {
    let raw = column.default_value.as_deref()?.trim();
    let upper = raw.to_ascii_uppercase();
    let boolean = column_type(&column.decl_type) == "BOOLEAN";

    match upper.as_str() {
        "NULL" | "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME" => return Some(upper),
        "TRUE" | "FALSE" => return Some(upper),
        _ => {}
    }
    if boolean && (raw == "0" || raw == "1") {
        return Some(if raw == "1" { "TRUE".into() } else { "FALSE".into() });
    }
    if raw.parse::<f64>().is_ok() {
        return Some(raw.to_string());
    }
    let quoted = raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'');
    if quoted && !raw[1..raw.len() - 1].replace("''", "").contains('\'') {
        return Some(raw.to_string());
    }
    None
}

/// `CREATE TABLE IF NOT EXISTS` for one local table in the remote `public`
/// schema, with its primary key and foreign keys.
pub fn table_ddl(table: &LocalTable) -> Result<String, AppError> {
    let target = RemoteTable::public(&table.name)?;
    let mut lines = Vec::with_capacity(table.columns.len() + table.foreign_keys.len() + 1);

    for column in &table.columns {
        validate_identifier("column", &column.name)?;
        let mut line = format!("{} {}", quote_ident(&column.name), column_type(&column.decl_type));
        if column.not_null || column.pk_position > 0 {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = default_clause(column) {
            line.push_str(" DEFAULT ");
            line.push_str(&default);
        }
        lines.push(line);
    }

    let pk = table.primary_key();
    if !pk.is_empty() {
        let cols = pk.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>().join(", ");
        lines.push(format!("PRIMARY KEY ({cols})"));
    }

    for fk in &table.foreign_keys {
        validate_identifier("column", &fk.column)?;
        validate_identifier("table", &fk.ref_table)?;
        validate_identifier("column", &fk.ref_column)?;
        lines.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            quote_ident(&fk.column),
            quote_ident(&fk.ref_table),
            quote_ident(&fk.ref_column)
        ));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        target.qualified(),
        lines.join(",\n    ")
    ))
}

/// DDL for every table, parents before children.
pub fn export_ddl(tables: &[LocalTable]) -> Result<Vec<String>, AppError> {
    catalog::sort_by_dependencies(tables).iter().map(table_ddl).collect()
}

pub async fn migrate(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    let tables = catalog::describe_all(&ctx.pool)?;
    let statements = export_ddl(&tables)?;
    let names: Vec<String> = catalog::sort_by_dependencies(&tables)
        .into_iter()
        .map(|t| t.name)
        .collect();

    if !statements.is_empty() {
        let db = ctx.database(migration).await?;
        db.writer().execute_ddl(&statements).await?;
    }

    tracing::debug!(migration_id = %migration.id, tables = names.len(), "Schema replayed");
    Ok(ItemOutcome::new(
        RollbackInfo::Schema { tables: names.clone() },
        serde_json::json!({ "tables": names.len(), "statements": statements.len() }),
    ))
}
