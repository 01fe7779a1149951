//! Row sampling on the local side and sample comparison.
//!
//! Local reads here go straight to SQLite rather than through the catalog
//! repo the data migrator uses.

use serde::Serialize;

use crate::cloud::SampleOrder;
use crate::db::models::{read_row, SqlRow, SqlValue};
use crate::db::DbPool;
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier};

use super::normalize::{normalize, normalize_row};

/// Column to order samples by: the first primary-key column, else the first
/// declared column, else whatever the engine reports first.
pub fn order_column(primary_key: &[String], declared: &[String], reported: &[String]) -> Option<String> {
    primary_key
        .first()
        .or_else(|| declared.first())
        .or_else(|| reported.first())
        .cloned()
}

fn query(pool: &DbPool, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| read_row(row, &columns))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn local_count(pool: &DbPool, table: &str) -> Result<i64, AppError> {
    validate_identifier("table", table)?;
    let conn = pool.get()?;
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| row.get(0))?)
}

pub fn local_sample(
    pool: &DbPool,
    table: &str,
    order_column: &str,
    order: SampleOrder,
    limit: u32,
) -> Result<Vec<SqlRow>, AppError> {
    validate_identifier("table", table)?;
    validate_identifier("column", order_column)?;
    let order_by = match order {
        SampleOrder::First => format!("{} ASC", quote_ident(order_column)),
        SampleOrder::Last => format!("{} DESC", quote_ident(order_column)),
        SampleOrder::Random => "RANDOM()".to_string(),
    };
    let sql = format!("SELECT * FROM {} ORDER BY {order_by} LIMIT ?1", quote_ident(table));
    query(pool, &sql, &[SqlValue::Integer(i64::from(limit))])
}

/// Local rows whose key column, compared as text, is one of `keys`.
pub fn local_rows_by_keys(
    pool: &DbPool,
    table: &str,
    key_column: &str,
    keys: &[SqlValue],
) -> Result<Vec<SqlRow>, AppError> {
    validate_identifier("table", table)?;
    validate_identifier("column", key_column)?;
    let keys: Vec<SqlValue> = keys
        .iter()
        .filter_map(key_text)
        .map(SqlValue::Text)
        .collect();
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=keys.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT * FROM {} WHERE CAST({} AS TEXT) IN ({placeholders})",
        quote_ident(table),
        quote_ident(key_column)
    );
    query(pool, &sql, &keys)
}

/// Text form of a key as both engines print it.
pub fn key_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(s) => Some(s.clone()),
        other => normalize(other).to_param_text(),
    }
}

/// Keys of `rows` in `key_column`, for looking the same rows up elsewhere.
pub fn keys_of(rows: &[SqlRow], key_column: &str) -> Vec<SqlValue> {
    rows.iter()
        .filter_map(|row| row.iter().find(|(c, _)| c == key_column).map(|(_, v)| v.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDiff {
    pub column: String,
    pub expected: serde_json::Value,
    pub actual: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleMismatch {
    /// No counterpart row shares any value with this one.
    Missing { key: serde_json::Value },
    /// The closest counterpart differs in these columns.
    Different { key: serde_json::Value, columns: Vec<ColumnDiff> },
}

fn value_of<'a>(row: &'a SqlRow, column: &str) -> Option<&'a SqlValue> {
    row.iter().find(|(c, _)| c == column).map(|(_, v)| v)
}

/// Compare each row of `expected` against `actual`. A row matches when
/// every one of its columns equals the same column of some `actual` row
/// after normalization.
pub fn compare_samples(expected: &[SqlRow], actual: &[SqlRow], key_column: &str) -> Vec<SampleMismatch> {
    let actual: Vec<SqlRow> = actual.iter().map(normalize_row).collect();
    let mut mismatches = Vec::new();

    for row in expected {
        let row = normalize_row(row);
        let shared = |other: &SqlRow| {
            row.iter()
                .filter(|(c, v)| value_of(other, c) == Some(v))
                .count()
        };
        if actual.iter().any(|other| shared(other) == row.len()) {
            continue;
        }

        let key = value_of(&row, key_column)
            .map(SqlValue::to_json)
            .unwrap_or(serde_json::Value::Null);
        let best = actual
            .iter()
            .map(|other| (shared(other), other))
            .filter(|(n, _)| *n > 0)
            .max_by_key(|(n, _)| *n);

        match best {
            Some((_, other)) => {
                let columns = row
                    .iter()
                    .filter(|(c, v)| value_of(other, c) != Some(v))
                    .map(|(c, v)| ColumnDiff {
                        column: c.clone(),
                        expected: v.to_json(),
                        actual: value_of(other, c)
                            .map(SqlValue::to_json)
                            .unwrap_or(serde_json::Value::Null),
                    })
                    .collect();
                mismatches.push(SampleMismatch::Different { key, columns });
            }
            None => mismatches.push(SampleMismatch::Missing { key }),
        }
    }
    mismatches
}
