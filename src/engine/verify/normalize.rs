//! Value normalization for cross-engine comparison. SQLite and Postgres hand
//! back the same data in different shapes; after normalization equal data
//! compares equal.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::db::models::{SqlRow, SqlValue};

/// Largest magnitude a float can hold while still naming an exact integer.
const EXACT_FLOAT_LIMIT: f64 = 9_007_199_254_740_992.0;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Normalize one value. Idempotent: `normalize(&normalize(v)) == normalize(v)`.
pub fn normalize(value: &SqlValue) -> SqlValue {
    match value {
        SqlValue::Null => SqlValue::Null,
        SqlValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        SqlValue::Integer(i) => SqlValue::Integer(*i),
        SqlValue::Real(f) => {
            if f.is_finite() && f.fract() == 0.0 && f.abs() <= EXACT_FLOAT_LIMIT {
                SqlValue::Integer(*f as i64)
            } else {
                SqlValue::Real(*f)
            }
        }
        SqlValue::Blob(b) => SqlValue::Text(format!("\\x{}", hex::encode(b))),
        SqlValue::Text(s) => SqlValue::Text(normalize_text(s)),
    }
}

pub fn normalize_row(row: &SqlRow) -> SqlRow {
    row.iter().map(|(c, v)| (c.clone(), normalize(v))).collect()
}

fn normalize_text(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
            if json.is_object() || json.is_array() {
                return canonical_json(&json).to_string();
            }
        }
    }
    if let Some(instant) = parse_instant(trimmed) {
        return instant.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    }
    s.to_string()
}

/// Timestamps with an offset are converted to UTC; ones without are taken
/// as UTC already.
fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    // cheap reject before trying every format
    if s.len() < 19 || !s.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|naive| naive.and_utc())
}

/// Objects with keys sorted, recursively, so `jsonb` reordering does not
/// register as a difference.
fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// Equality after normalization.
pub fn values_match(a: &SqlValue, b: &SqlValue) -> bool {
    normalize(a) == normalize(b)
}
