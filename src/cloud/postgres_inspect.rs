//! Read-only introspection of the remote store for the verification layers.
//!
//! Shares only the connection with the write path in `postgres`; every query
//! here reads the catalog or the data directly.

use async_trait::async_trait;
use sqlx::Row;

use super::postgres::{db_err, PgStore};
use super::{OrphanReport, RemoteForeignKey, RemoteInspector, RemoteTable, SampleOrder};
use crate::db::models::{SqlRow, SqlValue};
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier};

/// Parse one `row_to_json(t)::text` value into ordered column/value pairs.
pub(crate) fn json_to_row(text: &str) -> Result<SqlRow, AppError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match value {
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), SqlValue::from_json(v)))
            .collect()),
        other => Err(AppError::RemoteDatabase(format!(
            "Expected a JSON object row, got {other}"
        ))),
    }
}

fn sample_sql(table: &RemoteTable, order_column: &str, order: SampleOrder) -> String {
    let order_by = match order {
        SampleOrder::First => format!("{} ASC", quote_ident(order_column)),
        SampleOrder::Last => format!("{} DESC", quote_ident(order_column)),
        SampleOrder::Random => "random()".to_string(),
    };
    format!(
        "SELECT row_to_json(t)::text FROM (SELECT * FROM {} ORDER BY {order_by} LIMIT $1) t",
        table.qualified()
    )
}

impl PgStore {
    async fn json_rows(&self, sql: &str, limit: i64) -> Result<Vec<SqlRow>, AppError> {
        let texts: Vec<String> = sqlx::query_scalar(sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("sample rows", e))?;
        texts.iter().map(|t| json_to_row(t)).collect()
    }
}

#[async_trait]
impl RemoteInspector for PgStore {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list tables", e))
    }

    async fn column_names(&self, table: &RemoteTable) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list columns", e))
    }

    async fn primary_key_columns(&self, table: &RemoteTable) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar(
            "SELECT a.attname::text
             FROM pg_index i
             JOIN pg_class c ON c.oid = i.indrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
             WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("read primary key", e))
    }

    async fn row_security_enabled(&self, table: &RemoteTable) -> Result<bool, AppError> {
        let enabled: Option<bool> = sqlx::query_scalar(
            "SELECT c.relrowsecurity
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1 AND c.relname = $2",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("read row security flag", e))?;
        enabled.ok_or_else(|| AppError::RemoteDatabase(format!("Table {table} does not exist")))
    }

    async fn list_bucket_ids(&self) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar("SELECT id::text FROM storage.buckets ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("list buckets", e))
    }

    async fn count_rows(&self, table: &RemoteTable) -> Result<i64, AppError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.qualified());
        sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err(&format!("count rows of {table}"), e))
    }

    async fn count_bucket_objects(&self, bucket_id: &str) -> Result<i64, AppError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM storage.objects WHERE bucket_id = $1")
            .bind(bucket_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("count bucket objects", e))
    }

    async fn sample_rows(
        &self,
        table: &RemoteTable,
        order_column: &str,
        order: SampleOrder,
        limit: u32,
    ) -> Result<Vec<SqlRow>, AppError> {
        validate_identifier("column", order_column)?;
        self.json_rows(&sample_sql(table, order_column, order), i64::from(limit))
            .await
    }

    async fn rows_by_keys(
        &self,
        table: &RemoteTable,
        key_column: &str,
        keys: &[SqlValue],
    ) -> Result<Vec<SqlRow>, AppError> {
        validate_identifier("column", key_column)?;
        let keys: Vec<String> = keys.iter().filter_map(SqlValue::to_param_text).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT row_to_json(t)::text FROM {} t WHERE t.{}::text = ANY($1)",
            table.qualified(),
            quote_ident(key_column)
        );
        let texts: Vec<String> = sqlx::query_scalar(&sql)
            .bind(&keys)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("look up rows by key", e))?;
        texts.iter().map(|t| json_to_row(t)).collect()
    }

    async fn foreign_keys(&self, schema: &str) -> Result<Vec<RemoteForeignKey>, AppError> {
        let rows = sqlx::query(
            "SELECT tc.constraint_name::text AS constraint_name,
                    kcu.table_schema::text    AS schema,
                    kcu.table_name::text      AS table_name,
                    kcu.column_name::text     AS column_name,
                    ccu.table_schema::text    AS ref_schema,
                    ccu.table_name::text      AS ref_table,
                    ccu.column_name::text     AS ref_column
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
               ON tc.constraint_name = kcu.constraint_name
              AND tc.table_schema = kcu.table_schema
             JOIN information_schema.constraint_column_usage ccu
               ON ccu.constraint_name = tc.constraint_name
              AND ccu.constraint_schema = tc.table_schema
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1
             ORDER BY tc.constraint_name, kcu.ordinal_position",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("list foreign keys", e))?;

        rows.iter()
            .map(|row| {
                let get = |col: &str| -> Result<String, AppError> {
                    row.try_get::<String, _>(col).map_err(|e| db_err(col, e))
                };
                Ok(RemoteForeignKey {
                    constraint_name: get("constraint_name")?,
                    schema: get("schema")?,
                    table: get("table_name")?,
                    column: get("column_name")?,
                    ref_schema: get("ref_schema")?,
                    ref_table: get("ref_table")?,
                    ref_column: get("ref_column")?,
                })
            })
            .collect()
    }

    async fn orphaned_references(
        &self,
        fk: &RemoteForeignKey,
        limit: u32,
    ) -> Result<OrphanReport, AppError> {
        let child = RemoteTable::new(&fk.schema, &fk.table)?;
        let parent = RemoteTable::new(&fk.ref_schema, &fk.ref_table)?;
        validate_identifier("column", &fk.column)?;
        validate_identifier("column", &fk.ref_column)?;

        let orphan_filter = format!(
            "FROM {child} c WHERE c.{col} IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM {parent} p WHERE p.{ref_col} = c.{col})",
            child = child.qualified(),
            parent = parent.qualified(),
            col = quote_ident(&fk.column),
            ref_col = quote_ident(&fk.ref_column),
        );

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {orphan_filter}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err(&format!("count orphans for {}", fk.constraint_name), e))?;

        let samples: Vec<String> = if count > 0 {
            sqlx::query_scalar(&format!(
                "SELECT DISTINCT c.{}::text {orphan_filter} LIMIT $1",
                quote_ident(&fk.column)
            ))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(&format!("sample orphans for {}", fk.constraint_name), e))?
        } else {
            Vec::new()
        };

        Ok(OrphanReport { count, samples })
    }

    async fn probe_select(&self, table: &RemoteTable, limit: u32) -> Result<usize, AppError> {
        let sql = format!("SELECT * FROM {} LIMIT $1", table.qualified());
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(&format!("query {table}"), e))?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_row_keeps_column_order() {
        let row = json_to_row(r#"{"id":2,"title":"eggs","done":true,"meta":{"b":1}}"#).unwrap();
        let names: Vec<&str> = row.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "done", "meta"]);
        assert_eq!(row[0].1, SqlValue::Integer(2));
        assert_eq!(row[2].1, SqlValue::Bool(true));
        assert_eq!(row[3].1, SqlValue::Text("{\"b\":1}".into()));
        assert!(json_to_row("[1,2]").is_err());
    }

    #[test]
    fn test_sample_sql() {
        let t = RemoteTable::public("todos").unwrap();
        assert!(sample_sql(&t, "id", SampleOrder::Last).contains("ORDER BY \"id\" DESC LIMIT $1"));
        assert!(sample_sql(&t, "id", SampleOrder::Random).contains("ORDER BY random()"));
    }
}
