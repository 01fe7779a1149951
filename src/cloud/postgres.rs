use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};

use super::{RemoteTable, RemoteWriter, RowSecurityChange};
use crate::config::RemoteConfig;
use crate::db::models::SqlValue;
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier};

/// Wrap a sqlx error with what was being attempted. Connection strings are
/// never part of the message.
pub(crate) fn db_err(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::RemoteDatabase(format!("{context}: {e}"))
}

/// Short-lived connection to one project's Postgres.
///
/// Built per operation and dropped afterwards. Writes live here; the
/// read-only introspection used by verification is in `postgres_inspect`.
#[derive(Clone)]
pub struct PgStore {
    pub(crate) pool: PgPool,
}

impl PgStore {
    #[tracing::instrument(level = "debug", skip(config, password))]
    pub async fn connect(config: &RemoteConfig, project_ref: &str, password: &str) -> Result<Self, AppError> {
        let options = PgConnectOptions::new()
            .host(&config.db_host(project_ref))
            .port(config.db_port)
            .username(&config.db_user)
            .password(password)
            .database(&config.db_name)
            .ssl_mode(PgSslMode::Require)
            .options([(
                "statement_timeout",
                format!("{}s", config.query_timeout_secs),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| db_err("connect to remote database", e))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `udt` type of each column, used to cast text parameters server-side.
    async fn column_types(&self, table: &RemoteTable) -> Result<HashMap<String, String>, AppError> {
        let rows = sqlx::query(
            "SELECT column_name, udt_schema, udt_name
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("read column types", e))?;

        let mut types = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("column_name").map_err(|e| db_err("column_name", e))?;
            let udt_schema: String = row.try_get("udt_schema").map_err(|e| db_err("udt_schema", e))?;
            let udt_name: String = row.try_get("udt_name").map_err(|e| db_err("udt_name", e))?;
            types.insert(name, format!("{}.{}", quote_type(&udt_schema), quote_type(&udt_name)));
        }
        Ok(types)
    }
}

/// Quote a type name read from the catalog, doubling embedded quotes.
fn quote_type(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `INSERT INTO t ("a", "b") VALUES ($1::text::type_a, $2::text::type_b)`
pub(crate) fn build_insert(
    table: &RemoteTable,
    columns: &[String],
    types: &HashMap<String, String>,
) -> Result<String, AppError> {
    let mut names = Vec::with_capacity(columns.len());
    let mut params = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        validate_identifier("column", column)?;
        let ty = types.get(column).ok_or_else(|| {
            AppError::RemoteDatabase(format!("Column {column} does not exist on {table}"))
        })?;
        names.push(quote_ident(column));
        params.push(format!("${}::text::{ty}", idx + 1));
    }
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.qualified(),
        names.join(", "),
        params.join(", ")
    ))
}

#[async_trait]
impl RemoteWriter for PgStore {
    async fn execute_ddl(&self, statements: &[String]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| db_err("begin", e))?;
        for (idx, statement) in statements.iter().enumerate() {
            sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(statement))
                .await
                .map_err(|e| db_err(&format!("statement {}", idx + 1), e))?;
        }
        tx.commit().await.map_err(|e| db_err("commit", e))?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &RemoteTable,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let types = self.column_types(table).await?;
        let sql = build_insert(table, columns, &types)?;

        let mut tx = self.pool.begin().await.map_err(|e| db_err("begin", e))?;
        let mut written = 0u64;
        for (idx, row) in rows.iter().enumerate() {
            let mut query = sqlx::query(&sql);
            for value in row {
                query = query.bind(value.to_param_text());
            }
            let result = query
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err(&format!("insert row {} into {table}", idx + 1), e))?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(|e| db_err("commit", e))?;
        Ok(written)
    }

    async fn enable_row_security(&self, table: &RemoteTable) -> Result<RowSecurityChange, AppError> {
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

        match enabled {
            None => Err(AppError::RemoteDatabase(format!("Table {table} does not exist"))),
            Some(true) => Ok(RowSecurityChange::AlreadyEnabled),
            Some(false) => {
                let sql = format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY", table.qualified());
                sqlx::raw_sql(&sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| db_err(&format!("enable row security on {table}"), e))?;
                Ok(RowSecurityChange::Enabled)
            }
        }
    }

    async fn create_policy(
        &self,
        table: &RemoteTable,
        policy_name: &str,
        statement: &str,
    ) -> Result<(), AppError> {
        validate_identifier("policy", policy_name)?;
        let drop = format!(
            "DROP POLICY IF EXISTS {} ON {}",
            quote_ident(policy_name),
            table.qualified()
        );

        let mut tx = self.pool.begin().await.map_err(|e| db_err("begin", e))?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&drop))
            .await
            .map_err(|e| db_err(&format!("drop policy {policy_name}"), e))?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(statement))
            .await
            .map_err(|e| db_err(&format!("create policy {policy_name}"), e))?;
        tx.commit().await.map_err(|e| db_err("commit", e))?;
        Ok(())
    }
}
