//! In-memory stand-ins for the hosted platform, used by engine and service
//! tests. The relational store is an SQLite connection with `public`, `auth`
//! and `storage` attached as schemas, so generated DDL and DML run as-is.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::Connection;

use super::{
    FunctionDeploy, ManagementApi, OrphanReport, ProjectApi, ProjectKeys, RemoteConnector,
    RemoteDatabase, RemoteForeignKey, RemoteFunction, RemoteInspector, RemoteProject, RemoteTable,
    RemoteWriter, RowSecurityChange, SampleOrder, SecretValue,
};
use crate::db::models::{read_row, SqlRow, SqlValue};
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier};

pub const PROJECT_REF: &str = "fakeproject";

const REMOTE_SCHEMA: &str = r#"
ATTACH DATABASE ':memory:' AS public;
ATTACH DATABASE ':memory:' AS auth;
ATTACH DATABASE ':memory:' AS storage;

CREATE TABLE auth.users (
    id TEXT PRIMARY KEY, aud TEXT, role TEXT, email TEXT, encrypted_password TEXT,
    phone TEXT, email_confirmed_at TEXT, last_sign_in_at TEXT, raw_user_meta_data TEXT,
    is_anonymous BOOLEAN, created_at TEXT, updated_at TEXT
);
CREATE TABLE auth.identities (
    id TEXT PRIMARY KEY, user_id TEXT, provider TEXT, provider_id TEXT,
    identity_data TEXT, last_sign_in_at TEXT, created_at TEXT, updated_at TEXT
);
CREATE TABLE storage.buckets (
    id TEXT PRIMARY KEY, name TEXT, public BOOLEAN, file_size_limit BIGINT,
    allowed_mime_types TEXT, created_at TEXT
);
CREATE TABLE storage.objects (
    id TEXT PRIMARY KEY, bucket_id TEXT, name TEXT, created_at TEXT,
    UNIQUE(bucket_id, name)
);

CREATE TABLE main.row_security (
    schema_name TEXT, table_name TEXT, PRIMARY KEY(schema_name, table_name)
);
CREATE TABLE main.policies (
    schema_name TEXT, table_name TEXT, name TEXT, statement TEXT,
    PRIMARY KEY(schema_name, table_name, name)
);
"#;

fn fake_err(e: impl std::fmt::Display) -> AppError {
    AppError::RemoteDatabase(e.to_string())
}

#[derive(Default)]
struct Platform {
    functions: BTreeMap<String, RemoteFunction>,
    archives: HashMap<String, Vec<u8>>,
    secrets: BTreeMap<String, String>,
    auth_config: serde_json::Map<String, serde_json::Value>,
    objects: HashMap<(String, String), Vec<u8>>,
    /// id -> (email, password)
    users: HashMap<String, (String, String)>,
}

struct FakeState {
    db: Mutex<Connection>,
    platform: Mutex<Platform>,
    failures: Mutex<HashSet<String>>,
    database_opens: Mutex<usize>,
}

/// Shared fake remote. Clones see the same state.
#[derive(Clone)]
pub struct FakeRemote {
    state: Arc<FakeState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeRemote {
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("open fake remote");
        conn.execute_batch(REMOTE_SCHEMA).expect("fake remote schema");
        Self {
            state: Arc::new(FakeState {
                db: Mutex::new(conn),
                platform: Mutex::new(Platform::default()),
                failures: Mutex::new(HashSet::new()),
                database_opens: Mutex::new(0),
            }),
        }
    }

    /// Make the named operation fail from now on, e.g. `"database"`,
    /// `"upload"`, `"deploy"`, `"sign_in"`, `"create_secrets"`.
    pub fn fail(&self, op: &str) {
        lock(&self.state.failures).insert(op.to_string());
    }

    pub fn heal(&self, op: &str) {
        lock(&self.state.failures).remove(op);
    }

    fn check(&self, op: &str) -> Result<(), AppError> {
        if lock(&self.state.failures).contains(op) {
            Err(AppError::Remote(format!("injected failure: {op}")))
        } else {
            Ok(())
        }
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        lock(&self.state.db)
    }

    /// Run arbitrary SQL against the remote store.
    pub fn execute(&self, sql: &str) {
        self.db().execute_batch(sql).expect("fake remote execute");
    }

    /// Like `execute`, with foreign key enforcement off, for seeding rows a
    /// real remote could end up with (e.g. written while constraints were
    /// deferred or disabled).
    pub fn execute_unchecked(&self, sql: &str) {
        let db = self.db();
        db.execute_batch("PRAGMA foreign_keys = OFF;").expect("disable foreign keys");
        let result = db.execute_batch(sql);
        db.execute_batch("PRAGMA foreign_keys = ON;").expect("enable foreign keys");
        result.expect("fake remote execute");
    }

    pub fn query_i64(&self, sql: &str) -> i64 {
        self.db().query_row(sql, [], |r| r.get(0)).expect("fake remote query")
    }

    pub fn database_opens(&self) -> usize {
        *lock(&self.state.database_opens)
    }

    pub fn secret(&self, name: &str) -> Option<String> {
        lock(&self.state.platform).secrets.get(name).cloned()
    }

    pub fn auth_setting(&self, key: &str) -> Option<serde_json::Value> {
        lock(&self.state.platform).auth_config.get(key).cloned()
    }

    pub fn archive(&self, slug: &str) -> Option<Vec<u8>> {
        lock(&self.state.platform).archives.get(slug).cloned()
    }

    pub fn function(&self, slug: &str) -> Option<RemoteFunction> {
        lock(&self.state.platform).functions.get(slug).cloned()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        lock(&self.state.platform)
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn policy_statement(&self, table: &str, name: &str) -> Option<String> {
        self.db()
            .query_row(
                "SELECT statement FROM main.policies WHERE table_name = ?1 AND name = ?2",
                [table, name],
                |r| r.get(0),
            )
            .ok()
    }

    pub fn user_count(&self) -> usize {
        lock(&self.state.platform).users.len()
    }

    /// Drop an object from the remote bucket without touching local state.
    pub fn remove_object_row(&self, bucket: &str, path: &str) {
        self.db()
            .execute(
                "DELETE FROM storage.objects WHERE bucket_id = ?1 AND name = ?2",
                [bucket, path],
            )
            .expect("remove object row");
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector { remote: self.clone() }
    }
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn table_exists(conn: &Connection, table: &RemoteTable) -> Result<bool, AppError> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(&table.schema)
    );
    let n: i64 = conn
        .query_row(&sql, [&table.name], |r| r.get(0))
        .map_err(fake_err)?;
    Ok(n > 0)
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, AppError> {
    let mut stmt = conn.prepare(sql).map_err(fake_err)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| read_row(row, &columns))
        .map_err(fake_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(fake_err)
}

fn table_info(conn: &Connection, table: &RemoteTable) -> Result<Vec<(String, i32)>, AppError> {
    let sql = format!(
        "PRAGMA {}.table_info({})",
        quote_ident(&table.schema),
        quote_ident(&table.name)
    );
    let mut stmt = conn.prepare(&sql).map_err(fake_err)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>("name")?, r.get::<_, i32>("pk")?)))
        .map_err(fake_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(fake_err)
}

// ============================================================================
// Relational store
// ============================================================================

#[async_trait]
impl RemoteWriter for FakeRemote {
    async fn execute_ddl(&self, statements: &[String]) -> Result<(), AppError> {
        let mut conn = self.db();
        let tx = conn.transaction().map_err(fake_err)?;
        for statement in statements {
            tx.execute_batch(statement).map_err(fake_err)?;
        }
        tx.commit().map_err(fake_err)
    }

    async fn insert_rows(
        &self,
        table: &RemoteTable,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, AppError> {
        self.check("insert")?;
        for c in columns {
            validate_identifier("column", c)?;
        }
        let names = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let params = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = format!("INSERT INTO {} ({names}) VALUES ({params})", table.qualified());

        let mut conn = self.db();
        let tx = conn.transaction().map_err(fake_err)?;
        let mut written = 0u64;
        for row in rows {
            written += tx
                .execute(&sql, rusqlite::params_from_iter(row.iter()))
                .map_err(fake_err)? as u64;
        }
        tx.commit().map_err(fake_err)?;
        Ok(written)
    }

    async fn enable_row_security(&self, table: &RemoteTable) -> Result<RowSecurityChange, AppError> {
        self.check("enable_row_security")?;
        let conn = self.db();
        if !table_exists(&conn, table)? {
            return Err(AppError::RemoteDatabase(format!("Table {table} does not exist")));
        }
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO main.row_security (schema_name, table_name) VALUES (?1, ?2)",
                [&table.schema, &table.name],
            )
            .map_err(fake_err)?;
        Ok(if inserted == 1 {
            RowSecurityChange::Enabled
        } else {
            RowSecurityChange::AlreadyEnabled
        })
    }

    async fn create_policy(
        &self,
        table: &RemoteTable,
        policy_name: &str,
        statement: &str,
    ) -> Result<(), AppError> {
        self.db()
            .execute(
                "INSERT OR REPLACE INTO main.policies (schema_name, table_name, name, statement)
                 VALUES (?1, ?2, ?3, ?4)",
                [&table.schema, &table.name, policy_name, statement],
            )
            .map_err(fake_err)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteInspector for FakeRemote {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, AppError> {
        validate_identifier("schema", schema)?;
        let conn = self.db();
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' ORDER BY name",
            quote_ident(schema)
        );
        let mut stmt = conn.prepare(&sql).map_err(fake_err)?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0)).map_err(fake_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(fake_err)
    }

    async fn column_names(&self, table: &RemoteTable) -> Result<Vec<String>, AppError> {
        Ok(table_info(&self.db(), table)?.into_iter().map(|(n, _)| n).collect())
    }

    async fn primary_key_columns(&self, table: &RemoteTable) -> Result<Vec<String>, AppError> {
        let mut pk: Vec<(String, i32)> = table_info(&self.db(), table)?
            .into_iter()
            .filter(|(_, p)| *p > 0)
            .collect();
        pk.sort_by_key(|(_, p)| *p);
        Ok(pk.into_iter().map(|(n, _)| n).collect())
    }

    async fn row_security_enabled(&self, table: &RemoteTable) -> Result<bool, AppError> {
        let conn = self.db();
        if !table_exists(&conn, table)? {
            return Err(AppError::RemoteDatabase(format!("Table {table} does not exist")));
        }
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM main.row_security WHERE schema_name = ?1 AND table_name = ?2",
                [&table.schema, &table.name],
                |r| r.get(0),
            )
            .map_err(fake_err)?;
        Ok(n > 0)
    }

    async fn list_bucket_ids(&self) -> Result<Vec<String>, AppError> {
        let conn = self.db();
        let mut stmt = conn.prepare("SELECT id FROM storage.buckets ORDER BY id").map_err(fake_err)?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0)).map_err(fake_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(fake_err)
    }

    async fn count_rows(&self, table: &RemoteTable) -> Result<i64, AppError> {
        self.db()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table.qualified()), [], |r| r.get(0))
            .map_err(fake_err)
    }

    async fn count_bucket_objects(&self, bucket_id: &str) -> Result<i64, AppError> {
        self.db()
            .query_row(
                "SELECT COUNT(*) FROM storage.objects WHERE bucket_id = ?1",
                [bucket_id],
                |r| r.get(0),
            )
            .map_err(fake_err)
    }

    async fn sample_rows(
        &self,
        table: &RemoteTable,
        order_column: &str,
        order: SampleOrder,
        limit: u32,
    ) -> Result<Vec<SqlRow>, AppError> {
        validate_identifier("column", order_column)?;
        let order_by = match order {
            SampleOrder::First => format!("{} ASC", quote_ident(order_column)),
            SampleOrder::Last => format!("{} DESC", quote_ident(order_column)),
            SampleOrder::Random => "RANDOM()".to_string(),
        };
        let sql = format!("SELECT * FROM {} ORDER BY {order_by} LIMIT ?1", table.qualified());
        query_rows(&self.db(), &sql, &[SqlValue::Integer(i64::from(limit))])
    }

    async fn rows_by_keys(
        &self,
        table: &RemoteTable,
        key_column: &str,
        keys: &[SqlValue],
    ) -> Result<Vec<SqlRow>, AppError> {
        validate_identifier("column", key_column)?;
        let keys: Vec<SqlValue> = keys
            .iter()
            .filter_map(SqlValue::to_param_text)
            .map(SqlValue::Text)
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=keys.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE CAST({} AS TEXT) IN ({placeholders})",
            table.qualified(),
            quote_ident(key_column)
        );
        query_rows(&self.db(), &sql, &keys)
    }

    async fn foreign_keys(&self, schema: &str) -> Result<Vec<RemoteForeignKey>, AppError> {
        let tables = self.list_tables(schema).await?;
        let conn = self.db();
        let mut out = Vec::new();
        for table in tables {
            let sql = format!(
                "PRAGMA {}.foreign_key_list({})",
                quote_ident(schema),
                quote_ident(&table)
            );
            let mut stmt = conn.prepare(&sql).map_err(fake_err)?;
            let fks = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>("from")?,
                        r.get::<_, String>("table")?,
                        r.get::<_, Option<String>>("to")?,
                    ))
                })
                .map_err(fake_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(fake_err)?;
            for (column, ref_table, ref_column) in fks {
                let ref_column = match ref_column {
                    Some(c) => c,
                    None => table_info(&conn, &RemoteTable::new(schema, &ref_table)?)?
                        .into_iter()
                        .find(|(_, pk)| *pk == 1)
                        .map(|(n, _)| n)
                        .unwrap_or_else(|| "id".to_string()),
                };
                out.push(RemoteForeignKey {
                    constraint_name: format!("{table}_{column}_fkey"),
                    schema: schema.to_string(),
                    table: table.clone(),
                    column,
                    ref_schema: schema.to_string(),
                    ref_table,
                    ref_column,
                });
            }
        }
        Ok(out)
    }

    async fn orphaned_references(
        &self,
        fk: &RemoteForeignKey,
        limit: u32,
    ) -> Result<OrphanReport, AppError> {
        let child = RemoteTable::new(&fk.schema, &fk.table)?;
        let parent = RemoteTable::new(&fk.ref_schema, &fk.ref_table)?;
        let filter = format!(
            "FROM {} c WHERE c.{col} IS NOT NULL AND NOT EXISTS (SELECT 1 FROM {} p WHERE p.{} = c.{col})",
            child.qualified(),
            parent.qualified(),
            quote_ident(&fk.ref_column),
            col = quote_ident(&fk.column),
        );
        let conn = self.db();
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) {filter}"), [], |r| r.get(0))
            .map_err(fake_err)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT CAST(c.{} AS TEXT) {filter} LIMIT ?1",
                quote_ident(&fk.column)
            ))
            .map_err(fake_err)?;
        let samples = stmt
            .query_map([i64::from(limit)], |r| r.get::<_, String>(0))
            .map_err(fake_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(fake_err)?;
        Ok(OrphanReport { count, samples })
    }

    async fn probe_select(&self, table: &RemoteTable, limit: u32) -> Result<usize, AppError> {
        self.check("query")?;
        let sql = format!("SELECT * FROM {} LIMIT ?1", table.qualified());
        Ok(query_rows(&self.db(), &sql, &[SqlValue::Integer(i64::from(limit))])?.len())
    }
}

// ============================================================================
// Platform APIs
// ============================================================================

#[async_trait]
impl ManagementApi for FakeRemote {
    async fn list_projects(&self) -> Result<Vec<RemoteProject>, AppError> {
        self.check("management")?;
        Ok(vec![RemoteProject {
            id: PROJECT_REF.into(),
            reference: Some(PROJECT_REF.into()),
            name: "Fake project".into(),
            region: Some("local".into()),
            status: Some("ACTIVE_HEALTHY".into()),
        }])
    }

    async fn project_keys(&self, _project_ref: &str) -> Result<ProjectKeys, AppError> {
        self.check("management")?;
        Ok(ProjectKeys {
            anon_key: "fake-anon".into(),
            service_role_key: "fake-service".into(),
        })
    }

    async fn list_functions(&self, _project_ref: &str) -> Result<Vec<RemoteFunction>, AppError> {
        self.check("management")?;
        Ok(lock(&self.state.platform).functions.values().cloned().collect())
    }

    async fn deploy_function(
        &self,
        _project_ref: &str,
        deploy: &FunctionDeploy,
    ) -> Result<RemoteFunction, AppError> {
        self.check("deploy")?;
        let function = RemoteFunction {
            slug: deploy.slug.clone(),
            name: Some(deploy.slug.clone()),
            status: Some("ACTIVE".into()),
            verify_jwt: Some(deploy.verify_jwt),
        };
        let mut platform = lock(&self.state.platform);
        platform.functions.insert(deploy.slug.clone(), function.clone());
        platform.archives.insert(deploy.slug.clone(), deploy.archive.clone());
        Ok(function)
    }

    async fn list_secret_names(&self, _project_ref: &str) -> Result<Vec<String>, AppError> {
        self.check("management")?;
        Ok(lock(&self.state.platform).secrets.keys().cloned().collect())
    }

    async fn create_secrets(&self, _project_ref: &str, secrets: &[SecretValue]) -> Result<(), AppError> {
        self.check("create_secrets")?;
        let mut platform = lock(&self.state.platform);
        for s in secrets {
            platform.secrets.insert(s.name.clone(), s.value.clone());
        }
        Ok(())
    }

    async fn get_auth_config(&self, _project_ref: &str) -> Result<serde_json::Value, AppError> {
        self.check("management")?;
        Ok(serde_json::Value::Object(lock(&self.state.platform).auth_config.clone()))
    }

    async fn patch_auth_config(
        &self,
        _project_ref: &str,
        patch: &serde_json::Value,
    ) -> Result<(), AppError> {
        self.check("patch_auth")?;
        let serde_json::Value::Object(map) = patch else {
            return Err(AppError::Remote("auth config patch must be an object".into()));
        };
        let mut platform = lock(&self.state.platform);
        for (k, v) in map {
            platform.auth_config.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectApi for FakeRemote {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), AppError> {
        self.check("upload")?;
        {
            let conn = self.db();
            let exists: i64 = conn
                .query_row("SELECT COUNT(*) FROM storage.buckets WHERE id = ?1", [bucket], |r| r.get(0))
                .map_err(fake_err)?;
            if exists == 0 {
                return Err(AppError::Remote(format!("Bucket not found: {bucket}")));
            }
            conn.execute(
                "INSERT OR REPLACE INTO storage.objects (id, bucket_id, name, created_at)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                [&uuid::Uuid::new_v4().to_string(), bucket, path],
            )
            .map_err(fake_err)?;
        }
        lock(&self.state.platform)
            .objects
            .insert((bucket.to_string(), path.to_string()), bytes);
        Ok(())
    }

    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, AppError> {
        self.check("download")?;
        self.object(bucket, path)
            .ok_or_else(|| AppError::Remote(format!("Object not found: {bucket}/{path}")))
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> Result<(), AppError> {
        self.check("delete_object")?;
        self.remove_object_row(bucket, path);
        lock(&self.state.platform)
            .objects
            .remove(&(bucket.to_string(), path.to_string()));
        Ok(())
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<String, AppError> {
        self.check("create_user")?;
        let id = uuid::Uuid::new_v4().to_string();
        lock(&self.state.platform)
            .users
            .insert(id.clone(), (email.to_string(), password.to_string()));
        Ok(id)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), AppError> {
        self.check("delete_user")?;
        lock(&self.state.platform).users.remove(user_id);
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<String, AppError> {
        self.check("sign_in")?;
        let platform = lock(&self.state.platform);
        platform
            .users
            .iter()
            .find(|(_, (e, p))| e == email && p == password)
            .map(|(id, _)| format!("fake-jwt-{id}"))
            .ok_or_else(|| AppError::Remote("Invalid login credentials".into()))
    }

    async fn invoke_function(&self, name: &str, _payload: &serde_json::Value) -> Result<u16, AppError> {
        self.check("invoke")?;
        Ok(if lock(&self.state.platform).functions.contains_key(name) {
            200
        } else {
            404
        })
    }
}

// ============================================================================
// Connector
// ============================================================================

pub struct FakeConnector {
    remote: FakeRemote,
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    fn management(&self, _access_token: &str) -> Result<Box<dyn ManagementApi>, AppError> {
        Ok(Box::new(self.remote.clone()))
    }

    async fn project(
        &self,
        management: &dyn ManagementApi,
        project_ref: &str,
    ) -> Result<Box<dyn ProjectApi>, AppError> {
        management.project_keys(project_ref).await?;
        Ok(Box::new(self.remote.clone()))
    }

    async fn database(
        &self,
        _project_ref: &str,
        _password: &str,
    ) -> Result<Box<dyn RemoteDatabase>, AppError> {
        self.remote.check("database")?;
        *lock(&self.remote.state.database_opens) += 1;
        Ok(Box::new(self.remote.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_store_round_trip() {
        let remote = FakeRemote::new();
        remote
            .execute_ddl(&["CREATE TABLE IF NOT EXISTS \"public\".\"t\" (\"id\" BIGINT NOT NULL, PRIMARY KEY (\"id\"))".into()])
            .await
            .unwrap();
        let table = RemoteTable::public("t").unwrap();
        let n = remote
            .insert_rows(&table, &["id".into()], &[vec![SqlValue::Integer(1)], vec![SqlValue::Integer(2)]])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(remote.count_rows(&table).await.unwrap(), 2);
        assert_eq!(remote.primary_key_columns(&table).await.unwrap(), vec!["id"]);
        assert_eq!(remote.list_tables("public").await.unwrap(), vec!["t"]);
        assert_eq!(
            remote.enable_row_security(&table).await.unwrap(),
            RowSecurityChange::Enabled
        );
        assert_eq!(
            remote.enable_row_security(&table).await.unwrap(),
            RowSecurityChange::AlreadyEnabled
        );
        let found = remote
            .rows_by_keys(&table, "id", &[SqlValue::Integer(2)])
            .await
            .unwrap();
        assert_eq!(found, vec![vec![("id".to_string(), SqlValue::Integer(2))]]);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back() {
        let remote = FakeRemote::new();
        remote.execute("CREATE TABLE public.t (id INTEGER PRIMARY KEY)");
        let table = RemoteTable::public("t").unwrap();
        let result = remote
            .insert_rows(&table, &["id".into()], &[vec![SqlValue::Integer(1)], vec![SqlValue::Integer(1)]])
            .await;
        assert!(result.is_err());
        assert_eq!(remote.query_i64("SELECT COUNT(*) FROM public.t"), 0);
    }
}
