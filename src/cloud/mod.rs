//! Remote collaborators: the hosted platform's HTTP APIs and its Postgres
//! store. Everything the engine touches remotely goes through the traits
//! below so a fresh set of clients can be built per operation from
//! decrypted credentials.

pub mod client;
pub mod connector;
pub mod postgres;
pub mod postgres_inspect;
#[cfg(test)]
pub mod testing;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::{SqlRow, SqlValue};
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier};

pub use client::{ManagementClient, ProjectClient};
pub use connector::HttpConnector;

// ============================================================================
// Platform types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProject {
    pub id: String,
    /// Project reference, used in every project-scoped path. Older API
    /// versions only send `id`, which carries the same value.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl RemoteProject {
    pub fn project_ref(&self) -> &str {
        self.reference.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Clone, Deserialize)]
pub struct ApiKey {
    pub name: String,
    pub api_key: String,
}

/// Keys for the project-level APIs. Never logged.
#[derive(Clone)]
pub struct ProjectKeys {
    pub anon_key: String,
    pub service_role_key: String,
}

impl fmt::Debug for ProjectKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProjectKeys { .. }")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFunction {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub verify_jwt: Option<bool>,
}

/// A packaged function ready to deploy.
#[derive(Debug, Clone)]
pub struct FunctionDeploy {
    pub slug: String,
    pub entrypoint: String,
    pub verify_jwt: bool,
    /// Zip archive of the function's source directory.
    pub archive: Vec<u8>,
}

/// A decrypted secret on its way to the remote side.
#[derive(Clone, Serialize)]
pub struct SecretValue {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue").field("name", &self.name).finish_non_exhaustive()
    }
}

// ============================================================================
// Platform traits
// ============================================================================

/// Account-level management API, authenticated with the access token.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<RemoteProject>, AppError>;
    async fn project_keys(&self, project_ref: &str) -> Result<ProjectKeys, AppError>;
    async fn list_functions(&self, project_ref: &str) -> Result<Vec<RemoteFunction>, AppError>;
    async fn deploy_function(
        &self,
        project_ref: &str,
        deploy: &FunctionDeploy,
    ) -> Result<RemoteFunction, AppError>;
    /// Names only. Values are never read back.
    async fn list_secret_names(&self, project_ref: &str) -> Result<Vec<String>, AppError>;
    async fn create_secrets(&self, project_ref: &str, secrets: &[SecretValue]) -> Result<(), AppError>;
    async fn get_auth_config(&self, project_ref: &str) -> Result<serde_json::Value, AppError>;
    async fn patch_auth_config(
        &self,
        project_ref: &str,
        patch: &serde_json::Value,
    ) -> Result<(), AppError>;
}

/// Project-level storage, admin-auth and function APIs.
#[async_trait]
pub trait ProjectApi: Send + Sync {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), AppError>;
    async fn download_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, AppError>;
    async fn delete_object(&self, bucket: &str, path: &str) -> Result<(), AppError>;
    /// Create a confirmed account, returning its id.
    async fn create_user(&self, email: &str, password: &str) -> Result<String, AppError>;
    async fn delete_user(&self, user_id: &str) -> Result<(), AppError>;
    /// Password-grant sign in, returning the access token.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<String, AppError>;
    /// POST `payload` to a deployed function, returning the HTTP status.
    async fn invoke_function(&self, name: &str, payload: &serde_json::Value) -> Result<u16, AppError>;
}

// ============================================================================
// Remote relational store
// ============================================================================

/// A schema-qualified remote table. Both parts are validated identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTable {
    pub schema: String,
    pub name: String,
}

impl RemoteTable {
    pub fn new(schema: &str, name: &str) -> Result<Self, AppError> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", name)?;
        Ok(Self {
            schema: schema.to_string(),
            name: name.to_string(),
        })
    }

    pub fn public(name: &str) -> Result<Self, AppError> {
        Self::new("public", name)
    }

    pub fn auth(name: &str) -> Result<Self, AppError> {
        Self::new("auth", name)
    }

    pub fn storage(name: &str) -> Result<Self, AppError> {
        Self::new("storage", name)
    }

    /// `"schema"."name"`
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for RemoteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSecurityChange {
    Enabled,
    AlreadyEnabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrder {
    First,
    Last,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteForeignKey {
    pub constraint_name: String,
    pub schema: String,
    pub table: String,
    pub column: String,
    pub ref_schema: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanReport {
    pub count: i64,
    /// Up to the requested limit of orphaned values, as text.
    pub samples: Vec<String>,
}

/// Write side, used only by the item migrators.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    /// Run statements in order inside one transaction.
    async fn execute_ddl(&self, statements: &[String]) -> Result<(), AppError>;
    /// Insert every row inside one transaction; any failure rolls back all
    /// of them. Returns the number of rows written.
    async fn insert_rows(
        &self,
        table: &RemoteTable,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, AppError>;
    async fn enable_row_security(&self, table: &RemoteTable) -> Result<RowSecurityChange, AppError>;
    /// Replace any same-named policy on `table` with `statement`.
    async fn create_policy(
        &self,
        table: &RemoteTable,
        policy_name: &str,
        statement: &str,
    ) -> Result<(), AppError>;
}

/// Read side, used only by the verification layers.
#[async_trait]
pub trait RemoteInspector: Send + Sync {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, AppError>;
    async fn column_names(&self, table: &RemoteTable) -> Result<Vec<String>, AppError>;
    async fn primary_key_columns(&self, table: &RemoteTable) -> Result<Vec<String>, AppError>;
    async fn row_security_enabled(&self, table: &RemoteTable) -> Result<bool, AppError>;
    async fn list_bucket_ids(&self) -> Result<Vec<String>, AppError>;
    async fn count_rows(&self, table: &RemoteTable) -> Result<i64, AppError>;
    async fn count_bucket_objects(&self, bucket_id: &str) -> Result<i64, AppError>;
    async fn sample_rows(
        &self,
        table: &RemoteTable,
        order_column: &str,
        order: SampleOrder,
        limit: u32,
    ) -> Result<Vec<SqlRow>, AppError>;
    async fn rows_by_keys(
        &self,
        table: &RemoteTable,
        key_column: &str,
        keys: &[SqlValue],
    ) -> Result<Vec<SqlRow>, AppError>;
    async fn foreign_keys(&self, schema: &str) -> Result<Vec<RemoteForeignKey>, AppError>;
    /// Count rows of `fk.table` whose non-null `fk.column` has no match in
    /// the referenced table.
    async fn orphaned_references(
        &self,
        fk: &RemoteForeignKey,
        limit: u32,
    ) -> Result<OrphanReport, AppError>;
    /// Bounded `SELECT`; returns how many rows came back.
    async fn probe_select(&self, table: &RemoteTable, limit: u32) -> Result<usize, AppError>;
}

/// A connection to the remote store exposing both sides.
pub trait RemoteDatabase: RemoteWriter + RemoteInspector {
    fn writer(&self) -> &dyn RemoteWriter;
    fn inspector(&self) -> &dyn RemoteInspector;
}

impl<T: RemoteWriter + RemoteInspector> RemoteDatabase for T {
    fn writer(&self) -> &dyn RemoteWriter {
        self
    }

    fn inspector(&self) -> &dyn RemoteInspector {
        self
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Builds remote clients from decrypted credentials. Nothing it returns is
/// cached between operations.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    fn management(&self, access_token: &str) -> Result<Box<dyn ManagementApi>, AppError>;
    async fn project(
        &self,
        management: &dyn ManagementApi,
        project_ref: &str,
    ) -> Result<Box<dyn ProjectApi>, AppError>;
    async fn database(
        &self,
        project_ref: &str,
        password: &str,
    ) -> Result<Box<dyn RemoteDatabase>, AppError>;
}
