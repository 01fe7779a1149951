use serde::{Deserialize, Serialize};

// ============================================================================
// Local backend catalog: the self-hosted side of a migration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalColumn {
    pub name: String,
    /// Declared SQLite type, possibly empty.
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk_position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTable {
    pub name: String,
    pub columns: Vec<LocalColumn>,
    pub foreign_keys: Vec<LocalForeignKey>,
}

impl LocalTable {
    pub fn primary_key(&self) -> Vec<&LocalColumn> {
        let mut pk: Vec<&LocalColumn> = self.columns.iter().filter(|c| c.pk_position > 0).collect();
        pk.sort_by_key(|c| c.pk_position);
        pk
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_password: Option<String>,
    pub phone: Option<String>,
    pub email_confirmed_at: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub raw_user_meta_data: Option<String>,
    pub is_anonymous: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub provider_id: String,
    pub identity_data: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageBucket {
    pub id: String,
    pub name: String,
    pub public: bool,
    pub file_size_limit: Option<i64>,
    pub allowed_mime_types: Option<Vec<String>>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    pub id: String,
    pub bucket_id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RlsPolicy {
    pub id: String,
    pub table_name: String,
    pub name: String,
    pub command: String,
    pub roles: Vec<String>,
    pub using_expr: Option<String>,
    pub check_expr: Option<String>,
    pub enabled: bool,
}

/// A stored secret. The value stays vault-encrypted until pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSecret {
    pub name: String,
    pub encrypted_value: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFunction {
    pub name: String,
    /// `None` means the metadata never set it; deploys default to `true`.
    pub verify_jwt: Option<bool>,
    pub entrypoint: Option<String>,
    pub created_at: String,
}

/// Everything the local backend can offer for selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailableItems {
    pub tables: Vec<String>,
    pub buckets: Vec<String>,
    pub functions: Vec<String>,
    pub user_count: i64,
    pub identity_count: i64,
    pub policy_count: i64,
    pub secret_count: i64,
}
