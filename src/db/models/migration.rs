use serde::{Deserialize, Serialize};

/// `item_name` used by item types that only ever have one instance.
pub const SINGLE_ITEM_NAME: &str = "all";

// ============================================================================
// Status / type enums
// ============================================================================

sql_text_enum! {
    pub enum MigrationStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
    }
}

sql_text_enum! {
    pub enum ItemStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
        RolledBack => "rolled_back",
    }
}

sql_text_enum! {
    pub enum ItemType {
        Schema => "schema",
        Data => "data",
        Users => "users",
        Identities => "identities",
        Rls => "rls",
        StorageBuckets => "storage_buckets",
        StorageFiles => "storage_files",
        Functions => "functions",
        Secrets => "secrets",
        AuthConfig => "auth_config",
        OauthConfig => "oauth_config",
        EmailTemplates => "email_templates",
    }
}

impl ItemType {
    /// Types whose `item_name` names a table, bucket or function.
    pub fn is_multi_instance(&self) -> bool {
        matches!(self, ItemType::Data | ItemType::StorageFiles | ItemType::Functions)
    }

    /// Position in a run. Tables exist before rows, buckets before objects,
    /// users before identities, and policies after the data they guard.
    pub fn run_order(&self) -> u8 {
        match self {
            ItemType::Schema => 0,
            ItemType::Data => 1,
            ItemType::StorageBuckets => 2,
            ItemType::StorageFiles => 3,
            ItemType::Users => 4,
            ItemType::Identities => 5,
            ItemType::Rls => 6,
            ItemType::Functions => 7,
            ItemType::Secrets => 8,
            ItemType::AuthConfig => 9,
            ItemType::OauthConfig => 10,
            ItemType::EmailTemplates => 11,
        }
    }
}

// ============================================================================
// Migration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub id: String,
    pub remote_project_ref: Option<String>,
    pub remote_project_name: Option<String>,
    /// Vault blob of the remote access token. Never serialized.
    #[serde(skip_serializing, default)]
    pub encrypted_credentials: Option<String>,
    pub status: MigrationStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl Migration {
    pub fn is_connected(&self) -> bool {
        self.encrypted_credentials.is_some()
    }
}

// ============================================================================
// Migration items
// ============================================================================

/// What an item migration created remotely, recorded for manual reversal.
/// Never replayed automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RollbackInfo {
    Schema { tables: Vec<String> },
    Data { table: String, rows: u64 },
    Users { ids: Vec<String> },
    Identities { ids: Vec<String> },
    Rls { tables: Vec<String>, policies: Vec<String> },
    StorageBuckets { bucket_ids: Vec<String> },
    StorageFiles { bucket: String, paths: Vec<String> },
    Function { slug: String },
    Secrets { names: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationItem {
    pub id: String,
    pub migration_id: String,
    pub item_type: ItemType,
    pub item_name: String,
    pub status: ItemStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub rollback_info: Option<RollbackInfo>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// Caller-facing item selection. Multi-instance types list names; the rest
/// are toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemSelection {
    pub schema: bool,
    pub data: Vec<String>,
    pub users: bool,
    pub identities: bool,
    pub rls: bool,
    pub storage_buckets: bool,
    pub storage_files: Vec<String>,
    pub functions: Vec<String>,
    pub secrets: bool,
    pub auth_config: bool,
    pub oauth_config: bool,
    pub email_templates: bool,
}

impl ItemSelection {
    /// Flatten into `(item_type, item_name)` pairs, deduplicated.
    pub fn to_pairs(&self) -> Vec<(ItemType, String)> {
        let mut pairs = Vec::new();
        let single = |pairs: &mut Vec<(ItemType, String)>, on: bool, t: ItemType| {
            if on {
                pairs.push((t, SINGLE_ITEM_NAME.to_string()));
            }
        };

        single(&mut pairs, self.schema, ItemType::Schema);
        for table in &self.data {
            pairs.push((ItemType::Data, table.clone()));
        }
        single(&mut pairs, self.users, ItemType::Users);
        single(&mut pairs, self.identities, ItemType::Identities);
        single(&mut pairs, self.rls, ItemType::Rls);
        single(&mut pairs, self.storage_buckets, ItemType::StorageBuckets);
        for bucket in &self.storage_files {
            pairs.push((ItemType::StorageFiles, bucket.clone()));
        }
        for function in &self.functions {
            pairs.push((ItemType::Functions, function.clone()));
        }
        single(&mut pairs, self.secrets, ItemType::Secrets);
        single(&mut pairs, self.auth_config, ItemType::AuthConfig);
        single(&mut pairs, self.oauth_config, ItemType::OauthConfig);
        single(&mut pairs, self.email_templates, ItemType::EmailTemplates);

        let mut seen = std::collections::HashSet::new();
        pairs.retain(|p| seen.insert(p.clone()));
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rolled_back: usize,
    /// Share of items no longer waiting to run, 0–100.
    pub percent: f64,
}

impl MigrationProgress {
    pub fn from_items(items: &[MigrationItem]) -> Self {
        let mut p = MigrationProgress {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Pending => p.pending += 1,
                ItemStatus::InProgress => p.in_progress += 1,
                ItemStatus::Completed => p.completed += 1,
                ItemStatus::Failed => p.failed += 1,
                ItemStatus::Skipped => p.skipped += 1,
                ItemStatus::RolledBack => p.rolled_back += 1,
            }
        }
        if p.total > 0 {
            let done = p.completed + p.failed + p.skipped + p.rolled_back;
            p.percent = (done as f64 / p.total as f64 * 1000.0).round() / 10.0;
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_info_is_tagged() {
        let info = RollbackInfo::Data { table: "todos".into(), rows: 3 };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "data");
        assert_eq!(json["rows"], 3);
        let back: RollbackInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_selection_pairs() {
        let selection = ItemSelection {
            schema: true,
            data: vec!["todos".into(), "todos".into(), "notes".into()],
            email_templates: true,
            ..Default::default()
        };
        let pairs = selection.to_pairs();
        assert_eq!(
            pairs,
            vec![
                (ItemType::Schema, "all".to_string()),
                (ItemType::Data, "todos".to_string()),
                (ItemType::Data, "notes".to_string()),
                (ItemType::EmailTemplates, "all".to_string()),
            ]
        );
    }

    #[test]
    fn test_enum_text_roundtrip() {
        for t in ItemType::ALL {
            assert_eq!(t.as_str().parse::<ItemType>().unwrap(), *t);
        }
        assert!("bogus".parse::<ItemStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ItemStatus::RolledBack).unwrap(),
            "\"rolled_back\""
        );
    }
}
