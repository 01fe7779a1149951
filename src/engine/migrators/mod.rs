//! One migrator per item type. Each reads local state, writes it to the
//! remote project and reports what it created.

pub mod auth;
pub mod data;
pub mod functions;
pub mod platform_config;
pub mod rls;
pub mod schema;
pub mod secrets;
pub mod storage;

use crate::db::models::{ItemType, Migration, MigrationItem, RollbackInfo};
use crate::db::repos::migration::items as item_repo;
use crate::error::AppError;

use super::EngineContext;

/// What a successful item migration leaves behind.
#[derive(Debug, Default)]
pub struct ItemOutcome {
    pub rollback: Option<RollbackInfo>,
    pub metadata: Option<serde_json::Value>,
}

impl ItemOutcome {
    pub fn new(rollback: RollbackInfo, metadata: serde_json::Value) -> Self {
        Self {
            rollback: Some(rollback),
            metadata: Some(metadata),
        }
    }

    /// Not reversible, so nothing is recorded for rollback.
    pub fn irreversible(metadata: serde_json::Value) -> Self {
        Self {
            rollback: None,
            metadata: Some(metadata),
        }
    }
}

/// Run one item through its migrator and record the outcome on the item.
///
/// The item moves to `in_progress` first. Any error marks it `failed` with
/// the error text and is returned to the caller.
pub async fn migrate_item(
    ctx: &EngineContext,
    migration: &Migration,
    item: &MigrationItem,
) -> Result<(), AppError> {
    item_repo::mark_in_progress(&ctx.pool, &item.id)?;
    tracing::info!(
        migration_id = %migration.id,
        item_type = %item.item_type,
        item_name = %item.item_name,
        "Migrating item"
    );

    match dispatch(ctx, migration, item).await {
        Ok(outcome) => {
            item_repo::mark_completed(
                &ctx.pool,
                &item.id,
                outcome.rollback.as_ref(),
                outcome.metadata.as_ref(),
            )?;
            tracing::info!(
                migration_id = %migration.id,
                item_type = %item.item_type,
                item_name = %item.item_name,
                "Item migrated"
            );
            Ok(())
        }
        Err(e) => {
            tracing::warn!(
                migration_id = %migration.id,
                item_type = %item.item_type,
                item_name = %item.item_name,
                error = %e,
                error_kind = e.kind(),
                error_class = ?e.class(),
                "Item migration failed"
            );
            if let Err(mark_err) = item_repo::mark_failed(&ctx.pool, &item.id, &e.to_string()) {
                tracing::error!(item_id = %item.id, error = %mark_err, "Failed to record item failure");
            }
            Err(e)
        }
    }
}

async fn dispatch(
    ctx: &EngineContext,
    migration: &Migration,
    item: &MigrationItem,
) -> Result<ItemOutcome, AppError> {
    let name = item.item_name.as_str();
    match item.item_type {
        ItemType::Schema => schema::migrate(ctx, migration).await,
        ItemType::Data => data::migrate(ctx, migration, name).await,
        ItemType::Users => auth::migrate_users(ctx, migration).await,
        ItemType::Identities => auth::migrate_identities(ctx, migration).await,
        ItemType::Rls => rls::migrate(ctx, migration).await,
        ItemType::StorageBuckets => storage::migrate_buckets(ctx, migration).await,
        ItemType::StorageFiles => storage::migrate_files(ctx, migration, name).await,
        ItemType::Functions => functions::migrate(ctx, migration, name).await,
        ItemType::Secrets => secrets::migrate(ctx, migration).await,
        ItemType::AuthConfig => platform_config::migrate_auth_config(ctx, migration).await,
        ItemType::OauthConfig => platform_config::migrate_oauth_config(ctx, migration).await,
        ItemType::EmailTemplates => Ok(platform_config::email_templates_note()),
    }
}
