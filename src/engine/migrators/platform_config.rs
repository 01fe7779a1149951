use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::db::models::Migration;
use crate::db::repos::local::settings;
use crate::engine::require_project;
use crate::error::AppError;
use crate::validation::validate_identifier;

use super::ItemOutcome;
use crate::engine::EngineContext;

pub const ANONYMOUS_USERS_FLAG: &str = "external_anonymous_users_enabled";

/// Remote auth-config key for a provider setting, e.g.
/// `external_google_client_id`.
pub fn provider_key(provider: &str, field: &str) -> String {
    format!("external_{provider}_{field}")
}

fn truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Turn `oauth.<provider>.<field>` settings into an auth-config patch.
/// Returns the patch and the providers it touches.
pub fn oauth_patch(entries: &[(String, String)]) -> Result<(Map<String, Value>, Vec<String>), AppError> {
    let mut patch = Map::new();
    let mut providers = BTreeSet::new();

    for (key, value) in entries {
        let Some(rest) = key.strip_prefix(settings::OAUTH_PREFIX) else {
            continue;
        };
        let Some((provider, field)) = rest.split_once('.') else {
            tracing::debug!(key = %key, "Ignoring malformed OAuth setting");
            continue;
        };
        validate_identifier("provider", provider)?;
        let (remote_key, remote_value) = match field {
            "enabled" => (provider_key(provider, "enabled"), Value::Bool(truthy(value))),
            "client_id" => (provider_key(provider, "client_id"), Value::String(value.clone())),
            "client_secret" => (provider_key(provider, "secret"), Value::String(value.clone())),
            other => {
                tracing::debug!(provider = %provider, field = %other, "Ignoring unknown OAuth setting");
                continue;
            }
        };
        patch.insert(remote_key, remote_value);
        providers.insert(provider.to_string());
    }

    Ok((patch, providers.into_iter().collect()))
}

pub async fn migrate_auth_config(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    let anonymous = settings::get_bool(&ctx.pool, settings::ANONYMOUS_SIGN_IN)?;
    let patch = serde_json::json!({ ANONYMOUS_USERS_FLAG: anonymous });

    let project_ref = require_project(migration)?;
    ctx.management(migration)?
        .patch_auth_config(project_ref, &patch)
        .await?;

    tracing::debug!(migration_id = %migration.id, anonymous, "Auth config patched");
    Ok(ItemOutcome::irreversible(serde_json::json!({ "anonymous_sign_in": anonymous })))
}

/// Patch provider toggles and client credentials. Only provider names are
/// recorded; client secrets never reach item metadata.
pub async fn migrate_oauth_config(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    let entries = settings::get_prefixed(&ctx.pool, settings::OAUTH_PREFIX)?;
    let (patch, providers) = oauth_patch(&entries)?;

    if !patch.is_empty() {
        let project_ref = require_project(migration)?;
        ctx.management(migration)?
            .patch_auth_config(project_ref, &Value::Object(patch))
            .await?;
    }

    tracing::debug!(migration_id = %migration.id, providers = providers.len(), "OAuth config patched");
    Ok(ItemOutcome::irreversible(serde_json::json!({ "providers": providers })))
}

/// Email templates have no API on the hosted side.
pub fn email_templates_note() -> ItemOutcome {
    ItemOutcome::irreversible(serde_json::json!({
        "note": "Email templates cannot be transferred through the API; configure them manually in the hosted project's auth settings."
    }))
}
