use crate::cloud::SecretValue;
use crate::db::models::{Migration, RollbackInfo};
use crate::db::repos::local::secrets as secret_repo;
use crate::engine::require_project;
use crate::error::AppError;
use crate::validation::validate_identifier;

use super::ItemOutcome;
use crate::engine::EngineContext;

/// Decrypt every local secret and push them as one batch. Fails up front if
/// the vault has no key, even when there is nothing to push.
pub async fn migrate(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    if !ctx.vault.is_configured() {
        return Err(AppError::Config(
            "Server secret is not configured; secrets cannot be decrypted".into(),
        ));
    }

    let stored = secret_repo::get_all(&ctx.pool)?;
    let mut values = Vec::with_capacity(stored.len());
    for secret in &stored {
        validate_identifier("secret", &secret.name)?;
        values.push(SecretValue {
            name: secret.name.clone(),
            value: ctx.vault.decrypt(&secret.encrypted_value)?,
        });
    }
    let names: Vec<String> = values.iter().map(|s| s.name.clone()).collect();

    if !values.is_empty() {
        let project_ref = require_project(migration)?;
        ctx.management(migration)?
            .create_secrets(project_ref, &values)
            .await?;
    }

    tracing::debug!(migration_id = %migration.id, secrets = names.len(), "Secrets pushed");
    Ok(ItemOutcome::new(
        RollbackInfo::Secrets { names: names.clone() },
        serde_json::json!({ "secrets": names.len() }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigratorConfig;
    use crate::engine::test_support::connected_context;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_secrets_decrypted_and_pushed() {
        let (ctx, remote, migration) = connected_context();
        secret_repo::set(&ctx.pool, &ctx.vault, "STRIPE_KEY", "sk_live_123").unwrap();
        secret_repo::set(&ctx.pool, &ctx.vault, "SMTP_PASS", "hunter2").unwrap();

        let outcome = migrate(&ctx, &migration).await.unwrap();
        assert_eq!(
            outcome.rollback,
            Some(RollbackInfo::Secrets { names: vec!["SMTP_PASS".into(), "STRIPE_KEY".into()] })
        );
        assert_eq!(remote.secret("STRIPE_KEY").as_deref(), Some("sk_live_123"));
        assert!(!outcome.metadata.unwrap().to_string().contains("sk_live"));
    }

    #[tokio::test]
    async fn test_fails_without_server_secret() {
        let (ctx, _remote, migration) = connected_context();
        let ctx = EngineContext::new(ctx.pool.clone(), Arc::new(MigratorConfig::default()), ctx.connector.clone());
        assert!(matches!(migrate(&ctx, &migration).await, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_push_failure_fails_item() {
        let (ctx, remote, migration) = connected_context();
        secret_repo::set(&ctx.pool, &ctx.vault, "STRIPE_KEY", "sk_live_123").unwrap();
        remote.fail("create_secrets");
        assert!(matches!(migrate(&ctx, &migration).await, Err(AppError::Remote(_))));
    }
}
