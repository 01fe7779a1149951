pub mod crypto;
pub mod migrators;
pub mod orchestrator;
pub mod verify;

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::cloud::{ManagementApi, ProjectApi, RemoteConnector, RemoteDatabase};
use crate::config::MigratorConfig;
use crate::db::models::Migration;
use crate::db::repos::migration::passwords as password_repo;
use crate::db::DbPool;
use crate::error::AppError;

use self::crypto::Vault;

/// Everything a migrator or verification layer needs. Remote clients are not
/// part of it: they are rebuilt from decrypted credentials on every call.
#[derive(Clone)]
pub struct EngineContext {
    pub pool: DbPool,
    pub config: Arc<MigratorConfig>,
    pub vault: Vault,
    pub connector: Arc<dyn RemoteConnector>,
}

impl EngineContext {
    pub fn new(pool: DbPool, config: Arc<MigratorConfig>, connector: Arc<dyn RemoteConnector>) -> Self {
        let vault = Vault::new(config.server_secret.as_deref());
        Self {
            pool,
            config,
            vault,
            connector,
        }
    }

    /// Management API client built from the migration's stored access token.
    pub fn management(&self, migration: &Migration) -> Result<Box<dyn ManagementApi>, AppError> {
        let blob = migration.encrypted_credentials.as_deref().ok_or_else(|| {
            AppError::Validation(format!("Migration {} is not connected to a remote account", migration.id))
        })?;
        let token = Zeroizing::new(self.vault.decrypt(blob)?);
        self.connector.management(&token)
    }

    /// Storage/admin-auth/function client for the selected project.
    pub async fn project(&self, migration: &Migration) -> Result<Box<dyn ProjectApi>, AppError> {
        let project_ref = require_project(migration)?;
        let management = self.management(migration)?;
        self.connector.project(management.as_ref(), project_ref).await
    }

    /// Fresh connection to the selected project's relational store.
    pub async fn database(&self, migration: &Migration) -> Result<Box<dyn RemoteDatabase>, AppError> {
        let project_ref = require_project(migration)?;
        let blob = password_repo::get(&self.pool, &migration.id)?.ok_or_else(|| {
            AppError::Validation(format!("No remote database password stored for migration {}", migration.id))
        })?;
        let password = Zeroizing::new(self.vault.decrypt(&blob)?);
        self.connector.database(project_ref, &password).await
    }
}

pub fn require_project(migration: &Migration) -> Result<&str, AppError> {
    migration
        .remote_project_ref
        .as_deref()
        .ok_or_else(|| AppError::Validation(format!("No remote project selected for migration {}", migration.id)))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::cloud::testing::PROJECT_REF;
    use crate::db::repos::migration::migrations as migration_repo;

    #[tokio::test]
    async fn test_clients_built_per_call() {
        let (ctx, remote, migration) = connected_context();
        ctx.database(&migration).await.unwrap();
        ctx.database(&migration).await.unwrap();
        assert_eq!(remote.database_opens(), 2);

        let projects = ctx.management(&migration).unwrap().list_projects().await.unwrap();
        assert_eq!(projects[0].project_ref(), PROJECT_REF);
    }

    #[tokio::test]
    async fn test_missing_credentials_are_validation_errors() {
        let (ctx, _remote, migration) = connected_context();
        migration_repo::set_credentials(&ctx.pool, &migration.id, None).unwrap();
        migration_repo::set_project(&ctx.pool, &migration.id, None, None).unwrap();
        let migration = migration_repo::get_by_id(&ctx.pool, &migration.id).unwrap();

        assert!(matches!(ctx.management(&migration), Err(AppError::Validation(_))));
        assert!(matches!(ctx.database(&migration).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_vault_fails_closed() {
        let (ctx, _remote, migration) = connected_context();
        let ctx = EngineContext::new(ctx.pool.clone(), Arc::new(MigratorConfig::default()), ctx.connector.clone());
        assert!(matches!(ctx.database(&migration).await, Err(AppError::Config(_))));
    }
}
