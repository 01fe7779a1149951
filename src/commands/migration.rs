use std::sync::Arc;

use zeroize::Zeroizing;

use crate::cloud::{HttpConnector, RemoteConnector, RemoteProject};
use crate::config::MigratorConfig;
use crate::db::models::{
    AvailableItems, FunctionalOptions, ItemSelection, Migration, MigrationItem, MigrationProgress,
    Verification, VerificationLayer,
};
use crate::db::repos::local::catalog;
use crate::db::repos::migration::{
    items as item_repo, migrations as repo, passwords as password_repo,
    verifications as verification_repo,
};
use crate::db::{init_db, DbPool};
use crate::engine::{orchestrator, verify, EngineContext};
use crate::error::AppError;
use crate::validation::{require_non_empty, require_valid_id, validate_identifier};

/// Caller-facing surface of the engine. Every method is one operation a UI
/// or CLI would expose.
#[derive(Clone)]
pub struct MigrationService {
    ctx: EngineContext,
}

impl MigrationService {
    pub fn new(pool: DbPool, config: MigratorConfig, connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            ctx: EngineContext::new(pool, Arc::new(config), connector),
        }
    }

    /// Open the local database named in `config` and talk to the real
    /// platform over HTTPS and TLS Postgres.
    pub fn from_config(config: MigratorConfig) -> Result<Self, AppError> {
        let pool = init_db(&config.database_path)?;
        let connector = Arc::new(HttpConnector::new(config.remote.clone()));
        Ok(Self::new(pool, config, connector))
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn pool(&self) -> &DbPool {
        &self.ctx.pool
    }

    // ------------------------------------------------------------------
    // Migrations
    // ------------------------------------------------------------------

    pub fn start_migration(&self) -> Result<Migration, AppError> {
        let migration = repo::create(self.pool())?;
        tracing::info!(migration_id = %migration.id, "Migration started");
        Ok(migration)
    }

    pub fn list_migrations(&self) -> Result<Vec<Migration>, AppError> {
        repo::get_all(self.pool())
    }

    pub fn get_migration(&self, id: &str) -> Result<Migration, AppError> {
        repo::get_by_id(self.pool(), id)
    }

    pub fn delete_migration(&self, id: &str) -> Result<bool, AppError> {
        let deleted = repo::delete(self.pool(), id)?;
        if deleted {
            tracing::info!(migration_id = %id, "Migration deleted");
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Remote connection
    // ------------------------------------------------------------------

    /// Check `access_token` against the management API, then store it
    /// encrypted. Nothing is stored if the token is rejected.
    pub async fn connect_remote(&self, id: &str, access_token: &str) -> Result<Vec<RemoteProject>, AppError> {
        require_non_empty("access_token", access_token)?;
        let migration = repo::get_by_id(self.pool(), id)?;
        if !self.ctx.vault.is_configured() {
            return Err(AppError::Config(
                "Server secret is not configured; refusing to store credentials".into(),
            ));
        }

        let access_token = Zeroizing::new(access_token.trim().to_string());
        let management = self.ctx.connector.management(&access_token)?;
        let projects = management.list_projects().await.map_err(|e| {
            tracing::warn!(migration_id = %migration.id, error = %e, "Access token rejected");
            AppError::Remote(format!("Could not validate access token: {e}"))
        })?;

        let blob = self.ctx.vault.encrypt(&access_token)?;
        repo::set_credentials(self.pool(), &migration.id, Some(&blob))?;
        tracing::info!(migration_id = %migration.id, projects = projects.len(), "Connected to remote account");
        Ok(projects)
    }

    /// Forget the access token, the selected project and the stored
    /// database password.
    pub fn disconnect_remote(&self, id: &str) -> Result<(), AppError> {
        repo::set_credentials(self.pool(), id, None)?;
        repo::set_project(self.pool(), id, None, None)?;
        password_repo::delete(self.pool(), id)?;
        tracing::info!(migration_id = %id, "Disconnected from remote account");
        Ok(())
    }

    pub async fn list_remote_projects(&self, id: &str) -> Result<Vec<RemoteProject>, AppError> {
        let migration = repo::get_by_id(self.pool(), id)?;
        self.ctx.management(&migration)?.list_projects().await
    }

    pub async fn select_remote_project(&self, id: &str, project_ref: &str) -> Result<Migration, AppError> {
        validate_identifier("project", project_ref)?;
        let projects = self.list_remote_projects(id).await?;
        let project = projects
            .iter()
            .find(|p| p.project_ref() == project_ref)
            .ok_or_else(|| AppError::NotFound(format!("Remote project {project_ref}")))?;

        repo::set_project(self.pool(), id, Some(project.project_ref()), Some(&project.name))?;
        tracing::info!(migration_id = %id, project_ref = %project_ref, "Remote project selected");
        repo::get_by_id(self.pool(), id)
    }

    pub fn store_db_password(&self, id: &str, password: &str) -> Result<(), AppError> {
        require_non_empty("password", password)?;
        repo::get_by_id(self.pool(), id)?;
        let blob = self.ctx.vault.encrypt(password)?;
        password_repo::set(self.pool(), id, &blob)?;
        tracing::debug!(migration_id = %id, "Remote database password stored");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub fn list_available_items(&self) -> Result<AvailableItems, AppError> {
        catalog::available_items(self.pool())
    }

    pub fn select_items(&self, id: &str, selection: &ItemSelection) -> Result<Vec<MigrationItem>, AppError> {
        orchestrator::select_items(self.pool(), id, selection)
    }

    pub fn get_items(&self, id: &str) -> Result<Vec<MigrationItem>, AppError> {
        repo::get_by_id(self.pool(), id)?;
        item_repo::get_by_migration(self.pool(), id)
    }

    pub fn get_progress(&self, id: &str) -> Result<MigrationProgress, AppError> {
        Ok(MigrationProgress::from_items(&self.get_items(id)?))
    }

    fn owned_item(&self, migration_id: &str, item_id: &str) -> Result<MigrationItem, AppError> {
        require_valid_id("item_id", item_id)?;
        let item = item_repo::get_by_id(self.pool(), item_id)?;
        if item.migration_id != migration_id {
            return Err(AppError::NotFound(format!(
                "Item {item_id} in migration {migration_id}"
            )));
        }
        Ok(item)
    }

    pub fn skip_item(&self, migration_id: &str, item_id: &str) -> Result<MigrationItem, AppError> {
        self.owned_item(migration_id, item_id)?;
        item_repo::mark_skipped(self.pool(), item_id)?;
        item_repo::get_by_id(self.pool(), item_id)
    }

    /// Record that an operator reversed this item by hand. Nothing is
    /// undone remotely.
    pub fn mark_item_rolled_back(&self, migration_id: &str, item_id: &str) -> Result<MigrationItem, AppError> {
        self.owned_item(migration_id, item_id)?;
        item_repo::mark_rolled_back(self.pool(), item_id)?;
        item_repo::get_by_id(self.pool(), item_id)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    pub async fn run_migration(&self, id: &str) -> Result<Migration, AppError> {
        orchestrator::run_migration(&self.ctx, id).await
    }

    pub fn retry_failed_items(&self, id: &str) -> Result<usize, AppError> {
        orchestrator::retry_failed_items(self.pool(), id)
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    pub async fn run_basic_verification(&self, id: &str) -> Result<Verification, AppError> {
        verify::basic::run(&self.ctx, id).await
    }

    pub async fn run_integrity_verification(&self, id: &str) -> Result<Verification, AppError> {
        verify::integrity::run(&self.ctx, id).await
    }

    pub async fn run_functional_verification(
        &self,
        id: &str,
        options: &FunctionalOptions,
    ) -> Result<Verification, AppError> {
        verify::functional::run(&self.ctx, id, options).await
    }

    pub fn get_verifications(
        &self,
        id: &str,
        layer: Option<VerificationLayer>,
    ) -> Result<Vec<Verification>, AppError> {
        repo::get_by_id(self.pool(), id)?;
        verification_repo::get_by_migration(self.pool(), id, layer)
    }
}
