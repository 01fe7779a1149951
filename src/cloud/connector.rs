use async_trait::async_trait;

use super::postgres::PgStore;
use super::{ManagementApi, ManagementClient, ProjectApi, ProjectClient, RemoteConnector, RemoteDatabase};
use crate::config::RemoteConfig;
use crate::error::AppError;

/// Production connector: HTTPS clients for the platform APIs and a TLS
/// Postgres connection for the relational store.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: RemoteConfig,
}

impl HttpConnector {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RemoteConnector for HttpConnector {
    fn management(&self, access_token: &str) -> Result<Box<dyn ManagementApi>, AppError> {
        let client = ManagementClient::new(
            &self.config.management_url()?,
            access_token,
            self.config.http_timeout_secs,
        )?;
        Ok(Box::new(client))
    }

    async fn project(
        &self,
        management: &dyn ManagementApi,
        project_ref: &str,
    ) -> Result<Box<dyn ProjectApi>, AppError> {
        let keys = management.project_keys(project_ref).await?;
        let client = ProjectClient::new(
            &self.config.project_url(project_ref)?,
            keys,
            self.config.http_timeout_secs,
        )?;
        Ok(Box::new(client))
    }

    async fn database(
        &self,
        project_ref: &str,
        password: &str,
    ) -> Result<Box<dyn RemoteDatabase>, AppError> {
        let store = PgStore::connect(&self.config, project_ref, password).await?;
        Ok(Box::new(store))
    }
}
