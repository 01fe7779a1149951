pub mod cloud;
pub mod commands;
pub mod config;
#[macro_use]
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod validation;

use std::path::Path;

pub use commands::MigrationService;
pub use config::MigratorConfig;
pub use error::AppError;

/// Load configuration, start logging and open the service.
///
/// Refuses to start without a server secret: nothing can be encrypted or
/// decrypted without it.
pub fn init(config_path: Option<&Path>) -> Result<MigrationService, AppError> {
    let config = MigratorConfig::load(config_path)?;
    logging::init(&config.log);

    if config.server_secret.is_none() {
        tracing::error!("SERVER_SECRET is not set");
        return Err(AppError::Config("SERVER_SECRET must be set".into()));
    }

    tracing::info!(
        database = %config.database_path.display(),
        management_api = %config.remote.management_api_url,
        "Starting hostlift"
    );
    MigrationService::from_config(config)
}
