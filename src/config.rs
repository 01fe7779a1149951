use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

const ENV_PREFIX: &str = "HOSTLIFT_";

/// Top-level configuration, loaded from an optional TOML file with
/// environment overrides (a `.env` file is honoured via `dotenvy`).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Local backend SQLite database.
    pub database_path: PathBuf,
    /// Root of local object storage: `{storage_dir}/{bucket}/{object}`.
    pub storage_dir: PathBuf,
    /// Root of local function sources: `{functions_dir}/{name}/`.
    pub functions_dir: PathBuf,
    /// Server-wide secret the vault key is derived from. Never serialized.
    #[serde(skip_serializing)]
    pub server_secret: Option<String>,
    pub remote: RemoteConfig,
    pub verification: VerificationConfig,
    pub log: LogConfig,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/backend.db"),
            storage_dir: PathBuf::from("data/storage"),
            functions_dir: PathBuf::from("data/functions"),
            server_secret: None,
            remote: RemoteConfig::default(),
            verification: VerificationConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl fmt::Debug for MigratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigratorConfig")
            .field("database_path", &self.database_path)
            .field("storage_dir", &self.storage_dir)
            .field("functions_dir", &self.functions_dir)
            .field(
                "server_secret",
                &self.server_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("remote", &self.remote)
            .field("verification", &self.verification)
            .field("log", &self.log)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub management_api_url: String,
    /// `{ref}` is replaced with the selected project reference.
    pub project_url_template: String,
    pub db_host_template: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_name: String,
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            management_api_url: "https://api.supabase.com".into(),
            project_url_template: "https://{ref}.supabase.co".into(),
            db_host_template: "db.{ref}.supabase.co".into(),
            db_port: 5432,
            db_user: "postgres".into(),
            db_name: "postgres".into(),
            http_timeout_secs: 30,
            connect_timeout_secs: 15,
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Rows per sample (first, last, random) in the integrity layer.
    pub sample_size: u32,
    pub orphan_sample_limit: u32,
    pub query_test_limit: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            sample_size: 5,
            orphan_sample_limit: 10,
            query_test_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub json: bool,
}

impl MigratorConfig {
    /// Load configuration from `path` (if it exists), then apply environment
    /// overrides. Reads `.env` first so overrides can live there.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to read .env file: {}", e);
            }
        }

        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                Self::from_toml_str(&raw)?
            }
            Some(p) => {
                tracing::debug!(path = %p.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| AppError::Config(format!("Invalid config file: {e}")))
    }

    /// Apply `HOSTLIFT_*` overrides. `SERVER_SECRET` is accepted unprefixed.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(v) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = var("STORAGE_DIR") {
            self.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FUNCTIONS_DIR") {
            self.functions_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SERVER_SECRET").or_else(|| lookup("SERVER_SECRET").filter(|v| !v.is_empty())) {
            self.server_secret = Some(v);
        }
        if let Some(v) = var("MANAGEMENT_API_URL") {
            self.remote.management_api_url = v;
        }
        if let Some(v) = var("PROJECT_URL_TEMPLATE") {
            self.remote.project_url_template = v;
        }
        if let Some(v) = var("DB_HOST_TEMPLATE") {
            self.remote.db_host_template = v;
        }
        if let Some(port) = var("DB_PORT").and_then(|v| v.parse().ok()) {
            self.remote.db_port = port;
        }
        if let Some(v) = var("LOG_JSON") {
            self.log.json = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_remote_url(&self.remote.management_api_url)?;
        if !self.remote.project_url_template.contains("{ref}") {
            return Err(AppError::Config(
                "remote.project_url_template must contain {ref}".into(),
            ));
        }
        if !self.remote.db_host_template.contains("{ref}") {
            return Err(AppError::Config(
                "remote.db_host_template must contain {ref}".into(),
            ));
        }
        if self.verification.sample_size == 0 {
            return Err(AppError::Config("verification.sample_size must be > 0".into()));
        }
        Ok(())
    }
}

impl RemoteConfig {
    pub fn project_url(&self, project_ref: &str) -> Result<String, AppError> {
        let raw = self.project_url_template.replace("{ref}", project_ref);
        let parsed = validate_remote_url(&raw)?;
        Ok(parsed.as_str().trim_end_matches('/').to_string())
    }

    pub fn db_host(&self, project_ref: &str) -> String {
        self.db_host_template.replace("{ref}", project_ref)
    }

    pub fn management_url(&self) -> Result<String, AppError> {
        let parsed = validate_remote_url(&self.management_api_url)?;
        Ok(parsed.as_str().trim_end_matches('/').to_string())
    }
}

/// Validate that a remote URL is well-formed and uses a safe scheme.
///
/// HTTPS is required for remote hosts. HTTP is only permitted for loopback
/// addresses so local mocks and development stacks keep working.
pub fn validate_remote_url(raw: &str) -> Result<Url, AppError> {
    let parsed = Url::parse(raw).map_err(|e| AppError::Config(format!("Invalid URL {raw:?}: {e}")))?;

    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" => {
            let host = parsed.host_str().unwrap_or("");
            if host == "localhost" || host == "127.0.0.1" || host == "[::1]" {
                Ok(parsed)
            } else {
                Err(AppError::Config(format!(
                    "HTTP is only allowed for localhost, got {raw:?}"
                )))
            }
        }
        other => Err(AppError::Config(format!(
            "Unsupported URL scheme \"{other}://\""
        ))),
    }
}
