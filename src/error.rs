use serde::Serialize;

/// App-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes cleanly so any wrapping surface gets structured error messages.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Remote database error: {0}")]
    RemoteDatabase(String),

    #[error("{0}")]
    Internal(String),
}

/// Coarse failure classes used when recording and reporting errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Validation,
    Remote,
    Data,
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Config(_) => "config",
            AppError::Crypto(_) => "crypto",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::Remote(_) => "remote",
            AppError::RemoteDatabase(_) => "remote_database",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Config(_) => ErrorClass::Configuration,
            AppError::Validation(_) | AppError::NotFound(_) => ErrorClass::Validation,
            AppError::Remote(_) | AppError::RemoteDatabase(_) => ErrorClass::Remote,
            _ => ErrorClass::Data,
        }
    }
}

/// Serialized as `{ error: "...", kind: "..." }`.
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}
