use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatehouseError {
    // IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found at {0}; run `gatehouse init` first")]
    ConfigNotFound(String),

    // Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),
}

pub type Result<T> = std::result::Result<T, GatehouseError>;

/// Failures on the permission path.
///
/// `Clone` because a single in-flight fetch hands its result to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// No active identity. The surrounding application decides whether to redirect.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Backend unreachable or a query failed. Retryable.
    #[error("permission fetch failed: {0}")]
    Fetch(String),

    #[error("cache write failed: {0}")]
    CacheWrite(String),

    #[error("cache read failed: {0}")]
    CacheRead(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PermissionError {
    pub fn is_auth(&self) -> bool {
        matches!(self, PermissionError::NotAuthenticated)
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PermissionError::Fetch(_))
    }
}
