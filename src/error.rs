use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown cache domain: {0}")]
    UnknownDomain(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cache operation failed: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        CacheError::Internal(err.to_string())
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
