use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Store read error: {0}")]
    ReadError(String),

    #[error("Store write error: {0}")]
    WriteError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stored value is not valid JSON: {0}")]
    DecodeError(String),
}

impl From<StoreError> for common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConfigError(msg) => common::Error::ConfigError(msg),
            other => common::Error::StoreError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::DecodeError(err.to_string())
    }
}
