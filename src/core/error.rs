use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XpError {
    #[error("Buffer store error: {0}")]
    BufferError(String),

    #[error("Score store error: {0}")]
    StoreError(String),

    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Background worker error: {0}")]
    WorkerError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, XpError>;

impl XpError {
    /// Transient failures are worth retrying on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            XpError::BufferError(_)
                | XpError::StoreError(_)
                | XpError::Timeout(_)
                | XpError::IoError(_)
        )
    }
}

impl From<std::io::Error> for XpError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for XpError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for XpError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
