//! Error types for the blobmap store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlobMapError>;

#[derive(Error, Debug)]
pub enum BlobMapError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Id {0} registered as garbage a second time")]
    DoubleFree(u64),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{} background write(s) failed: {}", .0.len(), describe_all(.0))]
    BackgroundWrites(Vec<BlobMapError>),

    #[error("Unexpected empty collection")]
    EmptySequence,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl BlobMapError {
    /// Shorthand for gateway failures raised by storage implementations.
    pub fn storage(message: impl Into<String>) -> Self {
        BlobMapError::Storage(message.into())
    }
}

fn describe_all(errors: &[BlobMapError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<bincode::Error> for BlobMapError {
    fn from(err: bincode::Error) -> Self {
        BlobMapError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlobMapError {
    fn from(err: serde_json::Error) -> Self {
        BlobMapError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BlobMapError {
    fn from(err: tokio::task::JoinError) -> Self {
        BlobMapError::Task(err.to_string())
    }
}
