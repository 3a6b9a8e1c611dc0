use thiserror::Error;

use crate::ports::platform::PlatformError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("data integrity violated: {0}")]
    Integrity(String),
    #[error("ingestion order violated: {0}")]
    Ordering(String),
    #[error("configuration invalid: {0}")]
    Configuration(String),
    #[error("platform call failed: {0}")]
    Platform(#[from] PlatformError),
}
