use thiserror::Error;

use crate::store::StoreError;

/// Error taxonomy exposed to the transport layer.
/// Every failure path in the crate ends in exactly one of these kinds.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Invalid credential")]
    InvalidCredential,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Error::NotFound(what),
            StoreError::Conflict(what) => Error::Conflict(what),
            // Unexpected storage failure on an otherwise-valid operation.
            StoreError::Database(e) => Error::BadRequest(format!("Database error: {}", e)),
        }
    }
}
