use thiserror::Error;

use aevrt_core::AevError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<StorageError> for AevError {
    fn from(e: StorageError) -> Self {
        AevError::Storage(e.to_string())
    }
}
