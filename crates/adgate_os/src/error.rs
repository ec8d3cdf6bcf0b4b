#![forbid(unsafe_code)]

use adgate_contracts::ContractViolation;
use adgate_storage::{CheckpointStoreError, StorageError};
use thiserror::Error;

/// Two tabs incrementing the batch counter at once is resolved
/// last-write-wins and is never reported as an error.
#[derive(Debug, Error)]
pub enum GatingError {
    #[error("no authenticated viewer")]
    NotAuthenticated,
    #[error("profile store failed: {0}")]
    Store(#[from] StorageError),
    #[error("no ad source is configured")]
    NoAdSourceAvailable,
    #[error("checkpoint store failed: {0}")]
    Checkpoint(#[from] CheckpointStoreError),
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
    #[error("VIP payment is not available")]
    PaymentUnavailable,
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl GatingError {
    /// Store-level failures are shown to the viewer; the rest are not.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            GatingError::Store(_) | GatingError::PaymentUnavailable | GatingError::LockPoisoned(_)
        )
    }
}
