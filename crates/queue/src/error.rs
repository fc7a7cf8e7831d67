use skein_core::{CodecError, StoreError};

/// Job queue error.
///
/// "No job available" is not an error: pops return `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job serialization error: {0}")]
    Serialization(#[from] CodecError),
}

/// Failure to start a [`DelayedPromoter`](crate::DelayedPromoter).
#[derive(Debug, thiserror::Error)]
pub enum PromoterError {
    #[error("promoter needs at least one queue")]
    NoQueues,
    #[error("failed to spawn promoter thread: {0}")]
    Spawn(#[from] std::io::Error),
}
