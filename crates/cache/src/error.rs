use skein_core::{CodecError, StoreError};

/// Cache error.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cached value serialization error: {0}")]
    Serialization(#[from] CodecError),
}
