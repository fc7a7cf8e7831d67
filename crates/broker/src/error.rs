use skein_core::{CodecError, StoreError};

use crate::subscription::SubscriptionKind;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("message serialization error: {0}")]
    Serialization(#[from] CodecError),
    #[error("no {0} to subscribe to")]
    NoTargets(SubscriptionKind),
    #[error("subscription targets {actual}, not {requested}")]
    TargetKind {
        actual: SubscriptionKind,
        requested: SubscriptionKind,
    },
    #[error("failed to spawn forwarding thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("subscription is closed")]
    Closed,
}
