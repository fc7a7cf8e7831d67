use tracing::{debug, instrument};

use skein_core::{MESSAGE_RECORD, Message, Payload, codec};
use skein_store::Store;

use crate::error::BrokerError;
use crate::subscription::{Subscription, SubscriptionKind};

/// Publishes messages and opens subscriptions over a shared store.
///
/// ## Delivery
///
/// Fire-and-forget: a message reaches the subscriptions listening at the
/// moment it is published, and nobody else. There is no replay of messages
/// published before a subscription started.
#[derive(Debug, Clone)]
pub struct MessageBroker<S> {
    store: S,
}

impl<S: Store> MessageBroker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Publish `data` on `channel`, stamped with the current time.
    ///
    /// Returns how many subscriptions received it; 0 is not an error.
    #[instrument(skip(self, data), err)]
    pub fn publish(&self, channel: &str, data: Payload) -> Result<u64, BrokerError> {
        let message = Message::new(channel, data);
        let bytes = codec::encode(MESSAGE_RECORD, &message)?;
        let receivers = self.store.publish(channel, &bytes)?;
        debug!(receivers, "message published");
        Ok(receivers)
    }

    /// Publish `payload` verbatim, without wrapping it in a message.
    ///
    /// Subscribers that cannot decode it receive a fallback message.
    #[instrument(skip(self, payload), fields(len = payload.len()), err)]
    pub fn publish_raw(&self, channel: &str, payload: &[u8]) -> Result<u64, BrokerError> {
        let receivers = self.store.publish(channel, payload)?;
        debug!(receivers, "raw payload published");
        Ok(receivers)
    }

    /// Subscribe to exact channel names.
    ///
    /// Returns once the store confirmed the subscription, so anything published
    /// afterwards is delivered.
    #[instrument(skip(self), err)]
    pub fn subscribe(&self, channels: &[&str]) -> Result<Subscription, BrokerError> {
        self.open(SubscriptionKind::Channels, channels)
    }

    /// Subscribe to glob patterns (`*`, `?`, `[...]`) over channel names.
    #[instrument(skip(self), err)]
    pub fn psubscribe(&self, patterns: &[&str]) -> Result<Subscription, BrokerError> {
        self.open(SubscriptionKind::Patterns, patterns)
    }

    fn open(&self, kind: SubscriptionKind, targets: &[&str]) -> Result<Subscription, BrokerError> {
        if targets.is_empty() {
            return Err(BrokerError::NoTargets(kind));
        }
        let connection = self.store.subscriber()?;
        let targets = targets.iter().map(|t| t.to_string()).collect();
        Subscription::start(connection, kind, targets)
    }
}
