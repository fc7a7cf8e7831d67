//! Fire-and-forget pub/sub over a [`Store`](skein_store::Store).
//!
//! ## Design
//!
//! - Publishing wraps a payload into a [`Message`] (channel + timestamp) and
//!   hands it to the store once; nothing is persisted, so a message published
//!   while nobody listens is gone
//! - Every [`Subscription`] owns a dedicated store connection and one
//!   forwarding thread that decodes inbound payloads into a bounded buffer
//! - Payloads that are not well-formed messages are delivered as fallback
//!   messages carrying the raw text, never dropped

pub mod broker;
pub mod error;
pub mod subscription;

pub use broker::MessageBroker;
pub use error::BrokerError;
pub use skein_core::{Message, Payload};
pub use subscription::{DELIVERY_BUFFER, Subscription, SubscriptionKind};
