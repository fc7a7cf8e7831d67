//! Store adapter: the remote ordered key-value store behind queues, pub/sub
//! and the cache.
//!
//! The [`Store`] trait is the boundary. `InMemoryStore` backs tests and local
//! development; `RedisStore` (feature `redis`) talks to a real server.

pub mod config;
pub mod glob;
pub mod in_memory;
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
mod pool;
#[cfg(feature = "redis")]
pub mod redis;
pub mod r#trait;

pub use config::{ConfigError, StoreConfig};
pub use glob::glob_match;
pub use in_memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use crate::redis::RedisStore;
pub use r#trait::{BatchOp, RawMessage, Store, Subscriber};
