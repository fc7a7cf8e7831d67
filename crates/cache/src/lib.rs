//! JSON value cache over a [`Store`](skein_store::Store).

pub mod cache;
pub mod error;

pub use cache::Cache;
pub use error::CacheError;
