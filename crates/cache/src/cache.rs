use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use skein_core::codec;
use skein_store::Store;

use crate::error::CacheError;

const VALUE_RECORD: &str = "cached value";

/// Key/value cache storing JSON-encoded values.
///
/// Expiry is optional per entry: `None` (or a zero duration) keeps the value
/// until it is overwritten or deleted.
#[derive(Debug, Clone)]
pub struct Cache<S> {
    store: S,
}

impl<S: Store> Cache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store `value` under `key`, replacing any previous value and expiry.
    pub fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let bytes = codec::encode(VALUE_RECORD, value)?;
        self.store.set(key, &bytes, ttl)?;
        Ok(())
    }

    /// Read the value under `key`; `None` if absent or expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        Ok(Some(codec::decode(VALUE_RECORD, &bytes)?))
    }

    /// Remove `key`; returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.delete(&[key])? > 0)
    }

    /// Remove every key matching the glob `pattern`; returns the keys removed.
    ///
    /// Not atomic: keys written while this runs may survive.
    pub fn delete_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let keys = self.store.keys_matching(pattern)?;
        if keys.is_empty() {
            return Ok(keys);
        }
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let removed = self.store.delete(&refs)?;
        debug!(pattern, matched = keys.len(), removed, "cache keys deleted");
        Ok(keys)
    }

    pub fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.exists(key)?)
    }

    /// Store `value` only if `key` is absent; returns whether it was stored.
    ///
    /// Atomic, so it can serve as a simple lock or de-duplication marker.
    pub fn set_if_absent<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let bytes = codec::encode(VALUE_RECORD, value)?;
        Ok(self.store.set_if_absent(key, &bytes, ttl)?)
    }

    /// Add 1 to the integer under `key` (absent counts as 0).
    pub fn increment(&self, key: &str) -> Result<i64, CacheError> {
        self.increment_by(key, 1)
    }

    /// Add `by` to the integer under `key` (absent counts as 0).
    ///
    /// Counters are plain JSON integers, so they can also be read with
    /// [`Cache::get`].
    pub fn increment_by(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        Ok(self.store.increment(key, by)?)
    }
}
