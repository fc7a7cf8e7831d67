use std::sync::Arc;
use std::time::Duration;

use skein_core::StoreResult;

/// One operation inside an atomic batch (see [`Store::execute_batch`]).
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Insert `value` at the front (tail-equivalent end) of list `key`.
    PushFront { key: String, value: Vec<u8> },
    /// Insert `member` into sorted set `key` with `score`.
    SortedAdd {
        key: String,
        member: Vec<u8>,
        score: f64,
    },
    /// Remove `member` from sorted set `key`.
    SortedRemove { key: String, member: Vec<u8> },
}

/// A payload received on a subscriber connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Channel the payload was published on.
    pub channel: String,
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    pub payload: Vec<u8>,
}

/// Remote ordered key-value store (lists, sorted sets, pub/sub, plain keys).
///
/// This is the only seam between the queue/broker/cache layers and the
/// network. Every method is a single round-trip; none of them retry.
///
/// ## Lists
///
/// Lists are FIFO when values are pushed at the front and popped at the back.
///
/// ## Atomicity
///
/// Each method is atomic on its own. [`Store::execute_batch`] applies a group
/// of operations atomically: other clients observe all of them or none.
///
/// ## Thread Safety
///
/// Implementations are shared across threads (`Send + Sync`); command traffic
/// may be multiplexed over a pool, but [`Store::subscriber`] always returns a
/// connection reserved for that subscriber.
pub trait Store: Send + Sync {
    /// Insert `value` at the front of list `key`; returns the new length.
    fn push_front(&self, key: &str, value: &[u8]) -> StoreResult<u64>;

    /// Remove and return the value at the back of list `key`, if any.
    fn pop_back(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Like [`Store::pop_back`], but waits up to `timeout` for a value.
    ///
    /// Returns `Ok(None)` when the timeout elapses with the list still empty.
    fn blocking_pop_back(&self, key: &str, timeout: Duration) -> StoreResult<Option<Vec<u8>>>;

    /// Current length of list `key` (0 when absent).
    fn list_len(&self, key: &str) -> StoreResult<u64>;

    /// Delete whole keys of any type; returns how many existed.
    fn delete(&self, keys: &[&str]) -> StoreResult<u64>;

    /// Insert (or re-score) `member` in sorted set `key`.
    fn sorted_add(&self, key: &str, member: &[u8], score: f64) -> StoreResult<()>;

    /// Members with `min <= score <= max`, ordered by score then member bytes.
    fn range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<Vec<u8>>>;

    /// Remove `member` from sorted set `key`; returns whether it was present.
    fn sorted_remove(&self, key: &str, member: &[u8]) -> StoreResult<bool>;

    /// Number of members in sorted set `key`.
    fn sorted_len(&self, key: &str) -> StoreResult<u64>;

    /// Apply all `ops` as one atomic batch.
    fn execute_batch(&self, ops: &[BatchOp]) -> StoreResult<()>;

    /// Publish `payload` on `channel`; returns the number of receivers.
    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<u64>;

    /// Open a dedicated pub/sub connection.
    fn subscriber(&self) -> StoreResult<Box<dyn Subscriber>>;

    /// Set `key` to `value`, optionally expiring after `ttl`.
    ///
    /// A zero `ttl` means no expiration.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Set `key` only if it does not exist; returns whether it was set.
    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool>;

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Add `by` to the integer stored at `key` (absent = 0); returns the new value.
    fn increment(&self, key: &str, by: i64) -> StoreResult<i64>;

    /// Keys matching a glob-style `pattern`.
    fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>>;
}

/// A connection reserved for pub/sub traffic.
///
/// Subscribing to exact channels and to patterns are independent target sets.
/// The control methods return once the store has confirmed the change, so a
/// message published after `subscribe` returns is guaranteed to be seen.
pub trait Subscriber: Send {
    fn subscribe(&mut self, channels: &[String]) -> StoreResult<()>;

    fn psubscribe(&mut self, patterns: &[String]) -> StoreResult<()>;

    fn unsubscribe(&mut self, channels: &[String]) -> StoreResult<()>;

    fn punsubscribe(&mut self, patterns: &[String]) -> StoreResult<()>;

    /// Wait up to `timeout` for the next published payload.
    ///
    /// `Ok(None)` means nothing arrived in time; an `Err` means the connection
    /// is no longer usable.
    fn next_message(&mut self, timeout: Duration) -> StoreResult<Option<RawMessage>>;
}

impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    fn push_front(&self, key: &str, value: &[u8]) -> StoreResult<u64> {
        (**self).push_front(key, value)
    }

    fn pop_back(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).pop_back(key)
    }

    fn blocking_pop_back(&self, key: &str, timeout: Duration) -> StoreResult<Option<Vec<u8>>> {
        (**self).blocking_pop_back(key, timeout)
    }

    fn list_len(&self, key: &str) -> StoreResult<u64> {
        (**self).list_len(key)
    }

    fn delete(&self, keys: &[&str]) -> StoreResult<u64> {
        (**self).delete(keys)
    }

    fn sorted_add(&self, key: &str, member: &[u8], score: f64) -> StoreResult<()> {
        (**self).sorted_add(key, member, score)
    }

    fn range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<Vec<u8>>> {
        (**self).range_by_score(key, min, max)
    }

    fn sorted_remove(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        (**self).sorted_remove(key, member)
    }

    fn sorted_len(&self, key: &str) -> StoreResult<u64> {
        (**self).sorted_len(key)
    }

    fn execute_batch(&self, ops: &[BatchOp]) -> StoreResult<()> {
        (**self).execute_batch(ops)
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<u64> {
        (**self).publish(channel, payload)
    }

    fn subscriber(&self) -> StoreResult<Box<dyn Subscriber>> {
        (**self).subscriber()
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        (**self).set(key, value, ttl)
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool> {
        (**self).set_if_absent(key, value, ttl)
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        (**self).exists(key)
    }

    fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        (**self).increment(key, by)
    }

    fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        (**self).keys_matching(pattern)
    }
}
