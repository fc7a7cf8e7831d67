use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, mpsc};
use std::time::{Duration, Instant};

use skein_core::{StoreError, StoreResult};

use crate::glob::glob_match;
use crate::r#trait::{BatchOp, RawMessage, Store, Subscriber};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &[u8], ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_vec(),
            expires_at: ttl
                .filter(|ttl| !ttl.is_zero())
                .map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    sorted: HashMap<String, Vec<(f64, Vec<u8>)>>,
    values: HashMap<String, Entry>,
}

impl State {
    fn purge_expired(&mut self, key: &str) {
        if self
            .values
            .get(key)
            .is_some_and(|e| e.is_expired(Instant::now()))
        {
            self.values.remove(key);
        }
    }

    fn contains(&mut self, key: &str) -> bool {
        self.purge_expired(key);
        self.lists.contains_key(key) || self.sorted.contains_key(key) || self.values.contains_key(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        let existed = self.contains(key);
        self.lists.remove(key);
        self.sorted.remove(key);
        self.values.remove(key);
        existed
    }

    fn push_front(&mut self, key: &str, value: &[u8]) -> u64 {
        let list = self.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_vec());
        list.len() as u64
    }

    fn pop_back(&mut self, key: &str) -> Option<Vec<u8>> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_back();
        // Empty lists cease to exist, as in the remote store.
        if list.is_empty() {
            self.lists.remove(key);
        }
        value
    }

    fn sorted_add(&mut self, key: &str, member: &[u8], score: f64) {
        let set = self.sorted.entry(key.to_string()).or_default();
        match set.iter_mut().find(|(_, m)| m.as_slice() == member) {
            Some(entry) => entry.0 = score,
            None => set.push((score, member.to_vec())),
        }
    }

    fn sorted_remove(&mut self, key: &str, member: &[u8]) -> bool {
        let Some(set) = self.sorted.get_mut(key) else {
            return false;
        };
        let before = set.len();
        set.retain(|(_, m)| m.as_slice() != member);
        let removed = set.len() != before;
        if set.is_empty() {
            self.sorted.remove(key);
        }
        removed
    }

    fn apply(&mut self, op: &BatchOp) {
        match op {
            BatchOp::PushFront { key, value } => {
                self.push_front(key, value);
            }
            BatchOp::SortedAdd { key, member, score } => self.sorted_add(key, member, *score),
            BatchOp::SortedRemove { key, member } => {
                self.sorted_remove(key, member);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Targets {
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

#[derive(Debug)]
struct SubscriberSlot {
    /// Shared with the subscriber; the slot holds the only other reference.
    targets: Arc<Mutex<Targets>>,
    inbox: mpsc::Sender<RawMessage>,
}

impl SubscriberSlot {
    /// Whether the subscriber side has been dropped.
    fn is_released(&self) -> bool {
        Arc::strong_count(&self.targets) == 1
    }
}

/// In-memory store.
///
/// Intended for tests/dev. A single lock guards all data, so every call and
/// every batch is atomic. Blocking pops park on a condvar until a push or the
/// timeout. Pub/sub fans out to per-subscriber channels.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    pushed: Condvar,
    subscribers: Mutex<Vec<SubscriberSlot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::command("lock poisoned"))
    }
}

fn lock_targets(targets: &Mutex<Targets>) -> StoreResult<MutexGuard<'_, Targets>> {
    targets
        .lock()
        .map_err(|_| StoreError::command("lock poisoned"))
}

impl Store for InMemoryStore {
    fn push_front(&self, key: &str, value: &[u8]) -> StoreResult<u64> {
        let len = self.state()?.push_front(key, value);
        self.pushed.notify_all();
        Ok(len)
    }

    fn pop_back(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.state()?.pop_back(key))
    }

    fn blocking_pop_back(&self, key: &str, timeout: Duration) -> StoreResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state()?;
        loop {
            if let Some(value) = state.pop_back(key) {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .pushed
                .wait_timeout(state, deadline - now)
                .map_err(|_| StoreError::command("lock poisoned"))?
                .0;
        }
    }

    fn list_len(&self, key: &str) -> StoreResult<u64> {
        Ok(self
            .state()?
            .lists
            .get(key)
            .map_or(0, |list| list.len() as u64))
    }

    fn delete(&self, keys: &[&str]) -> StoreResult<u64> {
        let mut state = self.state()?;
        Ok(keys.iter().filter(|key| state.remove(key)).count() as u64)
    }

    fn sorted_add(&self, key: &str, member: &[u8], score: f64) -> StoreResult<()> {
        self.state()?.sorted_add(key, member, score);
        Ok(())
    }

    fn range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<Vec<u8>>> {
        let state = self.state()?;
        let Some(set) = state.sorted.get(key) else {
            return Ok(vec![]);
        };

        let mut hits: Vec<_> = set
            .iter()
            .filter(|(score, _)| *score >= min && *score <= max)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(hits.into_iter().map(|(_, member)| member.clone()).collect())
    }

    fn sorted_remove(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        Ok(self.state()?.sorted_remove(key, member))
    }

    fn sorted_len(&self, key: &str) -> StoreResult<u64> {
        Ok(self
            .state()?
            .sorted
            .get(key)
            .map_or(0, |set| set.len() as u64))
    }

    fn execute_batch(&self, ops: &[BatchOp]) -> StoreResult<()> {
        let mut state = self.state()?;
        for op in ops {
            state.apply(op);
        }
        drop(state);

        if ops.iter().any(|op| matches!(op, BatchOp::PushFront { .. })) {
            self.pushed.notify_all();
        }
        Ok(())
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<u64> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::command("lock poisoned"))?;

        subscribers.retain(|slot| !slot.is_released());

        let mut receivers = 0;
        let mut live = Vec::with_capacity(subscribers.len());
        for slot in subscribers.drain(..) {
            let deliveries = {
                let Ok(targets) = slot.targets.lock() else {
                    continue;
                };
                let mut deliveries = Vec::new();
                if targets.channels.contains(channel) {
                    deliveries.push(None);
                }
                deliveries.extend(
                    targets
                        .patterns
                        .iter()
                        .filter(|p| glob_match(p, channel))
                        .map(|p| Some(p.clone())),
                );
                deliveries
            };

            // Drop subscribers whose connection has gone away.
            let mut alive = true;
            for pattern in deliveries {
                let message = RawMessage {
                    channel: channel.to_string(),
                    pattern,
                    payload: payload.to_vec(),
                };
                if slot.inbox.send(message).is_err() {
                    alive = false;
                    break;
                }
                receivers += 1;
            }
            if alive {
                live.push(slot);
            }
        }
        *subscribers = live;

        Ok(receivers)
    }

    fn subscriber(&self) -> StoreResult<Box<dyn Subscriber>> {
        let (tx, rx) = mpsc::channel();
        let targets = Arc::new(Mutex::new(Targets::default()));

        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::command("lock poisoned"))?;
        subscribers.retain(|slot| !slot.is_released());
        subscribers.push(SubscriberSlot {
            targets: targets.clone(),
            inbox: tx,
        });
        drop(subscribers);

        Ok(Box::new(InMemorySubscriber { targets, inbox: rx }))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut state = self.state()?;
        state.remove(key);
        state.values.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool> {
        let mut state = self.state()?;
        if state.contains(key) {
            return Ok(false);
        }
        state.values.insert(key.to_string(), Entry::new(value, ttl));
        Ok(true)
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut state = self.state()?;
        state.purge_expired(key);
        Ok(state.values.get(key).map(|e| e.value.clone()))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.state()?.contains(key))
    }

    fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        let mut state = self.state()?;
        state.purge_expired(key);
        if state.lists.contains_key(key) || state.sorted.contains_key(key) {
            return Err(StoreError::command(format!("{key} holds a non-integer value")));
        }

        let entry = state
            .values
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(b"0", None));
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::command(format!("{key} holds a non-integer value")))?;
        let next = current
            .checked_add(by)
            .ok_or_else(|| StoreError::command("increment would overflow"))?;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }

    fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let state = self.state()?;
        let now = Instant::now();
        let mut keys: Vec<String> = state
            .lists
            .keys()
            .chain(state.sorted.keys())
            .chain(
                state
                    .values
                    .iter()
                    .filter(|(_, e)| !e.is_expired(now))
                    .map(|(k, _)| k),
            )
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Subscriber half of [`InMemoryStore`] pub/sub.
#[derive(Debug)]
pub struct InMemorySubscriber {
    targets: Arc<Mutex<Targets>>,
    inbox: mpsc::Receiver<RawMessage>,
}

impl Subscriber for InMemorySubscriber {
    fn subscribe(&mut self, channels: &[String]) -> StoreResult<()> {
        lock_targets(&self.targets)?
            .channels
            .extend(channels.iter().cloned());
        Ok(())
    }

    fn psubscribe(&mut self, patterns: &[String]) -> StoreResult<()> {
        lock_targets(&self.targets)?
            .patterns
            .extend(patterns.iter().cloned());
        Ok(())
    }

    fn unsubscribe(&mut self, channels: &[String]) -> StoreResult<()> {
        let mut targets = lock_targets(&self.targets)?;
        for channel in channels {
            targets.channels.remove(channel);
        }
        Ok(())
    }

    fn punsubscribe(&mut self, patterns: &[String]) -> StoreResult<()> {
        let mut targets = lock_targets(&self.targets)?;
        for pattern in patterns {
            targets.patterns.remove(pattern);
        }
        Ok(())
    }

    fn next_message(&mut self, timeout: Duration) -> StoreResult<Option<RawMessage>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(StoreError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn lists_are_fifo_when_pushed_front_and_popped_back() {
        let store = InMemoryStore::new();
        store.push_front("q", b"1").unwrap();
        store.push_front("q", b"2").unwrap();

        assert_eq!(store.list_len("q").unwrap(), 2);
        assert_eq!(store.pop_back("q").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.pop_back("q").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.pop_back("q").unwrap(), None);
        assert!(!store.exists("q").unwrap());
    }

    #[test]
    fn blocking_pop_times_out_on_empty_list() {
        let store = InMemoryStore::new();
        let started = Instant::now();

        let value = store
            .blocking_pop_back("q", Duration::from_millis(50))
            .unwrap();

        assert_eq!(value, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn blocking_pop_wakes_on_push_from_another_thread() {
        let store = InMemoryStore::arc();
        let producer = store.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.push_front("q", b"job").unwrap();
        });

        let value = store.blocking_pop_back("q", Duration::from_secs(5)).unwrap();
        handle.join().unwrap();

        assert_eq!(value, Some(b"job".to_vec()));
    }

    #[test]
    fn range_by_score_is_inclusive_and_ordered() {
        let store = InMemoryStore::new();
        store.sorted_add("z", b"c", 30.0).unwrap();
        store.sorted_add("z", b"a", 10.0).unwrap();
        store.sorted_add("z", b"b", 20.0).unwrap();

        let hits = store.range_by_score("z", f64::NEG_INFINITY, 20.0).unwrap();
        assert_eq!(hits, vec![b"a".to_vec(), b"b".to_vec()]);

        // Re-adding a member updates its score instead of duplicating it.
        store.sorted_add("z", b"a", 40.0).unwrap();
        assert_eq!(store.sorted_len("z").unwrap(), 3);
        let hits = store.range_by_score("z", 25.0, f64::INFINITY).unwrap();
        assert_eq!(hits, vec![b"c".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn batch_applies_every_operation() {
        let store = InMemoryStore::new();
        store.sorted_add("q:delayed", b"job", 1.0).unwrap();

        store
            .execute_batch(&[
                BatchOp::PushFront {
                    key: "q".to_string(),
                    value: b"job".to_vec(),
                },
                BatchOp::SortedRemove {
                    key: "q:delayed".to_string(),
                    member: b"job".to_vec(),
                },
            ])
            .unwrap();

        assert_eq!(store.list_len("q").unwrap(), 1);
        assert_eq!(store.sorted_len("q:delayed").unwrap(), 0);
    }

    #[test]
    fn publish_reaches_channel_and_pattern_subscribers() {
        let store = InMemoryStore::new();
        let mut exact = store.subscriber().unwrap();
        exact.subscribe(&["news.sport".to_string()]).unwrap();
        let mut pattern = store.subscriber().unwrap();
        pattern.psubscribe(&["news.*".to_string()]).unwrap();

        let receivers = store.publish("news.sport", b"goal").unwrap();
        assert_eq!(receivers, 2);

        let got = exact.next_message(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(got.channel, "news.sport");
        assert_eq!(got.pattern, None);
        assert_eq!(got.payload, b"goal".to_vec());

        let got = pattern.next_message(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(got.channel, "news.sport");
        assert_eq!(got.pattern.as_deref(), Some("news.*"));
    }

    #[test]
    fn unsubscribed_channels_stop_receiving() {
        let store = InMemoryStore::new();
        let mut sub = store.subscriber().unwrap();
        sub.subscribe(&["a".to_string(), "b".to_string()]).unwrap();
        sub.unsubscribe(&["a".to_string()]).unwrap();

        assert_eq!(store.publish("a", b"x").unwrap(), 0);
        assert_eq!(store.publish("b", b"y").unwrap(), 1);
        assert_eq!(sub.next_message(Duration::from_millis(10)).unwrap().unwrap().channel, "b");
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = InMemoryStore::new();
        let mut sub = store.subscriber().unwrap();
        sub.subscribe(&["a".to_string()]).unwrap();
        drop(sub);

        assert_eq!(store.publish("a", b"x").unwrap(), 0);
        assert!(store.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn released_subscribers_are_pruned_by_unrelated_publishes() {
        let store = InMemoryStore::new();
        for i in 0..1000 {
            let mut sub = store.subscriber().unwrap();
            sub.subscribe(&[format!("room:{i}")]).unwrap();
            drop(sub);
        }

        assert_eq!(store.publish("other", b"x").unwrap(), 0);
        assert!(store.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn opening_a_subscriber_prunes_released_ones() {
        let store = InMemoryStore::new();
        drop(store.subscriber().unwrap());
        drop(store.subscriber().unwrap());

        let _live = store.subscriber().unwrap();
        assert_eq!(store.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn values_expire_after_ttl() {
        let store = InMemoryStore::new();
        store
            .set("session", b"v", Some(Duration::from_millis(20)))
            .unwrap();
        assert!(store.exists("session").unwrap());

        thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("session").unwrap(), None);
        assert!(!store.exists("session").unwrap());
        assert!(store.set_if_absent("session", b"w", None).unwrap());
    }

    #[test]
    fn increment_starts_from_zero_and_rejects_non_integers() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("n", 5).unwrap(), 5);
        assert_eq!(store.increment("n", -2).unwrap(), 3);

        store.set("s", b"abc", None).unwrap();
        assert!(store.increment("s", 1).is_err());
    }

    #[test]
    fn keys_matching_spans_all_key_types() {
        let store = InMemoryStore::new();
        store.set("user:1", b"a", None).unwrap();
        store.push_front("user:queue", b"b").unwrap();
        store.sorted_add("other", b"c", 1.0).unwrap();

        assert_eq!(
            store.keys_matching("user:*").unwrap(),
            vec!["user:1".to_string(), "user:queue".to_string()]
        );
    }
}
