//! Live FIFO queue operations.

use std::time::Duration;

use tracing::{debug, instrument};

use skein_core::{Job, codec};
use skein_store::Store;

use crate::error::QueueError;

pub(crate) const JOB_RECORD: &str = "job";

/// Job queue backed by store lists.
///
/// The store handle is injected and may be shared (e.g. an `Arc`) with other
/// components.
///
/// ## Ordering
///
/// Push always inserts at the front and pop always removes from the back, so a
/// single consumer receives jobs in push order. With several consumers, jobs
/// are handed out in whatever order the store serializes their pops.
#[derive(Debug, Clone)]
pub struct JobQueue<S> {
    pub(crate) store: S,
}

impl<S: Store> JobQueue<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Enqueue `job`, assigning an ID and creation time if unset.
    ///
    /// `job` is updated in place so the caller learns the assigned ID.
    #[instrument(skip(self, job), fields(job_type = %job.kind), err)]
    pub fn push(&self, queue: &str, job: &mut Job) -> Result<(), QueueError> {
        job.ensure_defaults();
        let bytes = codec::encode(JOB_RECORD, job)?;
        let len = self.store.push_front(queue, &bytes)?;
        debug!(job_id = %job.id, queue_len = len, "job enqueued");
        Ok(())
    }

    /// Wait up to `timeout` for a job.
    ///
    /// Returns `Ok(None)` if the queue stayed empty; a zero timeout does not
    /// wait at all. An entry that fails to decode is already removed from the
    /// queue when the error is returned.
    #[instrument(skip(self), err)]
    pub fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let bytes = if timeout.is_zero() {
            self.store.pop_back(queue)?
        } else {
            self.store.blocking_pop_back(queue, timeout)?
        };
        self.decode_popped(bytes)
    }

    /// Take a job if one is available, without waiting.
    #[instrument(skip(self), err)]
    pub fn pop_non_blocking(&self, queue: &str) -> Result<Option<Job>, QueueError> {
        let bytes = self.store.pop_back(queue)?;
        self.decode_popped(bytes)
    }

    /// Number of jobs waiting in the live queue.
    ///
    /// A momentary snapshot; concurrent pushes and pops may change it at once.
    pub fn size(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self.store.list_len(queue)?)
    }

    /// Drop every job in the live queue.
    ///
    /// Delayed jobs are untouched (see [`JobQueue::clear_delayed`]).
    pub fn clear(&self, queue: &str) -> Result<(), QueueError> {
        self.store.delete(&[queue])?;
        Ok(())
    }

    fn decode_popped(&self, bytes: Option<Vec<u8>>) -> Result<Option<Job>, QueueError> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        // The entry is already gone from the list; a decode failure loses it.
        let job: Job = codec::decode(JOB_RECORD, &bytes)?;
        debug!(job_id = %job.id, job_type = %job.kind, "job dequeued");
        Ok(Some(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use chrono::{DateTime, Utc};
    use serde_json::json;
    use skein_core::Payload;
    use skein_store::InMemoryStore;

    fn payload(value: serde_json::Value) -> Payload {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    fn queue() -> JobQueue<Arc<InMemoryStore>> {
        JobQueue::new(InMemoryStore::arc())
    }

    #[test]
    fn push_then_pop_returns_the_job_with_an_assigned_id() {
        let q = queue();
        let mut job = Job::new("email", payload(json!({"to": "a@b.com"})));
        q.push("jobs", &mut job).unwrap();

        let popped = q.pop("jobs", Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(popped.kind, "email");
        assert_eq!(popped.payload, payload(json!({"to": "a@b.com"})));
        assert!(!popped.id.is_empty());
        assert!(popped.created_at.is_some());
        assert_eq!(popped.id, job.id);
    }

    #[test]
    fn explicit_metadata_survives_the_round_trip() {
        let q = queue();
        let at: DateTime<Utc> = "2024-05-06T07:08:09.123Z".parse().unwrap();
        let mut job = Job::new("report", payload(json!({"pages": [1, 2, 3], "draft": true})))
            .with_id("report-42")
            .with_created_at(at)
            .with_retries(3);
        let expected = job.clone();
        q.push("jobs", &mut job).unwrap();

        let popped = q.pop_non_blocking("jobs").unwrap().unwrap();
        assert_eq!(popped, expected);
    }

    #[test]
    fn single_consumer_sees_fifo_order() {
        let q = queue();
        let mut first = Job::new("a", Payload::new()).with_id("j1");
        let mut second = Job::new("b", Payload::new()).with_id("j2");
        q.push("jobs", &mut first).unwrap();
        q.push("jobs", &mut second).unwrap();

        assert_eq!(q.pop_non_blocking("jobs").unwrap().unwrap().id, "j1");
        assert_eq!(q.pop_non_blocking("jobs").unwrap().unwrap().id, "j2");
    }

    #[test]
    fn empty_queue_yields_no_job_rather_than_an_error() {
        let q = queue();
        assert!(q.pop_non_blocking("jobs").unwrap().is_none());
        assert!(q.pop("jobs", Duration::from_millis(20)).unwrap().is_none());
        assert!(q.pop("jobs", Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn blocking_pop_receives_a_job_pushed_while_waiting() {
        let q = queue();
        let producer = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let mut job = Job::new("late", Payload::new());
            producer.push("jobs", &mut job).unwrap();
        });

        let popped = q.pop("jobs", Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(popped.unwrap().kind, "late");
    }

    #[test]
    fn size_and_clear() {
        let q = queue();
        for _ in 0..3 {
            q.push("jobs", &mut Job::new("x", Payload::new())).unwrap();
        }
        assert_eq!(q.size("jobs").unwrap(), 3);

        q.clear("jobs").unwrap();
        assert_eq!(q.size("jobs").unwrap(), 0);
        assert!(q.pop_non_blocking("jobs").unwrap().is_none());
    }

    #[test]
    fn undecodable_entries_surface_as_serialization_errors() {
        let q = queue();
        q.store().push_front("jobs", b"not a job").unwrap();

        let err = q.pop_non_blocking("jobs").unwrap_err();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: type, payload, id and retries survive push/pop unchanged.
            #[test]
            fn push_pop_preserves_job(
                kind in "[a-z_]{1,16}",
                id in "[a-z0-9-]{1,24}",
                key in "[a-z]{1,8}",
                number in any::<i64>(),
                text in ".{0,32}",
                retries in 0u32..100
            ) {
                let q = queue();
                let mut data = Payload::new();
                data.insert(key.clone(), json!({"n": number, "s": text}));
                let mut job = Job::new(kind.clone(), data.clone())
                    .with_id(id.clone())
                    .with_retries(retries);
                q.push("jobs", &mut job).unwrap();

                let popped = q.pop_non_blocking("jobs").unwrap().unwrap();
                prop_assert_eq!(popped.kind, kind);
                prop_assert_eq!(popped.id, id);
                prop_assert_eq!(popped.payload, data);
                prop_assert_eq!(popped.retries, retries);
                prop_assert_eq!(popped.created_at, job.created_at);
            }
        }
    }
}
