//! Delayed scheduling and promotion.
//!
//! ## Delivery guarantee
//!
//! Promotion reads the ready entries and then moves them in one atomic batch.
//! The read and the move are two separate store calls, so two promoters
//! running against the same queue may both read an entry before either
//! removes it. Both then push it to the live queue: promotion is
//! **at-least-once**. An entry is only removed from the delayed set in the
//! same batch that pushes it, so a ready entry is never lost. Consumers that
//! need exactly-once processing must de-duplicate by job ID; normally run a
//! single promoter per queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use skein_core::{Job, codec};
use skein_store::{BatchOp, Store};

use crate::error::QueueError;
use crate::queue::{JOB_RECORD, JobQueue};

/// Name of the sorted set holding `queue`'s delayed jobs.
pub fn delayed_key(queue: &str) -> String {
    format!("{queue}:delayed")
}

fn ready_score(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64
}

impl<S: Store> JobQueue<S> {
    /// Schedule `job` to become poppable after `delay`.
    ///
    /// The ready time is fixed now, at whole-second granularity.
    pub fn push_delayed(&self, queue: &str, job: &mut Job, delay: Duration) -> Result<(), QueueError> {
        let ready_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.push_delayed_at(queue, job, ready_at)
    }

    /// Schedule `job` to become poppable at `ready_at`.
    #[instrument(skip(self, job), fields(job_type = %job.kind), err)]
    pub fn push_delayed_at(
        &self,
        queue: &str,
        job: &mut Job,
        ready_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        job.ensure_defaults();
        let bytes = codec::encode(JOB_RECORD, job)?;
        self.store
            .sorted_add(&delayed_key(queue), &bytes, ready_score(ready_at))?;
        debug!(job_id = %job.id, %ready_at, "job scheduled");
        Ok(())
    }

    /// Move every delayed job whose ready time has passed into the live queue.
    ///
    /// Returns how many entries were moved (0 if none were ready). See the
    /// module docs for the at-least-once guarantee under concurrent callers.
    #[instrument(skip(self), err)]
    pub fn promote(&self, queue: &str) -> Result<usize, QueueError> {
        let delayed = delayed_key(queue);
        let now = ready_score(Utc::now());

        let ready = self.store.range_by_score(&delayed, f64::NEG_INFINITY, now)?;
        if ready.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(ready.len() * 2);
        for entry in &ready {
            ops.push(BatchOp::PushFront {
                key: queue.to_string(),
                value: entry.clone(),
            });
            ops.push(BatchOp::SortedRemove {
                key: delayed.clone(),
                member: entry.clone(),
            });
        }
        self.store.execute_batch(&ops)?;

        info!(queue, promoted = ready.len(), "promoted delayed jobs");
        Ok(ready.len())
    }

    /// Number of jobs waiting in the delayed set.
    pub fn delayed_size(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self.store.sorted_len(&delayed_key(queue))?)
    }

    /// Drop every delayed job of `queue`.
    pub fn clear_delayed(&self, queue: &str) -> Result<(), QueueError> {
        self.store.delete(&[delayed_key(queue).as_str()])?;
        Ok(())
    }
}
