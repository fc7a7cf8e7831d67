//! Background promotion of delayed jobs.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use skein_store::Store;

use crate::error::PromoterError;
use crate::queue::JobQueue;

/// Promoter configuration.
#[derive(Debug, Clone)]
pub struct PromoterConfig {
    /// Time between promotion rounds
    pub interval: Duration,
    /// Queues promoted each round
    pub queues: Vec<String>,
    /// Thread name, also used in logs
    pub name: String,
}

impl Default for PromoterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            queues: Vec::new(),
            name: "delayed-promoter".to_string(),
        }
    }
}

impl PromoterConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queues.push(queue.into());
        self
    }

    pub fn with_queues<I, Q>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queues.extend(queues.into_iter().map(Into::into));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Promoter runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromoterStats {
    /// Completed rounds (one round visits every configured queue)
    pub rounds: u64,
    pub jobs_promoted: u64,
    /// Promotion calls that returned an error
    pub failures: u64,
    /// Whole seconds since the promoter was spawned
    pub uptime_secs: u64,
}

/// Handle to a running promoter.
///
/// Dropping the handle without calling [`PromoterHandle::shutdown`] also stops
/// the thread, but does not wait for it.
#[derive(Debug)]
pub struct PromoterHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PromoterStats>>,
    started: Instant,
}

impl PromoterHandle {
    /// Stop the promoter, wait for the current round to finish, and return
    /// the final statistics.
    pub fn shutdown(mut self) -> PromoterStats {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.stats()
    }

    pub fn stats(&self) -> PromoterStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Periodically calls [`JobQueue::promote`] for a set of queues.
///
/// Runs on its own OS thread. Promotion is at-least-once (see
/// [`crate::delayed`]), so normally run one promoter per queue.
pub struct DelayedPromoter<S> {
    queue: JobQueue<S>,
}

impl<S: Store + 'static> DelayedPromoter<S> {
    pub fn new(queue: JobQueue<S>) -> Self {
        Self { queue }
    }

    /// Run a single round over `queues`; returns the number of jobs moved.
    ///
    /// Failures are logged and counted in `stats`, and do not stop the round.
    fn round(&self, queues: &[String], stats: &Mutex<PromoterStats>) -> u64 {
        let mut moved = 0;
        let mut failures = 0;
        for name in queues {
            match self.queue.promote(name) {
                Ok(n) => moved += n as u64,
                Err(e) => {
                    failures += 1;
                    error!(queue = %name, error = %e, "promotion failed");
                }
            }
        }

        let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
        s.rounds += 1;
        s.jobs_promoted += moved;
        s.failures += failures;
        moved
    }

    /// Spawn the promoter in a background thread.
    ///
    /// The first round runs immediately; later rounds run every
    /// `config.interval`.
    pub fn spawn(self, config: PromoterConfig) -> Result<PromoterHandle, PromoterError> {
        if config.queues.is_empty() {
            return Err(PromoterError::NoQueues);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(PromoterStats::default()));
        let thread_stats = stats.clone();
        let started = Instant::now();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || promoter_loop(self, config, shutdown_rx, thread_stats))?;

        Ok(PromoterHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
            started,
        })
    }
}

fn promoter_loop<S: Store + 'static>(
    promoter: DelayedPromoter<S>,
    config: PromoterConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<PromoterStats>>,
) {
    info!(promoter = %config.name, queues = ?config.queues, "delayed promoter started");

    loop {
        let moved = promoter.round(&config.queues, &stats);
        if moved > 0 {
            debug!(promoter = %config.name, moved, "promotion round");
        }

        match shutdown_rx.recv_timeout(config.interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            // Explicit shutdown, or the handle was dropped.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(promoter = %config.name, "delayed promoter stopped");
}
