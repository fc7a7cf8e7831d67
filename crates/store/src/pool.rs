//! Bounded pool of command connections.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use skein_core::{StoreError, StoreResult};

#[derive(Debug)]
struct PoolState<C> {
    idle: Vec<C>,
    in_use: usize,
}

/// At most `max_size` connections exist at once, idle or checked out.
///
/// A caller that finds every connection checked out waits up to `wait` for
/// one to come back, then fails with [`StoreError::Connection`].
#[derive(Debug)]
pub(crate) struct ConnectionPool<C> {
    state: Mutex<PoolState<C>>,
    released: Condvar,
    max_size: usize,
    wait: Duration,
}

impl<C> ConnectionPool<C> {
    pub(crate) fn new(max_size: usize, wait: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                in_use: 0,
            }),
            released: Condvar::new(),
            max_size: max_size.max(1),
            wait,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, PoolState<C>>> {
        self.state
            .lock()
            .map_err(|_| StoreError::command("lock poisoned"))
    }

    /// Take an idle connection, open a new one while under the limit, or wait.
    pub(crate) fn checkout(&self, open: impl FnOnce() -> StoreResult<C>) -> StoreResult<C> {
        let deadline = Instant::now() + self.wait;
        let mut state = self.lock()?;
        loop {
            if let Some(conn) = state.idle.pop() {
                state.in_use += 1;
                return Ok(conn);
            }
            if state.in_use < self.max_size {
                state.in_use += 1;
                drop(state);
                return open().inspect_err(|_| self.release_slot());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::connection(format!(
                    "all {} pooled connections are in use",
                    self.max_size
                )));
            }
            state = self
                .released
                .wait_timeout(state, deadline - now)
                .map_err(|_| StoreError::command("lock poisoned"))?
                .0;
        }
    }

    /// Return a connection; `None` means it broke and is discarded.
    pub(crate) fn checkin(&self, conn: Option<C>) {
        if let Ok(mut state) = self.state.lock() {
            state.in_use = state.in_use.saturating_sub(1);
            if let Some(conn) = conn {
                state.idle.push(conn);
            }
        }
        self.released.notify_one();
    }

    fn release_slot(&self) {
        self.checkin(None);
    }

    /// Connections currently open, idle or checked out.
    pub(crate) fn open_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.idle.len() + state.in_use)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn connections_are_reused() {
        let pool = ConnectionPool::new(2, Duration::from_millis(10));
        let opened = AtomicUsize::new(0);
        let open = || Ok::<_, StoreError>(opened.fetch_add(1, Ordering::SeqCst));

        let first = pool.checkout(open).unwrap();
        pool.checkin(Some(first));
        let again = pool.checkout(open).unwrap();

        assert_eq!(again, first);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = ConnectionPool::new(1, Duration::from_millis(30));
        let _held = pool.checkout(|| Ok(())).unwrap();

        let started = Instant::now();
        let err = pool.checkout(|| Ok(())).unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn waiter_gets_a_returned_connection() {
        let pool = Arc::new(ConnectionPool::new(1, Duration::from_secs(5)));
        let held = pool.checkout(|| Ok(7)).unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.checkout(|| Ok(99)))
        };
        thread::sleep(Duration::from_millis(30));
        pool.checkin(Some(held));

        assert_eq!(waiter.join().unwrap().unwrap(), 7);
    }

    #[test]
    fn broken_connections_free_their_slot() {
        let pool = ConnectionPool::new(1, Duration::from_millis(10));
        let _ = pool.checkout(|| Ok(1)).unwrap();
        pool.checkin(None);

        assert_eq!(pool.open_count(), 0);
        assert_eq!(pool.checkout(|| Ok(2)).unwrap(), 2);
    }

    #[test]
    fn failed_open_frees_its_slot() {
        let pool: ConnectionPool<u32> = ConnectionPool::new(1, Duration::from_millis(10));
        assert!(pool.checkout(|| Err(StoreError::connection("refused"))).is_err());
        assert_eq!(pool.checkout(|| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn concurrent_callers_never_exceed_the_limit() {
        const CALLERS: usize = 20;
        const LIMIT: usize = 4;

        let pool = Arc::new(ConnectionPool::new(LIMIT, Duration::from_secs(5)));
        let opened = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                let (pool, opened, peak, barrier) =
                    (pool.clone(), opened.clone(), peak.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    let conn = pool
                        .checkout(|| Ok(opened.fetch_add(1, Ordering::SeqCst)))
                        .unwrap();
                    peak.fetch_max(pool.open_count(), Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    pool.checkin(Some(conn));
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }

        assert!(opened.load(Ordering::SeqCst) <= LIMIT);
        assert!(peak.load(Ordering::SeqCst) <= LIMIT);
    }
}
