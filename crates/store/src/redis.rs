//! Redis-backed store (optional).
//!
//! Command traffic runs over a bounded pool of at most `pool_size`
//! connections; callers wait up to `conn_timeout` for a free one. A blocking
//! pop holds its pooled connection until it returns, so long blocking pops
//! reduce what is left for other commands. Each subscriber gets its own
//! connection outside the pool, because a connection in subscribe mode cannot
//! carry other commands.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use redis::{Connection, IntoConnectionInfo, RedisError, Value};
use tracing::{debug, info, warn};

use skein_core::{StoreError, StoreResult};

use crate::config::StoreConfig;
use crate::pool::ConnectionPool;
use crate::r#trait::{BatchOp, RawMessage, Store, Subscriber};

/// Smallest wait the server can express; a zero BRPOP timeout blocks forever.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// SCAN page size used by [`Store::keys_matching`].
const SCAN_COUNT: usize = 100;

fn map_err(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

fn ttl_millis(ttl: Option<Duration>) -> Option<u64> {
    ttl.filter(|ttl| !ttl.is_zero())
        .map(|ttl| ttl.max(MIN_WAIT).as_millis() as u64)
}

/// Redis store shared by queue, broker and cache components.
pub struct RedisStore {
    client: redis::Client,
    pool: ConnectionPool<Connection>,
    config: StoreConfig,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("db", &self.config.db)
            .field("pool_size", &self.config.pool_size)
            .field("open_connections", &self.pool.open_count())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Open a client for `config` and wait until the server answers.
    ///
    /// Pings up to `conn_attempts` times, pausing `conn_timeout` between
    /// attempts; the last failure is returned if none succeeds.
    pub fn connect(config: StoreConfig) -> StoreResult<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| StoreError::connection(format!("invalid store url: {e}")))?;
        info.redis.db = config.db;

        let client = redis::Client::open(info).map_err(map_err)?;
        let store = Self {
            client,
            pool: ConnectionPool::new(config.pool_size, config.conn_timeout),
            config,
        };

        let mut attempts_left = store.config.conn_attempts.max(1);
        loop {
            match store.ping() {
                Ok(()) => break,
                Err(e) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(e);
                    }
                    warn!(attempts_left, error = %e, "store is trying to connect");
                    thread::sleep(store.config.conn_timeout);
                }
            }
        }

        info!(
            db = store.config.db,
            pool_size = store.config.pool_size,
            "connected to store"
        );
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn ping(&self) -> StoreResult<()> {
        self.with_conn(|conn| redis::cmd("PING").query::<String>(conn).map(|_| ()))
    }

    fn open(&self) -> StoreResult<Connection> {
        self.client
            .get_connection_with_timeout(self.config.conn_timeout)
            .map_err(map_err)
    }

    /// Run `f` on a pooled connection, returning it to the pool unless it broke.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.pool.checkout(|| self.open())?;
        match f(&mut conn) {
            Ok(value) => {
                self.pool.checkin(Some(conn));
                Ok(value)
            }
            Err(e) => {
                let broken = e.is_io_error() || e.is_connection_dropped() || e.is_timeout();
                self.pool.checkin((!broken).then_some(conn));
                Err(map_err(e))
            }
        }
    }
}

impl Store for RedisStore {
    fn push_front(&self, key: &str, value: &[u8]) -> StoreResult<u64> {
        self.with_conn(|conn| redis::cmd("LPUSH").arg(key).arg(value).query(conn))
    }

    fn pop_back(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.with_conn(|conn| redis::cmd("RPOP").arg(key).query(conn))
    }

    /// Holds one pooled connection for up to `timeout`.
    fn blocking_pop_back(&self, key: &str, timeout: Duration) -> StoreResult<Option<Vec<u8>>> {
        if timeout.is_zero() {
            return self.pop_back(key);
        }
        let popped: Option<(String, Vec<u8>)> = self.with_conn(|conn| {
            redis::cmd("BRPOP")
                .arg(key)
                .arg(timeout.max(MIN_WAIT).as_secs_f64())
                .query(conn)
        })?;
        Ok(popped.map(|(_, value)| value))
    }

    fn list_len(&self, key: &str) -> StoreResult<u64> {
        self.with_conn(|conn| redis::cmd("LLEN").arg(key).query(conn))
    }

    fn delete(&self, keys: &[&str]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| redis::cmd("DEL").arg(keys).query(conn))
    }

    fn sorted_add(&self, key: &str, member: &[u8], score: f64) -> StoreResult<()> {
        self.with_conn(|conn| {
            redis::cmd("ZADD")
                .arg(key)
                .arg(score_arg(score))
                .arg(member)
                .query::<i64>(conn)
                .map(|_| ())
        })
    }

    fn range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<Vec<u8>>> {
        self.with_conn(|conn| {
            redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(score_arg(min))
                .arg(score_arg(max))
                .query(conn)
        })
    }

    fn sorted_remove(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        let removed: i64 =
            self.with_conn(|conn| redis::cmd("ZREM").arg(key).arg(member).query(conn))?;
        Ok(removed > 0)
    }

    fn sorted_len(&self, key: &str) -> StoreResult<u64> {
        self.with_conn(|conn| redis::cmd("ZCARD").arg(key).query(conn))
    }

    fn execute_batch(&self, ops: &[BatchOp]) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        // MULTI/EXEC: the server applies the whole batch without interleaving.
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                BatchOp::PushFront { key, value } => {
                    pipe.cmd("LPUSH").arg(key).arg(value).ignore();
                }
                BatchOp::SortedAdd { key, member, score } => {
                    pipe.cmd("ZADD")
                        .arg(key)
                        .arg(score_arg(*score))
                        .arg(member)
                        .ignore();
                }
                BatchOp::SortedRemove { key, member } => {
                    pipe.cmd("ZREM").arg(key).arg(member).ignore();
                }
            }
        }

        self.with_conn(|conn| pipe.query::<()>(conn))
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<u64> {
        self.with_conn(|conn| redis::cmd("PUBLISH").arg(channel).arg(payload).query(conn))
    }

    fn subscriber(&self) -> StoreResult<Box<dyn Subscriber>> {
        let conn = self.open()?;
        debug!("opened dedicated subscriber connection");
        Ok(Box::new(RedisSubscriber {
            conn,
            pending: VecDeque::new(),
            confirm_timeout: self.config.conn_timeout,
        }))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ms) = ttl_millis(ttl) {
            cmd.arg("PX").arg(ms);
        }
        self.with_conn(|conn| cmd.query::<String>(conn).map(|_| ()))
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ms) = ttl_millis(ttl) {
            cmd.arg("PX").arg(ms);
        }
        let reply: Option<String> = self.with_conn(|conn| cmd.query(conn))?;
        Ok(reply.is_some())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.with_conn(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let count: i64 = self.with_conn(|conn| redis::cmd("EXISTS").arg(key).query(conn))?;
        Ok(count > 0)
    }

    fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.with_conn(|conn| redis::cmd("INCRBY").arg(key).arg(by).query(conn))
    }

    fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query(conn)?;
                keys.extend(page);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            // SCAN may report a key more than once.
            keys.sort();
            keys.dedup();
            Ok(keys)
        })
    }
}

/// Kind of a subscribe-mode reply (`"message"`, `"subscribe"`, ...).
fn reply_kind(value: &Value) -> Option<String> {
    match value {
        Value::Bulk(items) => match items.first() {
            Some(Value::Data(kind)) => Some(String::from_utf8_lossy(kind).into_owned()),
            _ => None,
        },
        _ => None,
    }
}

fn to_raw(value: &Value) -> Option<RawMessage> {
    let msg = redis::Msg::from_value(value)?;
    let pattern = if msg.from_pattern() {
        msg.get_pattern::<String>().ok()
    } else {
        None
    };
    Some(RawMessage {
        channel: msg.get_channel_name().to_string(),
        pattern,
        payload: msg.get_payload_bytes().to_vec(),
    })
}

/// Dedicated subscribe-mode connection.
pub struct RedisSubscriber {
    conn: Connection,
    /// Messages read while waiting for a control confirmation.
    pending: VecDeque<RawMessage>,
    confirm_timeout: Duration,
}

impl RedisSubscriber {
    /// Send a (p)(un)subscribe command and wait for one confirmation per target.
    fn control(&mut self, command: &'static str, targets: &[String]) -> StoreResult<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let packed = redis::cmd(command).arg(targets).get_packed_command();
        self.conn.send_packed_command(&packed).map_err(map_err)?;
        self.conn
            .set_read_timeout(Some(self.confirm_timeout))
            .map_err(map_err)?;

        let expected = command.to_ascii_lowercase();
        let mut remaining = targets.len();
        while remaining > 0 {
            let value = self.conn.recv_response().map_err(map_err)?;
            if reply_kind(&value).as_deref() == Some(expected.as_str()) {
                remaining -= 1;
            } else if let Some(message) = to_raw(&value) {
                self.pending.push_back(message);
            }
        }
        Ok(())
    }
}

impl Subscriber for RedisSubscriber {
    fn subscribe(&mut self, channels: &[String]) -> StoreResult<()> {
        self.control("SUBSCRIBE", channels)
    }

    fn psubscribe(&mut self, patterns: &[String]) -> StoreResult<()> {
        self.control("PSUBSCRIBE", patterns)
    }

    fn unsubscribe(&mut self, channels: &[String]) -> StoreResult<()> {
        self.control("UNSUBSCRIBE", channels)
    }

    fn punsubscribe(&mut self, patterns: &[String]) -> StoreResult<()> {
        self.control("PUNSUBSCRIBE", patterns)
    }

    fn next_message(&mut self, timeout: Duration) -> StoreResult<Option<RawMessage>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }

        self.conn
            .set_read_timeout(Some(timeout.max(MIN_WAIT)))
            .map_err(map_err)?;
        match self.conn.recv_response() {
            // Confirmations and pongs carry no payload.
            Ok(value) => Ok(to_raw(&value)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }
}
