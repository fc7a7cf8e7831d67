//! Subscription delivery pipeline.
//!
//! ```text
//! store connection ──next_message──▶ forwarder thread ──decode──▶ buffer (100) ──▶ consumer
//!                                          ▲
//!                    unsubscribe / close ──┘ control channel
//! ```
//!
//! The forwarder owns the store connection. The consumer side talks to it only
//! through the control channel, so connection state is never shared.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use skein_core::{Message, StoreError, StoreResult};
use skein_store::{RawMessage, Subscriber};

use crate::error::BrokerError;

/// Messages the forwarder may hold before it stops reading the connection.
pub const DELIVERY_BUFFER: usize = 100;

/// How long one read of the connection waits before control is re-checked.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a full buffer is waited on before the send is retried.
const FULL_BUFFER_WAIT: Duration = Duration::from_millis(5);

/// What a subscription listens to; fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Exact channel names
    Channels,
    /// Glob patterns over channel names
    Patterns,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Channels => f.write_str("channels"),
            SubscriptionKind::Patterns => f.write_str("patterns"),
        }
    }
}

enum Control {
    Remove {
        targets: Vec<String>,
        reply: Sender<StoreResult<()>>,
    },
    Close,
}

enum Flow {
    Continue,
    Stop,
}

/// A live subscription to channels or patterns.
///
/// Messages are read with [`recv`](Subscription::recv) and friends. Reads
/// report end-of-stream (`None`, or `Disconnected`) once the subscription is
/// closed and the buffer has been drained, or after the store connection
/// failed.
///
/// Dropping a subscription closes it.
///
/// ## Thread Safety
///
/// A subscription is meant for one consuming thread; it can be moved to
/// another thread but not shared.
pub struct Subscription {
    kind: SubscriptionKind,
    targets: Vec<String>,
    messages: Receiver<Message>,
    control: Option<Sender<Control>>,
    forwarder: Option<thread::JoinHandle<()>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("targets", &self.targets)
            .field("closed", &self.control.is_none())
            .finish()
    }
}

impl Subscription {
    /// Subscribe `connection` to `targets` and start forwarding.
    ///
    /// Returns once the store has confirmed the subscription.
    pub(crate) fn start(
        mut connection: Box<dyn Subscriber>,
        kind: SubscriptionKind,
        targets: Vec<String>,
    ) -> Result<Self, BrokerError> {
        if targets.is_empty() {
            return Err(BrokerError::NoTargets(kind));
        }
        match kind {
            SubscriptionKind::Channels => connection.subscribe(&targets)?,
            SubscriptionKind::Patterns => connection.psubscribe(&targets)?,
        }

        let (message_tx, message_rx) = mpsc::sync_channel(DELIVERY_BUFFER);
        let (control_tx, control_rx) = mpsc::channel();
        let forwarder = Forwarder {
            connection,
            kind,
            messages: message_tx,
            control: control_rx,
        };
        let join = thread::Builder::new()
            .name("skein-subscription".to_string())
            .spawn(move || forwarder.run())?;

        debug!(%kind, ?targets, "subscription started");
        Ok(Self {
            kind,
            targets,
            messages: message_rx,
            control: Some(control_tx),
            forwarder: Some(join),
        })
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Channels or patterns currently subscribed to.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Wait for the next message; `None` means end-of-stream.
    pub fn recv(&self) -> Option<Message> {
        self.messages.recv().ok()
    }

    pub fn try_recv(&self) -> Result<Message, TryRecvError> {
        self.messages.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        self.messages.recv_timeout(timeout)
    }

    /// Blocking iterator over messages; ends at end-of-stream.
    pub fn iter(&self) -> impl Iterator<Item = Message> + '_ {
        self.messages.iter()
    }

    /// Stop listening to some channels; an empty slice removes all of them.
    ///
    /// The subscription stays open even when no targets remain.
    pub fn unsubscribe(&mut self, channels: &[&str]) -> Result<(), BrokerError> {
        self.remove(SubscriptionKind::Channels, channels)
    }

    /// Stop listening to some patterns; an empty slice removes all of them.
    pub fn punsubscribe(&mut self, patterns: &[&str]) -> Result<(), BrokerError> {
        self.remove(SubscriptionKind::Patterns, patterns)
    }

    fn remove(&mut self, requested: SubscriptionKind, targets: &[&str]) -> Result<(), BrokerError> {
        if requested != self.kind {
            return Err(BrokerError::TargetKind {
                actual: self.kind,
                requested,
            });
        }
        let control = self.control.as_ref().ok_or(BrokerError::Closed)?;

        let targets: Vec<String> = if targets.is_empty() {
            self.targets.clone()
        } else {
            targets.iter().map(|t| t.to_string()).collect()
        };
        if targets.is_empty() {
            return Ok(());
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        control
            .send(Control::Remove {
                targets: targets.clone(),
                reply: reply_tx,
            })
            .map_err(|_| BrokerError::Closed)?;
        // A dropped reply means the forwarder has already stopped.
        reply_rx.recv().map_err(|_| BrokerError::Closed)??;

        self.targets.retain(|t| !targets.contains(t));
        debug!(kind = %self.kind, ?targets, "targets removed");
        Ok(())
    }

    /// Release the store connection and stop forwarding.
    ///
    /// Returns once the forwarder has exited. Messages already buffered stay
    /// readable; reads after that report end-of-stream. Closing twice is a
    /// no-op.
    pub fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Close);
        }
        if let Some(join) = self.forwarder.take() {
            let _ = join.join();
            debug!(kind = %self.kind, "subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

struct Forwarder {
    connection: Box<dyn Subscriber>,
    kind: SubscriptionKind,
    messages: SyncSender<Message>,
    control: Receiver<Control>,
}

impl Forwarder {
    fn run(mut self) {
        loop {
            match self.control.try_recv() {
                Ok(command) => {
                    if let Flow::Stop = self.handle(command) {
                        break;
                    }
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }

            match self.connection.next_message(POLL_INTERVAL) {
                Ok(Some(raw)) => {
                    let message = decode(raw);
                    if let Flow::Stop = self.deliver(message) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(kind = %self.kind, error = %e, "subscription connection failed");
                    break;
                }
            }
        }
        // Dropping `self` releases the connection and closes the stream.
    }

    /// Push `message` into the buffer, serving control requests while it is full.
    fn deliver(&mut self, mut message: Message) -> Flow {
        loop {
            match self.messages.try_send(message) {
                Ok(()) => return Flow::Continue,
                Err(TrySendError::Disconnected(_)) => return Flow::Stop,
                Err(TrySendError::Full(pending)) => {
                    message = pending;
                    match self.control.recv_timeout(FULL_BUFFER_WAIT) {
                        Ok(command) => {
                            if let Flow::Stop = self.handle(command) {
                                return Flow::Stop;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => return Flow::Stop,
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: Control) -> Flow {
        match command {
            Control::Remove { targets, reply } => {
                let result = match self.kind {
                    SubscriptionKind::Channels => self.connection.unsubscribe(&targets),
                    SubscriptionKind::Patterns => self.connection.punsubscribe(&targets),
                };
                let failed = matches!(result, Err(StoreError::Connection(_) | StoreError::Closed));
                let _ = reply.send(result);
                if failed {
                    warn!(kind = %self.kind, "subscription connection failed");
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
            Control::Close => Flow::Stop,
        }
    }
}

/// Turn a raw payload into exactly one message.
fn decode(raw: RawMessage) -> Message {
    Message::decode_or_else(&raw.channel, &raw.payload, |e| {
        warn!(channel = %raw.channel, error = %e, "undecodable payload, delivering raw");
    })
}
