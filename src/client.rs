//! Command client: FIFO request/response multiplexing over one connection.
//!
//! A [`Client`] handle is a cheap clone that talks to a single driver task.
//! The driver exclusively owns the socket, the parser continuation and the
//! pending-request queue; callers submit pre-encoded request bytes over an
//! mpsc channel and receive their replies over per-request oneshot channels.
//!
//! Correlation is strictly FIFO: every accepted write pushes exactly one
//! queue entry (a single request or a pipeline expecting N replies), and
//! every inbound value belongs to the head entry. A reply with nothing
//! pending means the framing is broken and the driver terminates; silent
//! recovery would mask the bug.

use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ConnectOptions;
use crate::connection::bootstrap::{self, Connection};
use crate::error::{Error, Result};
use crate::resp::Value;

/// One command's outcome: the decoded value, or the server's error payload
/// (which does not disturb the connection), or a transport failure.
pub type Reply = std::result::Result<Value, Error>;

/// Handle to a command-client driver.
#[derive(Debug, Clone)]
pub struct Client {
    tx: mpsc::UnboundedSender<Op>,
}

impl Client {
    /// Bootstrap a connection and spawn the driver.
    ///
    /// Handshake failures (dial, TLS, AUTH, SELECT) surface here; after a
    /// successful return the driver owns the connection and reconnects per
    /// `options.reconnect`.
    pub async fn connect(options: ConnectOptions) -> Result<Self> {
        let conn = bootstrap::establish(&options).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let span = match &options.name {
            Some(name) => info_span!("redis_client", name = %name),
            None => info_span!("redis_client"),
        };
        let driver = Driver {
            options,
            rx,
            conn: Some(conn),
            queue: VecDeque::new(),
            events: VecDeque::new(),
            connected_at: Instant::now(),
            retry_at: Instant::now(),
        };
        tokio::spawn(driver.run().instrument(span));
        Ok(Self { tx })
    }

    /// Submit one encoded command and await its reply.
    ///
    /// Returns `Err(Error::Redis(_))` when the server answers with an error
    /// reply, `Err(Error::NoConnection)` when submitted while disconnected.
    pub async fn request(&self, command: impl Into<Vec<u8>>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Op::Request {
                bytes: command.into(),
                tx,
            })
            .map_err(|_| Error::NoConnection)?;
        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Stopped),
        }
    }

    /// Submit `count` concatenated commands as one write and await the full
    /// reply list, in wire-arrival order.
    ///
    /// The outer `Err` is reserved for connection-level failures; per-command
    /// server errors come back inside the list.
    pub async fn pipeline(
        &self,
        commands: impl Into<Vec<u8>>,
        count: u32,
    ) -> Result<Vec<Reply>> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Op::Pipeline {
                bytes: commands.into(),
                count,
                tx,
            })
            .map_err(|_| Error::NoConnection)?;
        match rx.await {
            Ok(replies) => replies,
            Err(_) => Err(Error::Stopped),
        }
    }

    /// Terminate the driver. Pending requests fail with [`Error::Stopped`].
    pub fn stop(&self) {
        let _ = self.tx.send(Op::Stop);
    }
}

// ── Driver ─────────────────────────────────────────────────────────

enum Op {
    Request {
        bytes: Vec<u8>,
        tx: oneshot::Sender<Reply>,
    },
    Pipeline {
        bytes: Vec<u8>,
        count: u32,
        tx: oneshot::Sender<Result<Vec<Reply>>>,
    },
    Stop,
}

/// A queue entry awaiting replies. `Pipeline.acc` grows in arrival order,
/// which equals submission order.
enum Pending {
    Single(oneshot::Sender<Reply>),
    Pipeline {
        remaining: u32,
        acc: Vec<Reply>,
        tx: oneshot::Sender<Result<Vec<Reply>>>,
    },
}

impl Pending {
    /// Propagate a connection-level failure. Delivery to an abandoned caller
    /// (dropped receiver) is a no-op.
    fn fail(self, reason: Error) {
        match self {
            Self::Single(tx) => {
                let _ = tx.send(Err(reason));
            }
            Self::Pipeline { tx, .. } => {
                let _ = tx.send(Err(reason));
            }
        }
    }
}

/// Deferred work the driver posts to itself, drained at the top of the loop
/// before any new input is accepted.
enum Event {
    Disconnected(Error),
}

enum Step {
    Op(Option<Op>),
    Inbound(Result<()>),
    Retry,
}

struct Driver {
    options: ConnectOptions,
    rx: mpsc::UnboundedReceiver<Op>,
    conn: Option<Connection>,
    queue: VecDeque<Pending>,
    events: VecDeque<Event>,
    /// When the current connection was established; the reconnect cooldown
    /// is armed from this point, so a failure right after connect (e.g. a
    /// TLS 1.3 certificate rejection surfacing on first read) cannot cause a
    /// tight redial loop.
    connected_at: Instant,
    /// Earliest moment the next reconnect attempt may run.
    retry_at: Instant,
}

impl Driver {
    async fn run(mut self) {
        loop {
            if let Some(Event::Disconnected(reason)) = self.events.pop_front() {
                if !self.enter_disconnected(reason) {
                    return;
                }
                continue;
            }

            let step = match self.conn.as_mut() {
                Some(conn) => {
                    tokio::select! {
                        biased;
                        op = self.rx.recv() => Step::Op(op),
                        inbound = conn.recv() => Step::Inbound(inbound),
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        op = self.rx.recv() => Step::Op(op),
                        _ = tokio::time::sleep_until(self.retry_at) => Step::Retry,
                    }
                }
            };

            match step {
                // All handles dropped: same clean teardown as an explicit stop.
                Step::Op(None) | Step::Op(Some(Op::Stop)) => {
                    self.shutdown().await;
                    return;
                }
                Step::Op(Some(op)) => self.handle_op(op).await,
                Step::Inbound(Ok(())) => {
                    if let Err(e) = self.drain_replies() {
                        // Request framing is broken. Fatal by design: exit
                        // rather than mask the bug by reconnecting.
                        error!(error = %e, "terminating");
                        if let Some(conn) = self.conn.take() {
                            drop(conn);
                        }
                        return;
                    }
                    // Falling through re-enters the select, which re-arms the
                    // next socket read only now that this chunk is processed.
                }
                Step::Inbound(Err(e)) => self.events.push_back(Event::Disconnected(e)),
                Step::Retry => self.try_connect().await,
            }
        }
    }

    async fn handle_op(&mut self, op: Op) {
        match op {
            Op::Request { bytes, tx } => match self.write(&bytes).await {
                Write::Done => self.queue.push_back(Pending::Single(tx)),
                Write::NoConnection => {
                    let _ = tx.send(Err(Error::NoConnection));
                }
                Write::Failed(e) => {
                    let _ = tx.send(Err(e.clone()));
                    self.events.push_back(Event::Disconnected(e));
                }
            },
            Op::Pipeline { bytes, count, tx } => {
                if count == 0 {
                    let _ = tx.send(Ok(Vec::new()));
                    return;
                }
                match self.write(&bytes).await {
                    Write::Done => self.queue.push_back(Pending::Pipeline {
                        remaining: count,
                        acc: Vec::with_capacity(count as usize),
                        tx,
                    }),
                    Write::NoConnection => {
                        let _ = tx.send(Err(Error::NoConnection));
                    }
                    Write::Failed(e) => {
                        let _ = tx.send(Err(e.clone()));
                        self.events.push_back(Event::Disconnected(e));
                    }
                }
            }
            Op::Stop => {}
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Write {
        match self.conn.as_mut() {
            None => Write::NoConnection,
            Some(conn) => match conn.send(bytes).await {
                Ok(()) => Write::Done,
                Err(e) => Write::Failed(e),
            },
        }
    }

    /// Dispatch every complete value buffered by the decoder.
    ///
    /// `Err` is a protocol-integrity violation and terminates the driver;
    /// ordinary transport failures go through the disconnect event instead.
    fn drain_replies(&mut self) -> Result<()> {
        loop {
            let next = match self.conn.as_mut() {
                Some(conn) => conn.try_next_value(),
                None => return Ok(()),
            };
            match next {
                Ok(Some(value)) => self.reply_value(value)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.events.push_back(Event::Disconnected(e));
                    return Ok(());
                }
            }
        }
    }

    /// Deliver one inbound value to the head queue entry.
    ///
    /// A reply while nothing is pending means the server and the queue have
    /// lost sync: [`Error::EmptyQueue`], fatal.
    fn reply_value(&mut self, value: Value) -> Result<()> {
        let reply = match value {
            Value::Error(msg) => Err(Error::Redis(msg)),
            v => Ok(v),
        };
        match self.queue.pop_front() {
            None => Err(Error::EmptyQueue),
            Some(Pending::Single(tx)) => {
                let _ = tx.send(reply);
                Ok(())
            }
            Some(Pending::Pipeline { remaining, mut acc, tx }) => {
                acc.push(reply);
                if remaining <= 1 {
                    let _ = tx.send(Ok(acc));
                } else {
                    self.queue.push_front(Pending::Pipeline {
                        remaining: remaining - 1,
                        acc,
                        tx,
                    });
                }
                Ok(())
            }
        }
    }

    /// Fail all pending entries and either schedule a reconnect or stop.
    /// Returns false when the driver must terminate.
    fn enter_disconnected(&mut self, reason: Error) -> bool {
        if let Some(conn) = self.conn.take() {
            drop(conn);
        }
        for pending in self.queue.drain(..) {
            pending.fail(reason.clone());
        }
        match self.options.reconnect {
            None => {
                info!(error = %reason, "connection lost, reconnect disabled, stopping");
                false
            }
            Some(cooldown) => {
                warn!(error = %reason, "connection lost");
                // Cooldown was armed at connect time: a failure within
                // `cooldown` of connecting waits out the remainder, anything
                // later retries immediately.
                let earliest = self.connected_at + cooldown;
                let now = Instant::now();
                self.retry_at = if earliest > now { earliest } else { now };
                true
            }
        }
    }

    async fn try_connect(&mut self) {
        match bootstrap::establish(&self.options).await {
            Ok(conn) => {
                info!("reconnected");
                self.conn = Some(conn);
                self.connected_at = Instant::now();
            }
            Err(e) => {
                debug!(error = %e, "reconnect attempt failed");
                if let Some(cooldown) = self.options.reconnect {
                    self.retry_at = Instant::now() + cooldown;
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        for pending in self.queue.drain(..) {
            pending.fail(Error::Stopped);
        }
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
    }
}

enum Write {
    Done,
    NoConnection,
    Failed(Error),
}

// ── Tests ──────────────────────────────────────────────────────────
