//! Subscription client: server-pushed messages with ack-gated delivery.
//!
//! Shares the bootstrap and parser with the command client but replaces the
//! pending-request queue with a channel registry and a bounded push queue.
//! Exactly one `message`/`pmessage` is in flight to the consumer at a time;
//! the next one is withheld until [`Subscriber::ack`]. Server acknowledgments
//! and transport transitions bypass the gate.
//!
//! On reconnect the current subscribe/psubscribe sets are replayed before
//! [`PushMessage::Connected`] is announced, so the consumer never observes a
//! connected-but-unsubscribed window.

use bytes::Bytes;
use std::collections::{BTreeSet, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{ConnectOptions, QueueBehaviour};
use crate::connection::bootstrap::{self, Connection};
use crate::error::{Error, Result};
use crate::resp::writer::encode_command;
use crate::resp::Value;

/// Events delivered to the consumer.
///
/// `Message` and `PMessage` must be acknowledged before the next one is
/// delivered; all other events are informational and unthrottled.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Message { channel: Bytes, payload: Bytes },
    PMessage { pattern: Bytes, channel: Bytes, payload: Bytes },
    Subscribed { channel: Bytes },
    Unsubscribed { channel: Bytes },
    /// Emitted once after the queue drained, naming how many messages were
    /// discarded under the `Drop` overflow policy.
    Dropped { count: u64 },
    Connected,
    Disconnected,
}

/// Handle to a subscription-client driver.
#[derive(Debug, Clone)]
pub struct Subscriber {
    tx: mpsc::UnboundedSender<SubOp>,
}

impl Subscriber {
    /// Bootstrap a connection, spawn the driver, and return the handle plus
    /// the initial consumer's event stream.
    pub async fn connect(
        options: ConnectOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PushMessage>)> {
        let conn = bootstrap::establish(&options).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
        let span = match &options.name {
            Some(name) => info_span!("redis_subscriber", name = %name),
            None => info_span!("redis_subscriber"),
        };
        let driver = SubDriver {
            options,
            rx,
            conn: Some(conn),
            consumer: consumer_tx,
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
            queue: VecDeque::new(),
            awaiting_ack: false,
            dropped: 0,
            events: VecDeque::new(),
            connected_at: Instant::now(),
            retry_at: Instant::now(),
        };
        tokio::spawn(driver.run().instrument(span));
        Ok((Self { tx }, consumer_rx))
    }

    /// Subscribe to channels. Returns immediately; `Subscribed` events arrive
    /// as the server acknowledges.
    pub fn subscribe<I, S>(&self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send_op(SubOp::Subscribe(collect(channels)))
    }

    /// Unsubscribe from channels.
    pub fn unsubscribe<I, S>(&self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send_op(SubOp::Unsubscribe(collect(channels)))
    }

    /// Subscribe to patterns.
    pub fn psubscribe<I, S>(&self, patterns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send_op(SubOp::PSubscribe(collect(patterns)))
    }

    /// Unsubscribe from patterns.
    pub fn punsubscribe<I, S>(&self, patterns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send_op(SubOp::PUnsubscribe(collect(patterns)))
    }

    /// Acknowledge the last `Message`/`PMessage`, releasing the next one.
    pub fn ack(&self) -> Result<()> {
        self.send_op(SubOp::Ack)
    }

    /// Hand the push stream to a new consumer.
    ///
    /// The swap is sequenced through the driver's op queue, so every event
    /// dispatched before this call resolves went to the old receiver and
    /// every later one goes to the returned receiver, with nothing lost in
    /// between.
    pub async fn controlling_process(&self) -> Result<mpsc::UnboundedReceiver<PushMessage>> {
        let (consumer, rx) = mpsc::unbounded_channel();
        let (done, wait) = oneshot::channel();
        self.send_op(SubOp::Control { consumer, done })?;
        wait.await.map_err(|_| Error::Stopped)?;
        Ok(rx)
    }

    /// Terminate the driver.
    pub fn stop(&self) {
        let _ = self.tx.send(SubOp::Stop);
    }

    fn send_op(&self, op: SubOp) -> Result<()> {
        self.tx.send(op).map_err(|_| Error::NoConnection)
    }
}

fn collect<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

// ── Driver ─────────────────────────────────────────────────────────

enum SubOp {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    PSubscribe(Vec<String>),
    PUnsubscribe(Vec<String>),
    Ack,
    Control {
        consumer: mpsc::UnboundedSender<PushMessage>,
        done: oneshot::Sender<()>,
    },
    Stop,
}

enum Event {
    Disconnected(Error),
}

enum Step {
    Op(Option<SubOp>),
    Inbound(Result<()>),
    Retry,
}

struct SubDriver {
    options: ConnectOptions,
    rx: mpsc::UnboundedReceiver<SubOp>,
    conn: Option<Connection>,
    consumer: mpsc::UnboundedSender<PushMessage>,
    channels: BTreeSet<String>,
    patterns: BTreeSet<String>,
    /// Messages received but not yet released to the consumer.
    queue: VecDeque<PushMessage>,
    awaiting_ack: bool,
    /// Messages discarded since the last `Dropped` notice.
    dropped: u64,
    events: VecDeque<Event>,
    connected_at: Instant,
    retry_at: Instant,
}

impl SubDriver {
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
                Step::Op(None) | Step::Op(Some(SubOp::Stop)) => {
                    if let Some(conn) = self.conn.take() {
                        conn.close().await;
                    }
                    return;
                }
                Step::Op(Some(op)) => self.handle_op(op).await,
                Step::Inbound(Ok(())) => {
                    if let Err(e) = self.drain_pushes() {
                        // Overflow under the `Exit` policy: announce the loss
                        // and die so a supervisor can decide what to do.
                        error!(error = %e, "terminating");
                        self.send_direct(PushMessage::Disconnected);
                        return;
                    }
                }
                Step::Inbound(Err(e)) => self.events.push_back(Event::Disconnected(e)),
                Step::Retry => self.try_connect().await,
            }
        }
    }

    async fn handle_op(&mut self, op: SubOp) {
        match op {
            SubOp::Subscribe(names) => {
                self.channels.extend(names.iter().cloned());
                self.send_registry_command(b"SUBSCRIBE", &names).await;
            }
            SubOp::Unsubscribe(names) => {
                for name in &names {
                    self.channels.remove(name);
                }
                self.send_registry_command(b"UNSUBSCRIBE", &names).await;
            }
            SubOp::PSubscribe(names) => {
                self.patterns.extend(names.iter().cloned());
                self.send_registry_command(b"PSUBSCRIBE", &names).await;
            }
            SubOp::PUnsubscribe(names) => {
                for name in &names {
                    self.patterns.remove(name);
                }
                self.send_registry_command(b"PUNSUBSCRIBE", &names).await;
            }
            SubOp::Ack => self.on_ack(),
            SubOp::Control { consumer, done } => {
                self.consumer = consumer;
                let _ = done.send(());
            }
            SubOp::Stop => {}
        }
    }

    /// Send `VERB name…` for the current registry op; a disconnected state is
    /// fine, the registry is replayed on reconnect.
    async fn send_registry_command(&mut self, verb: &[u8], names: &[String]) {
        if names.is_empty() {
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let mut args: Vec<&[u8]> = Vec::with_capacity(names.len() + 1);
        args.push(verb);
        args.extend(names.iter().map(|n| n.as_bytes()));
        if let Err(e) = conn.send(&encode_command(&args)).await {
            self.events.push_back(Event::Disconnected(e));
        }
    }

    /// Dispatch every buffered push value.
    ///
    /// `Err` is a queue overflow under the `Exit` policy and terminates the
    /// driver; transport failures go through the disconnect event instead.
    fn drain_pushes(&mut self) -> Result<()> {
        loop {
            let next = match self.conn.as_mut() {
                Some(conn) => conn.try_next_value(),
                None => return Ok(()),
            };
            match next {
                Ok(Some(value)) => self.handle_value(value)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.events.push_back(Event::Disconnected(e));
                    return Ok(());
                }
            }
        }
    }

    fn handle_value(&mut self, value: Value) -> Result<()> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                self.events.push_back(Event::Disconnected(Error::Protocol(format!(
                    "push message is not an array: {}",
                    other.type_name()
                ))));
                return Ok(());
            }
        };

        let kind = bulk_at(&items, 0);
        let parsed = match (kind.as_deref(), items.len()) {
            (Some(b"message"), 3) => bulk_at(&items, 1).zip(bulk_at(&items, 2)).map(
                |(channel, payload)| PushMessage::Message { channel, payload },
            ),
            (Some(b"pmessage"), 4) => bulk_at(&items, 1)
                .zip(bulk_at(&items, 2))
                .zip(bulk_at(&items, 3))
                .map(|((pattern, channel), payload)| PushMessage::PMessage {
                    pattern,
                    channel,
                    payload,
                }),
            (Some(b"subscribe"), 3) | (Some(b"psubscribe"), 3) => {
                bulk_at(&items, 1).map(|channel| PushMessage::Subscribed { channel })
            }
            (Some(b"unsubscribe"), 3) | (Some(b"punsubscribe"), 3) => {
                bulk_at(&items, 1).map(|channel| PushMessage::Unsubscribed { channel })
            }
            _ => None,
        };

        match parsed {
            Some(msg @ PushMessage::Message { .. }) | Some(msg @ PushMessage::PMessage { .. }) => {
                self.enqueue(msg)
            }
            Some(msg) => {
                self.send_direct(msg);
                Ok(())
            }
            None => {
                self.events.push_back(Event::Disconnected(Error::Protocol(
                    "malformed push message".into(),
                )));
                Ok(())
            }
        }
    }

    /// Queue (or directly deliver) an ack-gated message, applying the
    /// overflow policy. `Err(Error::MaxQueueSize)` under the `Exit` policy.
    fn enqueue(&mut self, msg: PushMessage) -> Result<()> {
        if !self.awaiting_ack && self.queue.is_empty() {
            self.deliver(msg);
            return Ok(());
        }
        if let Some(max) = self.options.max_queue_size {
            if self.queue.len() >= max {
                return match self.options.queue_behaviour {
                    QueueBehaviour::Drop => {
                        self.dropped += 1;
                        Ok(())
                    }
                    QueueBehaviour::Exit => Err(Error::MaxQueueSize),
                };
            }
        }
        self.queue.push_back(msg);
        Ok(())
    }

    fn on_ack(&mut self) {
        self.awaiting_ack = false;
        if let Some(msg) = self.queue.pop_front() {
            self.deliver(msg);
        } else if self.dropped > 0 {
            let count = self.dropped;
            self.dropped = 0;
            warn!(count, "messages were dropped on overflow");
            self.send_direct(PushMessage::Dropped { count });
        }
    }

    fn deliver(&mut self, msg: PushMessage) {
        self.send_direct(msg);
        self.awaiting_ack = true;
    }

    /// Delivery to a departed consumer is a no-op, same as replying to an
    /// abandoned caller.
    fn send_direct(&mut self, msg: PushMessage) {
        let _ = self.consumer.send(msg);
    }

    fn enter_disconnected(&mut self, reason: Error) -> bool {
        if let Some(conn) = self.conn.take() {
            drop(conn);
        }
        self.send_direct(PushMessage::Disconnected);
        match self.options.reconnect {
            None => {
                info!(error = %reason, "connection lost, reconnect disabled, stopping");
                false
            }
            Some(cooldown) => {
                warn!(error = %reason, "connection lost");
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
                self.conn = Some(conn);
                self.connected_at = Instant::now();
                info!("reconnected");
                if self.resubscribe().await {
                    self.send_direct(PushMessage::Connected);
                }
            }
            Err(e) => {
                debug!(error = %e, "reconnect attempt failed");
                if let Some(cooldown) = self.options.reconnect {
                    self.retry_at = Instant::now() + cooldown;
                }
            }
        }
    }

    /// Replay the registry onto a fresh connection. Runs before `Connected`
    /// is announced; false when the replay write failed.
    async fn resubscribe(&mut self) -> bool {
        let channels: Vec<String> = self.channels.iter().cloned().collect();
        let patterns: Vec<String> = self.patterns.iter().cloned().collect();
        self.send_registry_command(b"SUBSCRIBE", &channels).await;
        self.send_registry_command(b"PSUBSCRIBE", &patterns).await;
        self.events.is_empty()
    }
}

fn bulk_at(items: &[Value], index: usize) -> Option<Bytes> {
    match items.get(index) {
        Some(Value::BulkString(b)) => Some(b.clone()),
        Some(Value::SimpleString(s)) => Some(Bytes::copy_from_slice(s.as_bytes())),
        _ => None,
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Mock pub/sub server: waits for one SUBSCRIBE, acknowledges it, then
    /// pushes the scripted messages back to back.
    async fn mock_pubsub(pushes: Vec<Vec<u8>>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 512];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n")
                .await
                .unwrap();
            for push in pushes {
                socket.write_all(&push).await.unwrap();
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        });
        addr
    }

    fn push_message(channel: &str, payload: &str) -> Vec<u8> {
        encode_command(&[b"message", channel.as_bytes(), payload.as_bytes()])
    }

    fn options_for(addr: std::net::SocketAddr) -> ConnectOptions {
        let mut options = ConnectOptions::new(addr.ip().to_string(), addr.port());
        options.connect_timeout = Duration::from_secs(1);
        options.recv_timeout = Duration::from_secs(1);
        options
    }

    async fn recv_timeout(
        rx: &mut mpsc::UnboundedReceiver<PushMessage>,
    ) -> Option<PushMessage> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn subscribe_ack_and_message_flow() {
        let addr = mock_pubsub(vec![push_message("news", "hello")]).await;
        let (sub, mut rx) = Subscriber::connect(options_for(addr)).await.unwrap();
        sub.subscribe(["news"]).unwrap();

        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Subscribed {
                channel: Bytes::from_static(b"news")
            })
        );
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Message {
                channel: Bytes::from_static(b"news"),
                payload: Bytes::from_static(b"hello"),
            })
        );
    }

    #[tokio::test]
    async fn second_message_is_withheld_until_ack() {
        let addr = mock_pubsub(vec![
            push_message("news", "one"),
            push_message("news", "two"),
        ])
        .await;
        let (sub, mut rx) = Subscriber::connect(options_for(addr)).await.unwrap();
        sub.subscribe(["news"]).unwrap();

        assert!(matches!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Subscribed { .. })
        ));
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Message {
                channel: Bytes::from_static(b"news"),
                payload: Bytes::from_static(b"one"),
            })
        );

        // No ack yet: "two" stays queued.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        sub.ack().unwrap();
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Message {
                channel: Bytes::from_static(b"news"),
                payload: Bytes::from_static(b"two"),
            })
        );
    }

    #[tokio::test]
    async fn overflow_drop_policy_counts_and_notifies() {
        let addr = mock_pubsub(vec![
            push_message("news", "one"),
            push_message("news", "two"),
            push_message("news", "three"),
            push_message("news", "four"),
        ])
        .await;
        let mut options = options_for(addr);
        options.max_queue_size = Some(1);
        let (sub, mut rx) = Subscriber::connect(options).await.unwrap();
        sub.subscribe(["news"]).unwrap();

        assert!(matches!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Subscribed { .. })
        ));
        // "one" delivered, "two" queued, "three" and "four" dropped.
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Message {
                channel: Bytes::from_static(b"news"),
                payload: Bytes::from_static(b"one"),
            })
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        sub.ack().unwrap();
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Message {
                channel: Bytes::from_static(b"news"),
                payload: Bytes::from_static(b"two"),
            })
        );

        // Queue is now empty; the next ack flushes the drop notice.
        sub.ack().unwrap();
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Dropped { count: 2 })
        );
    }

    #[tokio::test]
    async fn overflow_exit_policy_terminates() {
        let addr = mock_pubsub(vec![
            push_message("news", "one"),
            push_message("news", "two"),
            push_message("news", "three"),
        ])
        .await;
        let mut options = options_for(addr);
        options.max_queue_size = Some(1);
        options.queue_behaviour = QueueBehaviour::Exit;
        let (sub, mut rx) = Subscriber::connect(options).await.unwrap();
        sub.subscribe(["news"]).unwrap();

        assert!(matches!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Subscribed { .. })
        ));
        assert!(matches!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Message { .. })
        ));
        // "three" overflows: the driver announces the loss and dies.
        assert_eq!(recv_timeout(&mut rx).await, Some(PushMessage::Disconnected));
        assert_eq!(recv_timeout(&mut rx).await, None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.ack().is_err());
    }

    #[tokio::test]
    async fn controlling_process_moves_the_stream() {
        let addr = mock_pubsub(vec![push_message("news", "later")]).await;
        let (sub, mut rx) = Subscriber::connect(options_for(addr)).await.unwrap();

        let mut new_rx = sub.controlling_process().await.unwrap();
        sub.subscribe(["news"]).unwrap();

        // Everything after the swap goes to the new receiver only.
        assert!(matches!(
            recv_timeout(&mut new_rx).await,
            Some(PushMessage::Subscribed { .. })
        ));
        assert!(matches!(
            recv_timeout(&mut new_rx).await,
            Some(PushMessage::Message { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_ack_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 512];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"*3\r\n$11\r\nunsubscribe\r\n$4\r\nnews\r\n:0\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let (sub, mut rx) = Subscriber::connect(options_for(addr)).await.unwrap();
        sub.unsubscribe(["news"]).unwrap();
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Unsubscribed {
                channel: Bytes::from_static(b"news")
            })
        );
    }

    #[tokio::test]
    async fn pmessage_carries_pattern_and_channel() {
        let addr = mock_pubsub(vec![encode_command(&[
            b"pmessage",
            b"news.*",
            b"news.eu",
            b"breaking",
        ])])
        .await;
        let (sub, mut rx) = Subscriber::connect(options_for(addr)).await.unwrap();
        sub.psubscribe(["news.*"]).unwrap();

        assert!(matches!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::Subscribed { .. })
        ));
        assert_eq!(
            recv_timeout(&mut rx).await,
            Some(PushMessage::PMessage {
                pattern: Bytes::from_static(b"news.*"),
                channel: Bytes::from_static(b"news.eu"),
                payload: Bytes::from_static(b"breaking"),
            })
        );
    }
}
