//! Non-blocking Redis client.
//!
//! Two usage modes over the same connection machinery:
//!
//! * [`Client`]: submit pre-encoded commands (or whole pipelines) and get
//!   typed replies back, FIFO-correlated over one multiplexed connection.
//! * [`Subscriber`]: receive server-pushed pub/sub messages with ack-based
//!   flow control and a bounded queue.
//!
//! Both bootstrap the same way (optional sentinel resolution, address
//! fallback with IPv6 before IPv4 or a unix-domain path, optional TLS
//! upgrade, AUTH with deferred credentials, SELECT) and both reconnect after
//! a cooldown when the connection drops.
//!
//! ```no_run
//! use redlink::{cmd, Client, ConnectOptions};
//!
//! # async fn demo() -> redlink::Result<()> {
//! let client = Client::connect(ConnectOptions::new("localhost", 6379)).await?;
//! let pong = client.request(cmd!("PING")).await?;
//! assert_eq!(pong.as_str(), Some("PONG"));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod resp;
pub mod sentinel;
pub mod subscriber;

pub use client::{Client, Reply};
pub use config::{
    ConnectOptions, QueueBehaviour, SentinelOptions, ServerHost, SocketOptions, TlsOptions,
};
pub use credentials::{Credentials, Secret};
pub use error::{Error, Result};
pub use resp::{Decoder, Value};
pub use subscriber::{PushMessage, Subscriber};
