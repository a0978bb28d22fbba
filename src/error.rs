//! Crate-wide error type.
//!
//! One enum covers the whole failure surface: handshake failures keep their
//! step of origin (dial, TLS upgrade, AUTH, SELECT), transport failures carry
//! the underlying [`io::Error`], and server-sent error replies are preserved
//! verbatim in [`Error::Redis`] so callers can match on the payload.

use bytes::Bytes;
use std::io;

/// All error variants for redlink.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request was submitted while no connection is established.
    #[error("not connected")]
    NoConnection,

    /// Every address in the candidate list failed to dial; carries the last
    /// failure reason.
    #[error("connection failed: {0}")]
    ConnectionError(io::Error),

    /// The TLS handshake over an established TCP socket failed.
    #[error("failed to upgrade to TLS: {0}")]
    FailedToUpgradeToTls(String),

    /// AUTH was rejected or answered with something other than `+OK`.
    #[error("authentication failed: {0}")]
    AuthenticationError(String),

    /// SELECT was rejected or answered with something other than `+OK`.
    #[error("database select failed: {0}")]
    SelectError(String),

    /// A handshake step received a complete reply that is not `+OK`.
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(Bytes),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// Transport-level read/write failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The parser needs more data. Not a real failure, used as control flow
    /// between the decoder and its feeder.
    #[error("incomplete frame")]
    Incomplete,

    /// Malformed RESP data on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered a command with an error reply. The payload is the
    /// exact message after the `-` tag byte.
    #[error("server error: {0}")]
    Redis(String),

    /// A reply arrived while the pending queue was empty. Fatal: request
    /// framing is broken and the driver terminates.
    #[error("reply arrived with nothing pending")]
    EmptyQueue,

    /// The subscriber's push queue overflowed under the `exit` policy.
    #[error("push queue overflow")]
    MaxQueueSize,

    /// No configured sentinel endpoint could name a master.
    #[error("no master found via sentinel")]
    NoMaster,

    /// A handshake read or connect did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The client was stopped while the request was pending.
    #[error("client stopped")]
    Stopped,
}

// A disconnect reason fans out to every pending caller, so the error must be
// duplicable. `io::Error` is not `Clone`; rebuild it from kind + message.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Self::NoConnection => Self::NoConnection,
            Self::ConnectionError(e) => {
                Self::ConnectionError(io::Error::new(e.kind(), e.to_string()))
            }
            Self::FailedToUpgradeToTls(s) => Self::FailedToUpgradeToTls(s.clone()),
            Self::AuthenticationError(s) => Self::AuthenticationError(s.clone()),
            Self::SelectError(s) => Self::SelectError(s.clone()),
            Self::UnexpectedResponse(b) => Self::UnexpectedResponse(b.clone()),
            Self::Closed => Self::Closed,
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Incomplete => Self::Incomplete,
            Self::Protocol(s) => Self::Protocol(s.clone()),
            Self::Redis(s) => Self::Redis(s.clone()),
            Self::EmptyQueue => Self::EmptyQueue,
            Self::MaxQueueSize => Self::MaxQueueSize,
            Self::NoMaster => Self::NoMaster,
            Self::Timeout(s) => Self::Timeout(s.clone()),
            Self::Stopped => Self::Stopped,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Tests ──────────────────────────────────────────────────────────
