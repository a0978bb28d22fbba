//! Scripted mock servers shared by the integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

static TRACING: Once = Once::new();

/// Route driver logs through a per-test subscriber so `--nocapture` shows
/// connect/reconnect activity next to the scenario that caused it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// One step of a scripted connection.
#[derive(Clone)]
pub enum Action {
    /// Wait for an inbound chunk, then write the given bytes.
    Reply(Vec<u8>),
    /// Write the given bytes without waiting for input.
    Push(Vec<u8>),
    /// Sleep, e.g. to force fragment boundaries.
    Pause(Duration),
    /// Close the connection immediately.
    Close,
}

/// Spawn a listener that serves one script per accepted connection, in
/// order. Every chunk read from any connection is reported on the returned
/// channel as `(connection_index, bytes)`.
pub async fn spawn_server(
    scripts: Vec<Vec<Action>>,
) -> (SocketAddr, mpsc::UnboundedReceiver<(usize, Vec<u8>)>) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (index, script) in scripts.into_iter().enumerate() {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut closed = false;
            for action in script {
                match action {
                    Action::Reply(bytes) => {
                        let mut buf = vec![0u8; 4096];
                        let n = socket.read(&mut buf).await.unwrap();
                        if n == 0 {
                            closed = true;
                            break;
                        }
                        let _ = seen_tx.send((index, buf[..n].to_vec()));
                        socket.write_all(&bytes).await.unwrap();
                    }
                    Action::Push(bytes) => {
                        socket.write_all(&bytes).await.unwrap();
                    }
                    Action::Pause(duration) => {
                        tokio::time::sleep(duration).await;
                    }
                    Action::Close => {
                        closed = true;
                        break;
                    }
                }
            }
            if !closed {
                // Keep the connection open so the client does not observe a
                // spurious close while the test inspects its results.
                let mut buf = vec![0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let _ = seen_tx.send((index, buf[..n].to_vec()));
                }
            }
        }
    });

    (addr, seen_rx)
}

/// A loopback endpoint that refuses connections.
pub fn refused_endpoint() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn test_options(addr: SocketAddr) -> redlink::ConnectOptions {
    init_tracing();
    let mut options = redlink::ConnectOptions::new(addr.ip().to_string(), addr.port());
    options.connect_timeout = Duration::from_secs(1);
    options.recv_timeout = Duration::from_secs(1);
    options
}
