//! One persistent TCP connection to a chat server.
//!
//! The connection owns a background task that multiplexes socket reads,
//! outbound writes and the keepalive timer in a single `select!` loop.
//! Inbound bytes are split into NUL-terminated frames and forwarded to the
//! owning session as tokenised commands, in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::error::{ConnectError, ConnectionError};
use tango_proto::command::{self, Command, FrameBuffer};

/// Interval between keepalive checks, and between empty keepalive frames.
const PING_DELAY: Duration = Duration::from_secs(15);
/// How long we tolerate receiving nothing before closing the transport.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum ControlMessage {
    Send(Vec<u8>),
    Close,
}

/// What the connection task reports back to its session.
#[derive(Debug)]
pub enum ConnectionEvent {
    Command(Command),
    /// The transport closed without an explicit `disconnect()`. `None`
    /// means a clean close from the peer's side.
    Closed(Option<ConnectionError>),
}

/// Handle to a live connection. Cheap to clone; all clones drive the same
/// transport.
#[derive(Clone)]
pub struct Connection {
    control: UnboundedSender<ControlMessage>,
    deliberate: Arc<AtomicBool>,
}

impl Connection {
    /// Establish the transport and send the handshake frame.
    ///
    /// Resolution or connect failure is an error to the caller; everything
    /// after this point is reported through `event_tx`.
    pub async fn connect<S: AsRef<str>>(
        host: &str,
        port: u16,
        handshake: &[S],
        event_tx: UnboundedSender<ConnectionEvent>,
    ) -> Result<Self, ConnectError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ConnectError::Unreachable {
                host: format!("{host}:{port}"),
                source,
            })?;

        tracing::debug!(host, port, "connected");

        let (control_tx, control_rx) = unbounded_channel();
        let deliberate = Arc::new(AtomicBool::new(false));

        let task = ConnectionTask {
            stream,
            control: control_rx,
            events: event_tx,
            deliberate: deliberate.clone(),
            // The handshake alone omits the line ending
            handshake: command::serialize(handshake, true),
        };
        tokio::spawn(task.run());

        Ok(Self {
            control: control_tx,
            deliberate,
        })
    }

    /// Queue an outbound command.
    pub fn send<S: AsRef<str>>(&self, fields: &[S]) {
        let frame = command::serialize(fields, false);
        // A send after teardown is a no-op
        let _ = self.control.send(ControlMessage::Send(frame));
    }

    /// Close the transport deliberately. Safe to call repeatedly; the
    /// abrupt-disconnect event is suppressed for closes requested here.
    pub fn disconnect(&self) {
        self.deliberate.store(true, Ordering::SeqCst);
        let _ = self.control.send(ControlMessage::Close);
    }
}

struct ConnectionTask {
    stream: TcpStream,
    control: UnboundedReceiver<ControlMessage>,
    events: UnboundedSender<ConnectionEvent>,
    deliberate: Arc<AtomicBool>,
    handshake: Vec<u8>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let (mut reader, mut writer) = self.stream.into_split();

        let mut error = None;
        if writer.write_all(&self.handshake).await.is_err() {
            error = Some(ConnectionError::Closed);
        } else {
            let mut frames = FrameBuffer::new();
            let mut last_received = Instant::now();
            let mut keepalive =
                tokio::time::interval_at(Instant::now() + PING_DELAY, PING_DELAY);
            let mut buf = [0_u8; 4096];

            'main: loop {
                select! {
                    control = self.control.recv() => match control {
                        None | Some(ControlMessage::Close) => break 'main,
                        Some(ControlMessage::Send(frame)) => {
                            if writer.write_all(&frame).await.is_err() {
                                error = Some(ConnectionError::Closed);
                                break 'main;
                            }
                        }
                    },
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            error = Some(ConnectionError::Closed);
                            break 'main;
                        }
                        Ok(n) => {
                            last_received = Instant::now();
                            for frame in frames.push(&buf[..n]) {
                                // Malformed frames are dropped, not fatal
                                let Ok(text) = String::from_utf8(frame) else {
                                    tracing::debug!("dropping non-utf8 frame");
                                    continue;
                                };
                                let cmd = Command::parse(&text);
                                if self.events.send(ConnectionEvent::Command(cmd)).is_err() {
                                    // Session is gone; nothing left to do
                                    break 'main;
                                }
                            }
                        }
                        Err(e) => {
                            error = Some(e.into());
                            break 'main;
                        }
                    },
                    _ = keepalive.tick() => {
                        if last_received.elapsed() > IDLE_TIMEOUT {
                            tracing::info!("closing idle connection");
                            error = Some(ConnectionError::IdleTimeout);
                            break 'main;
                        }
                        // Provoke some server traffic so we are not the
                        // idle side
                        let ping = command::serialize(&[""], false);
                        if writer.write_all(&ping).await.is_err() {
                            error = Some(ConnectionError::Closed);
                            break 'main;
                        }
                    }
                }
            }
        }

        if !self.deliberate.load(Ordering::SeqCst) {
            let _ = self.events.send(ConnectionEvent::Closed(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn accept_one(listener: TcpListener) -> TcpStream {
        let (socket, _) = listener.accept().await.unwrap();
        socket
    }

    #[tokio::test]
    async fn handshake_sent_without_line_ending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.accept_addr();
        let server = tokio::spawn(accept_one(listener));

        let (tx, _rx) = unbounded_channel();
        let conn = Connection::connect(&addr.0, addr.1, &["bauth", "room", "1", "", ""], tx)
            .await
            .unwrap();
        conn.send(&["later"]);

        let mut socket = server.await.unwrap();
        let mut buf = vec![0_u8; 64];
        let n = socket.read(&mut buf).await.unwrap();
        let mut received = buf[..n].to_vec();
        while !received.ends_with(b"later\r\n\0") {
            let n = socket.read(&mut buf).await.unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert!(received.starts_with(b"bauth:room:1::\0"));
        assert!(received.ends_with(b"later\r\n\0"));
    }

    #[tokio::test]
    async fn inbound_frames_become_commands_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.accept_addr();
        let server = tokio::spawn(accept_one(listener));

        let (tx, mut rx) = unbounded_channel();
        let _conn = Connection::connect(&addr.0, addr.1, &["hs"], tx).await.unwrap();

        let mut socket = server.await.unwrap();
        socket.write_all(b"first:1\0second:2\r\n\0").await.unwrap();

        let ConnectionEvent::Command(first) = rx.recv().await.unwrap() else {
            panic!("expected command");
        };
        let ConnectionEvent::Command(second) = rx.recv().await.unwrap() else {
            panic!("expected command");
        };
        assert_eq!(first.mnemonic, "first");
        assert_eq!(second.mnemonic, "second");
        assert_eq!(second.args, &["2"]);
    }

    #[tokio::test]
    async fn abrupt_close_raises_event_and_deliberate_close_does_not() {
        // Abrupt close from the peer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.accept_addr();
        let server = tokio::spawn(accept_one(listener));
        let (tx, mut rx) = unbounded_channel();
        let _conn = Connection::connect(&addr.0, addr.1, &["hs"], tx).await.unwrap();
        drop(server.await.unwrap());
        match rx.recv().await.unwrap() {
            ConnectionEvent::Closed(err) => {
                assert_eq!(err, Some(ConnectionError::Closed));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Deliberate disconnect suppresses the event
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.accept_addr();
        let server = tokio::spawn(accept_one(listener));
        let (tx, mut rx) = unbounded_channel();
        let conn = Connection::connect(&addr.0, addr.1, &["hs"], tx).await.unwrap();
        let _socket = server.await.unwrap();
        conn.disconnect();
        conn.disconnect(); // idempotent
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_typed() {
        let (tx, _rx) = unbounded_channel();
        // Port 1 on localhost is almost certainly closed
        let result = Connection::connect("127.0.0.1", 1, &["hs"], tx).await;
        assert!(matches!(result, Err(ConnectError::Unreachable { .. })));
    }

    trait AcceptAddr {
        fn accept_addr(&self) -> (String, u16);
    }

    impl AcceptAddr for TcpListener {
        fn accept_addr(&self) -> (String, u16) {
            let addr = self.local_addr().unwrap();
            (addr.ip().to_string(), addr.port())
        }
    }
}
