//! Transport seam between sessions and the network.
//!
//! The hub only ever sees one connection as two halves: a [`FrameSink`] it
//! writes text frames and pings to, and a [`FrameStream`] it reads frames
//! from. The server implements these over axum WebSocket halves; [`memory`]
//! implements them over channels for tests.

use async_trait::async_trait;

use crate::error::TransportError;

/// An inbound frame as far as the hub cares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A text payload, expected to carry a JSON chat frame.
    Text(String),
    /// Any liveness traffic (ping or pong). Resets the idle deadline only.
    Heartbeat,
}

/// Write half of a connection. Owned by exactly one task at a time.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Close the write half. Called once per connection.
    async fn close(&mut self);
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound frame, or `None` once the peer has closed.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Channel-backed transport for driving sessions without sockets.
pub mod memory {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parlor_core::{ChatFrame, Message};
    use tokio::sync::mpsc;

    use super::{Frame, FrameSink, FrameStream};
    use crate::error::TransportError;

    /// What the hub wrote towards the client.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Outbound {
        Text(String),
        Ping,
    }

    #[derive(Default)]
    struct Flags {
        writes_broken: AtomicBool,
        closes: AtomicUsize,
        pings: AtomicUsize,
    }

    /// Create a connected sink/stream pair plus the client end that drives it.
    pub fn pair() -> (MemorySink, MemoryStream, MemoryClient) {
        let (to_client, from_hub) = mpsc::unbounded_channel();
        let (to_hub, from_client) = mpsc::unbounded_channel();
        let flags = Arc::new(Flags::default());
        (
            MemorySink {
                tx: to_client,
                flags: Arc::clone(&flags),
            },
            MemoryStream { rx: from_client },
            MemoryClient {
                inbound: Some(to_hub),
                outbound: from_hub,
                flags,
            },
        )
    }

    pub struct MemorySink {
        tx: mpsc::UnboundedSender<Outbound>,
        flags: Arc<Flags>,
    }

    impl MemorySink {
        fn push(&self, frame: Outbound) -> Result<(), TransportError> {
            if self.flags.writes_broken.load(Ordering::Acquire) {
                return Err(TransportError::Write("broken pipe".into()));
            }
            self.tx
                .send(frame)
                .map_err(|_| TransportError::Write("peer gone".into()))
        }
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
            self.push(Outbound::Text(text.to_owned()))
        }

        async fn send_ping(&mut self) -> Result<(), TransportError> {
            self.push(Outbound::Ping)?;
            let _ = self.flags.pings.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn close(&mut self) {
            let _ = self.flags.closes.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub struct MemoryStream {
        rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    }

    #[async_trait]
    impl FrameStream for MemoryStream {
        async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
            self.rx.recv().await
        }
    }

    /// The far end of a memory connection, as a test client sees it.
    pub struct MemoryClient {
        inbound: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        flags: Arc<Flags>,
    }

    impl MemoryClient {
        /// Send a raw text frame. Returns `false` once hung up.
        pub fn send_text(&self, text: impl Into<String>) -> bool {
            self.push(Ok(Frame::Text(text.into())))
        }

        /// Send a chat frame encoded the way a browser client would.
        pub fn send_chat(&self, username: &str, message: &str) -> bool {
            match serde_json::to_string(&ChatFrame::new(username, message)) {
                Ok(json) => self.send_text(json),
                Err(_) => false,
            }
        }

        pub fn send_heartbeat(&self) -> bool {
            self.push(Ok(Frame::Heartbeat))
        }

        /// Inject a read error into the hub's side of the stream.
        pub fn fail_read(&self, detail: &str) -> bool {
            self.push(Err(TransportError::Read(detail.to_owned())))
        }

        fn push(&self, item: Result<Frame, TransportError>) -> bool {
            self.inbound.as_ref().is_some_and(|tx| tx.send(item).is_ok())
        }

        /// Close the client's write direction; the hub sees end of stream.
        pub fn hang_up(&mut self) {
            self.inbound = None;
        }

        /// Make every subsequent hub write to this client fail.
        pub fn break_writes(&self) {
            self.flags.writes_broken.store(true, Ordering::Release);
        }

        /// Next text frame from the hub, skipping pings. `None` once the
        /// hub has dropped its sink.
        pub async fn recv(&mut self) -> Option<String> {
            loop {
                match self.outbound.recv().await? {
                    Outbound::Text(text) => return Some(text),
                    Outbound::Ping => continue,
                }
            }
        }

        /// Next text frame decoded as an accepted message.
        pub async fn recv_message(&mut self) -> Option<Message> {
            let text = self.recv().await?;
            serde_json::from_str(&text).ok()
        }

        /// Next frame if one is already buffered, pings included.
        pub fn try_recv(&mut self) -> Option<Outbound> {
            self.outbound.try_recv().ok()
        }

        /// How many times the hub closed this connection's sink.
        pub fn close_count(&self) -> usize {
            self.flags.closes.load(Ordering::Acquire)
        }

        pub fn ping_count(&self) -> usize {
            self.flags.pings.load(Ordering::Relaxed)
        }
    }

}
