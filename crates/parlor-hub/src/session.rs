//! Per-connection lifecycle: join, replay, read loop, teardown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parlor_core::{ChatFrame, ConnectionId, Message};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HubConfig;
use crate::connection::ClientConnection;
use crate::error::TransportError;
use crate::router::BroadcastRouter;
use crate::transport::{Frame, FrameSink, FrameStream};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Replaying,
    Active,
    Closed,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    ReadError,
    /// An inbound text frame was not a chat frame.
    DecodeError,
    /// Nothing arrived within the read deadline.
    IdleTimeout,
    /// The router dropped the connection because its queue was full or closed.
    Evicted,
    /// Writing a live frame or ping failed or timed out.
    WriteFailed,
    ReplayFailed,
    /// History could not be read, or registration was refused.
    JoinFailed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::DecodeError => "decode_error",
            Self::IdleTimeout => "idle_timeout",
            Self::Evicted => "evicted",
            Self::WriteFailed => "write_failed",
            Self::ReplayFailed => "replay_failed",
            Self::JoinFailed => "join_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Summary of a finished session.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub id: ConnectionId,
    pub reason: CloseReason,
    /// Inbound messages the router accepted.
    pub accepted: u64,
    /// Inbound messages dropped because persistence failed.
    pub rejected: u64,
}

/// One connection from registration to teardown.
///
/// The session owns the read half and, until replay finishes, the write
/// half. After replay the write half moves to a writer task that drains the
/// connection's outbound queue; from then on only that task touches it and
/// only that task closes it.
pub struct Session<S, R> {
    conn: Arc<ClientConnection>,
    queue: mpsc::Receiver<Arc<String>>,
    sink: S,
    stream: R,
    router: Arc<BroadcastRouter>,
    config: HubConfig,
    shutdown: CancellationToken,
    state: SessionState,
    accepted: u64,
    rejected: u64,
}

impl<S: FrameSink, R: FrameStream> Session<S, R> {
    pub fn new(
        router: Arc<BroadcastRouter>,
        config: HubConfig,
        shutdown: CancellationToken,
        sink: S,
        stream: R,
    ) -> Self {
        let (conn, queue) = ClientConnection::channel(config.outbound_queue);
        Self {
            conn,
            queue,
            sink,
            stream,
            router,
            config,
            shutdown,
            state: SessionState::Connecting,
            accepted: 0,
            rejected: 0,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        self.conn.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the connection ends.
    pub async fn run(mut self) -> SessionOutcome {
        let history = match self.router.join(Arc::clone(&self.conn)).await {
            Ok(history) => history,
            Err(e) => {
                warn!(conn_id = %self.conn.id(), error = %e, "join failed");
                let _ = self.conn.close();
                self.sink.close().await;
                return self.finish(CloseReason::JoinFailed);
            }
        };
        self.transition(SessionState::Replaying);

        if let Err(e) = replay(&mut self.sink, &history, self.config.write_timeout).await {
            warn!(conn_id = %self.conn.id(), error = %e, "replay failed");
            let _ = self.router.registry().remove(self.conn.id());
            let _ = self.conn.close();
            self.sink.close().await;
            return self.finish(CloseReason::ReplayFailed);
        }
        self.transition(SessionState::Active);

        let Session {
            conn,
            queue,
            sink,
            mut stream,
            router,
            config,
            shutdown,
            state,
            mut accepted,
            mut rejected,
        } = self;

        let writer = tokio::spawn(write_loop(sink, queue, Arc::clone(&conn), config.clone()));

        let mut reason = read_loop(
            &mut stream,
            &conn,
            &router,
            &config,
            &shutdown,
            &mut accepted,
            &mut rejected,
        )
        .await;

        let _ = router.registry().remove(conn.id());
        let _ = conn.close();
        match writer.await {
            Ok(Some(e)) if reason == CloseReason::Evicted => {
                debug!(conn_id = %conn.id(), error = %e, "writer stopped");
                reason = CloseReason::WriteFailed;
            }
            Ok(_) => {}
            Err(e) => warn!(conn_id = %conn.id(), error = %e, "writer task panicked"),
        }
        debug!(conn_id = %conn.id(), from = ?state, to = ?SessionState::Closed, "session state");

        let outcome = SessionOutcome {
            id: conn.id().clone(),
            reason,
            accepted,
            rejected,
        };
        log_outcome(&outcome, &conn);
        outcome
    }

    fn transition(&mut self, next: SessionState) {
        debug!(conn_id = %self.conn.id(), from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn finish(mut self, reason: CloseReason) -> SessionOutcome {
        self.transition(SessionState::Closed);
        let outcome = SessionOutcome {
            id: self.conn.id().clone(),
            reason,
            accepted: self.accepted,
            rejected: self.rejected,
        };
        log_outcome(&outcome, &self.conn);
        outcome
    }
}

fn log_outcome(outcome: &SessionOutcome, conn: &ClientConnection) {
    info!(
        conn_id = %outcome.id,
        reason = outcome.reason.as_str(),
        accepted = outcome.accepted,
        rejected = outcome.rejected,
        dropped = conn.drop_count(),
        duration_ms = conn.age().as_millis() as u64,
        "session closed"
    );
}

async fn bounded<F>(deadline: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    timeout(deadline, write)
        .await
        .unwrap_or(Err(TransportError::WriteTimeout))
}

async fn replay<S: FrameSink>(
    sink: &mut S,
    history: &[Message],
    write_timeout: Duration,
) -> Result<(), TransportError> {
    for message in history {
        let json = message
            .to_json()
            .map_err(|e| TransportError::InvalidFrame(e.to_string()))?;
        bounded(write_timeout, sink.send_text(&json)).await?;
    }
    Ok(())
}

/// Drain the outbound queue to the sink until the connection closes or a
/// write fails. Closes the connection and the sink on the way out. Returns
/// the write error, if that is what stopped it.
async fn write_loop<S: FrameSink>(
    mut sink: S,
    mut queue: mpsc::Receiver<Arc<String>>,
    conn: Arc<ClientConnection>,
    config: HubConfig,
) -> Option<TransportError> {
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        tokio::select! {
            biased;
            () = conn.closed() => break None,
            frame = queue.recv() => {
                let Some(frame) = frame else { break None };
                if let Err(e) = bounded(config.write_timeout, sink.send_text(&frame)).await {
                    break Some(e);
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = bounded(config.write_timeout, sink.send_ping()).await {
                    break Some(e);
                }
            }
        }
    };

    if let Some(e) = &failure {
        debug!(conn_id = %conn.id(), error = %e, "write failed, closing connection");
    }
    let _ = conn.close();
    sink.close().await;
    failure
}

async fn read_loop<R: FrameStream>(
    stream: &mut R,
    conn: &ClientConnection,
    router: &BroadcastRouter,
    config: &HubConfig,
    shutdown: &CancellationToken,
    accepted: &mut u64,
    rejected: &mut u64,
) -> CloseReason {
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return CloseReason::Shutdown,
            () = conn.closed() => return CloseReason::Evicted,
            next = timeout(config.read_timeout, stream.next_frame()) => next,
        };

        let text = match next {
            Err(_) => return CloseReason::IdleTimeout,
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn.id(), error = %e, "read failed");
                return CloseReason::ReadError;
            }
            Ok(Some(Ok(Frame::Heartbeat))) => continue,
            Ok(Some(Ok(Frame::Text(text)))) => text,
        };

        let frame: ChatFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn_id = %conn.id(), error = %e, "undecodable frame");
                return CloseReason::DecodeError;
            }
        };

        match router.submit(frame).await {
            Ok(delivery) => {
                *accepted += 1;
                trace!(
                    conn_id = %conn.id(),
                    recipients = delivery.recipients,
                    "message accepted"
                );
            }
            Err(e) => {
                *rejected += 1;
                warn!(conn_id = %conn.id(), error = %e, "message dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::transport::memory::{self, Outbound};
    use async_trait::async_trait;
    use parlor_core::MessageStore;
    use parlor_store::{Database, MessageRepo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn router() -> Arc<BroadcastRouter> {
        let store: Arc<dyn MessageStore> =
            Arc::new(MessageRepo::new(Database::in_memory().unwrap()));
        Arc::new(BroadcastRouter::new(Arc::new(ConnectionRegistry::new()), store))
    }

    fn fast_config() -> HubConfig {
        HubConfig {
            outbound_queue: 16,
            write_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
        }
    }

    /// Accepts `budget` text frames, then never completes another write.
    struct StalledSink {
        budget: usize,
        closes: Arc<AtomicUsize>,
    }

    impl StalledSink {
        fn new(budget: usize) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    budget,
                    closes: Arc::clone(&closes),
                },
                closes,
            )
        }
    }

    #[async_trait]
    impl FrameSink for StalledSink {
        async fn send_text(&mut self, _text: &str) -> Result<(), TransportError> {
            if self.budget == 0 {
                std::future::pending::<()>().await;
            }
            self.budget -= 1;
            Ok(())
        }

        async fn send_ping(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn new_session_starts_connecting() {
        let (sink, stream, _client) = memory::pair();
        let session = Session::new(router(), fast_config(), CancellationToken::new(), sink, stream);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.id().as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn peer_close_ends_session_and_deregisters() {
        let router = router();
        let (sink, stream, mut client) = memory::pair();
        let session = Session::new(
            Arc::clone(&router),
            fast_config(),
            CancellationToken::new(),
            sink,
            stream,
        );
        let handle = tokio::spawn(session.run());

        assert!(client.send_chat("alice", "hi"));
        let echoed = client.recv_message().await.unwrap();
        assert_eq!(echoed.body(), "hi");

        client.hang_up();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::PeerClosed);
        assert_eq!(outcome.accepted, 1);
        assert!(router.registry().is_empty());
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test]
    async fn decode_error_terminates() {
        let router = router();
        let (sink, stream, client) = memory::pair();
        let handle = tokio::spawn(
            Session::new(Arc::clone(&router), fast_config(), CancellationToken::new(), sink, stream)
                .run(),
        );
        assert!(client.send_text("not json"));
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::DecodeError);
        assert_eq!(outcome.accepted, 0);
        assert!(router.registry().is_empty());
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test]
    async fn read_error_terminates() {
        let (sink, stream, client) = memory::pair();
        let handle = tokio::spawn(
            Session::new(router(), fast_config(), CancellationToken::new(), sink, stream).run(),
        );
        assert!(client.fail_read("connection reset"));
        assert_eq!(handle.await.unwrap().reason, CloseReason::ReadError);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out() {
        let (sink, stream, client) = memory::pair();
        let config = HubConfig {
            read_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(1),
            ..fast_config()
        };
        let outcome = Session::new(router(), config, CancellationToken::new(), sink, stream)
            .run()
            .await;
        assert_eq!(outcome.reason, CloseReason::IdleTimeout);
        assert!(client.ping_count() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_frames_keep_session_alive() {
        let (sink, stream, mut client) = memory::pair();
        let config = HubConfig {
            read_timeout: Duration::from_secs(3),
            ..fast_config()
        };
        let handle = tokio::spawn(
            Session::new(router(), config, CancellationToken::new(), sink, stream).run(),
        );
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            assert!(client.send_heartbeat());
        }
        assert!(!handle.is_finished());
        client.hang_up();
        assert_eq!(handle.await.unwrap().reason, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn replay_write_failure_skips_active() {
        let router = router();
        let _ = router.submit(ChatFrame::new("alice", "old")).await.unwrap();

        let (sink, stream, client) = memory::pair();
        client.break_writes();
        let outcome =
            Session::new(Arc::clone(&router), fast_config(), CancellationToken::new(), sink, stream)
                .run()
                .await;
        assert_eq!(outcome.reason, CloseReason::ReplayFailed);
        assert!(router.registry().is_empty());
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_token_ends_session() {
        let router = router();
        let shutdown = CancellationToken::new();
        let (sink, stream, _client) = memory::pair();
        let handle = tokio::spawn(
            Session::new(Arc::clone(&router), fast_config(), shutdown.clone(), sink, stream).run(),
        );
        while router.registry().is_empty() {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        assert_eq!(handle.await.unwrap().reason, CloseReason::Shutdown);
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn broken_live_writes_end_session() {
        let router = router();
        let (sink, stream, client) = memory::pair();
        let handle = tokio::spawn(
            Session::new(Arc::clone(&router), fast_config(), CancellationToken::new(), sink, stream)
                .run(),
        );
        while router.registry().is_empty() {
            tokio::task::yield_now().await;
        }
        client.break_writes();
        let _ = router.submit(ChatFrame::new("bob", "ping?")).await.unwrap();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::WriteFailed);
        assert!(router.registry().is_empty());
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_sends_pings() {
        let router = router();
        let (sink, stream, mut client) = memory::pair();
        let handle = tokio::spawn(
            Session::new(Arc::clone(&router), fast_config(), CancellationToken::new(), sink, stream)
                .run(),
        );
        while router.registry().is_empty() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(client.try_recv(), Some(Outbound::Ping));
        client.hang_up();
        let _ = handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_live_write_times_out() {
        let router = router();
        let (sink, closes) = StalledSink::new(0);
        let (_, stream, _client) = memory::pair();
        let config = fast_config();
        let handle = tokio::spawn(
            Session::new(Arc::clone(&router), config.clone(), CancellationToken::new(), sink, stream)
                .run(),
        );
        while router.registry().is_empty() {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        let _ = router.submit(ChatFrame::new("bob", "anyone?")).await.unwrap();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.reason, CloseReason::WriteFailed);
        assert!(started.elapsed() >= config.write_timeout);
        assert!(started.elapsed() < config.read_timeout);
        assert!(router.registry().is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_replay_write_times_out() {
        let router = router();
        for body in ["one", "two", "three"] {
            let _ = router.submit(ChatFrame::new("alice", body)).await.unwrap();
        }

        let (sink, closes) = StalledSink::new(1);
        let (_, stream, _client) = memory::pair();
        let config = fast_config();
        let started = Instant::now();
        let outcome =
            Session::new(Arc::clone(&router), config.clone(), CancellationToken::new(), sink, stream)
                .run()
                .await;

        assert_eq!(outcome.reason, CloseReason::ReplayFailed);
        assert!(started.elapsed() >= config.write_timeout);
        assert!(started.elapsed() < config.read_timeout);
        assert!(router.registry().is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
