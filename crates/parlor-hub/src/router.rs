//! Persist-then-deliver for accepted messages.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use parlor_core::{ChatFrame, Message, MessageStore};
use parlor_telemetry::metrics::{
    FANOUT_DELIVERIES_TOTAL, FANOUT_EVICTIONS_TOTAL, MESSAGES_ACCEPTED_TOTAL,
    MESSAGES_PERSIST_FAILURES_TOTAL,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::ClientConnection;
use crate::error::HubError;
use crate::registry::ConnectionRegistry;

/// Result of one successful submit.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// The message as persisted and broadcast, with its server timestamp.
    pub message: Message,
    /// Connections the frame was queued to.
    pub recipients: usize,
    /// Connections removed because their queue was full or closed.
    pub evicted: usize,
}

/// Single serializer for accepted messages.
///
/// `submit` holds `gate` across stamping, persisting and fan-out, so
/// messages get one total order that persistence and every connection's
/// queue observe identically. `join` takes the same gate, so a joining
/// connection's history read and its registration form one cut: each
/// message is either in the history or in the live queue, exactly once.
///
/// Fan-out never awaits the network. Each destination gets a non-blocking
/// enqueue; a destination that cannot take the frame is evicted.
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    gate: Mutex<()>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry,
            store,
            gate: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register `conn` and return the history it must be sent before any
    /// live frame. On a history failure the connection is deregistered again.
    pub async fn join(&self, conn: Arc<ClientConnection>) -> Result<Vec<Message>, HubError> {
        let _gate = self.gate.lock().await;
        self.registry.add(Arc::clone(&conn))?;
        match self.store.list_ordered().await {
            Ok(history) => {
                debug!(conn_id = %conn.id(), messages = history.len(), "history loaded for join");
                Ok(history)
            }
            Err(e) => {
                let _ = self.registry.remove(conn.id());
                Err(HubError::History(e))
            }
        }
    }

    /// Stamp, persist and broadcast one inbound frame.
    ///
    /// Nothing is delivered unless the append succeeded.
    pub async fn submit(&self, frame: ChatFrame) -> Result<Delivery, HubError> {
        let _gate = self.gate.lock().await;

        let message = Message::accept(frame, Utc::now());
        let payload = Arc::new(message.to_json()?);

        if let Err(e) = self.store.append(&message).await {
            counter!(MESSAGES_PERSIST_FAILURES_TOTAL, "kind" => e.kind()).increment(1);
            return Err(HubError::Persist(e));
        }
        counter!(MESSAGES_ACCEPTED_TOTAL).increment(1);

        let (recipients, evicted) = self.fan_out(&payload);
        debug!(
            username = message.username(),
            recipients,
            evicted,
            "message broadcast"
        );
        Ok(Delivery {
            message,
            recipients,
            evicted,
        })
    }

    fn fan_out(&self, payload: &Arc<String>) -> (usize, usize) {
        let mut recipients = 0;
        let mut evicted = 0;
        for conn in self.registry.snapshot() {
            match conn.send(Arc::clone(payload)) {
                Ok(()) => recipients += 1,
                Err(reason) => {
                    warn!(conn_id = %conn.id(), reason = reason.as_str(), "evicting connection");
                    let _ = self.registry.remove(conn.id());
                    let _ = conn.close();
                    counter!(FANOUT_EVICTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
                    evicted += 1;
                }
            }
        }
        counter!(FANOUT_DELIVERIES_TOTAL).increment(recipients as u64);
        (recipients, evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parlor_core::StoreError;
    use parlor_store::{Database, MessageRepo};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// Wraps a real repo and can be told to fail.
    struct FlakyStore {
        inner: MessageRepo,
        fail_append: AtomicBool,
        fail_list: AtomicBool,
    }

    #[async_trait]
    impl MessageStore for FlakyStore {
        async fn append(&self, message: &Message) -> Result<(), StoreError> {
            if self.fail_append.load(Ordering::SeqCst) {
                return Err(StoreError::Database("disk I/O error".into()));
            }
            self.inner.append(message).await
        }

        async fn list_ordered(&self) -> Result<Vec<Message>, StoreError> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(StoreError::Database("locked".into()));
            }
            self.inner.list_ordered().await
        }
    }

    fn setup() -> (BroadcastRouter, Arc<FlakyStore>) {
        let db = Database::in_memory().unwrap();
        let store = Arc::new(FlakyStore {
            inner: MessageRepo::new(db),
            fail_append: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
        });
        let router = BroadcastRouter::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::clone(&store) as Arc<dyn MessageStore>,
        );
        (router, store)
    }

    async fn joined(
        router: &BroadcastRouter,
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (conn, rx) = ClientConnection::channel(capacity);
        let _ = router.join(Arc::clone(&conn)).await.unwrap();
        (conn, rx)
    }

    #[tokio::test]
    async fn submit_stamps_persists_and_delivers() {
        let (router, store) = setup();
        let (_a, mut rx_a) = joined(&router, 8).await;
        let (_b, mut rx_b) = joined(&router, 8).await;

        let mut frame = ChatFrame::new("alice", "hi");
        frame.timestamp = "1999-01-01 00:00:00".into();
        let delivery = router.submit(frame).await.unwrap();

        assert_eq!(delivery.recipients, 2);
        assert_eq!(delivery.evicted, 0);
        assert_ne!(delivery.message.timestamp(), "1999-01-01 00:00:00");

        let expected = delivery.message.to_json().unwrap();
        assert_eq!(*rx_a.recv().await.unwrap(), expected);
        assert_eq!(*rx_b.recv().await.unwrap(), expected);

        let history = store.list_ordered().await.unwrap();
        assert_eq!(history, vec![delivery.message]);
    }

    #[tokio::test]
    async fn persist_failure_delivers_nothing() {
        let (router, store) = setup();
        let (_a, mut rx_a) = joined(&router, 8).await;
        store.fail_append.store(true, Ordering::SeqCst);

        let err = router.submit(ChatFrame::new("alice", "lost")).await.unwrap_err();
        assert!(matches!(err, HubError::Persist(_)));
        assert!(rx_a.try_recv().is_err());

        store.fail_append.store(false, Ordering::SeqCst);
        assert!(store.list_ordered().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_queue_is_evicted_without_blocking_others() {
        let (router, _store) = setup();
        let (slow, _rx_slow) = joined(&router, 1).await;
        let (_fast, mut rx_fast) = joined(&router, 8).await;

        let first = router.submit(ChatFrame::new("a", "one")).await.unwrap();
        assert_eq!(first.recipients, 2);

        let second = router.submit(ChatFrame::new("a", "two")).await.unwrap();
        assert_eq!(second.recipients, 1);
        assert_eq!(second.evicted, 1);
        assert!(slow.is_closed());
        assert!(!router.registry().contains(slow.id()));

        assert!(rx_fast.recv().await.unwrap().contains("one"));
        assert!(rx_fast.recv().await.unwrap().contains("two"));
    }

    #[tokio::test]
    async fn closed_destination_is_evicted() {
        let (router, _store) = setup();
        let (gone, rx_gone) = joined(&router, 8).await;
        drop(rx_gone);

        let delivery = router.submit(ChatFrame::new("a", "x")).await.unwrap();
        assert_eq!(delivery.evicted, 1);
        assert!(gone.is_closed());
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn join_returns_history_in_order() {
        let (router, _store) = setup();
        for body in ["first", "second", "third"] {
            let _ = router.submit(ChatFrame::new("alice", body)).await.unwrap();
        }
        let (conn, _rx) = ClientConnection::channel(8);
        let history = router.join(conn).await.unwrap();
        let bodies: Vec<&str> = history.iter().map(Message::body).collect();
        assert_eq!(bodies, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn join_failure_leaves_registry_unchanged() {
        let (router, store) = setup();
        store.fail_list.store(true, Ordering::SeqCst);
        let (conn, _rx) = ClientConnection::channel(8);
        let err = router.join(Arc::clone(&conn)).await.unwrap_err();
        assert!(matches!(err, HubError::History(_)));
        assert!(router.registry().is_empty());
    }

    #[tokio::test]
    async fn concurrent_submits_share_one_order() {
        let (router, store) = setup();
        let router = Arc::new(router);
        let (_a, mut rx_a) = joined(&router, 256).await;
        let (_b, mut rx_b) = joined(&router, 256).await;

        let mut tasks = Vec::new();
        for sender in 0..4 {
            let router = Arc::clone(&router);
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    let _ = router
                        .submit(ChatFrame::new(format!("u{sender}"), format!("{i}")))
                        .await
                        .unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let persisted: Vec<String> = store
            .list_ordered()
            .await
            .unwrap()
            .iter()
            .map(|m| m.to_json().unwrap())
            .collect();
        assert_eq!(persisted.len(), 40);

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        for _ in 0..40 {
            seen_a.push((*rx_a.recv().await.unwrap()).clone());
            seen_b.push((*rx_b.recv().await.unwrap()).clone());
        }
        assert_eq!(seen_a, persisted);
        assert_eq!(seen_b, persisted);
    }
}
