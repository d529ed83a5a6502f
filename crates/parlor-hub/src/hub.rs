use std::sync::Arc;

use metrics::{counter, gauge};
use parlor_core::MessageStore;
use parlor_telemetry::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::HubConfig;
use crate::registry::ConnectionRegistry;
use crate::router::BroadcastRouter;
use crate::session::{Session, SessionOutcome};
use crate::transport::{FrameSink, FrameStream};

/// Composition root: one registry, one router, many sessions.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    router: Arc<BroadcastRouter>,
    config: HubConfig,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(store: Arc<dyn MessageStore>, config: HubConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(BroadcastRouter::new(Arc::clone(&registry), store));
        Self {
            registry,
            router,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Run a session for an already-upgraded connection until it closes.
    pub async fn connect<S, R>(&self, sink: S, stream: R) -> SessionOutcome
    where
        S: FrameSink,
        R: FrameStream,
    {
        let session = Session::new(
            Arc::clone(&self.router),
            self.config.clone(),
            self.shutdown.child_token(),
            sink,
            stream,
        );
        info!(conn_id = %session.id(), "connection opened");
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        let outcome = session.run().await;

        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => outcome.reason.as_str()).increment(1);
        outcome
    }

    /// End every running session. Sessions started afterwards end at once.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(connections = self.registry.len(), "hub shutting down");
        }
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}
