//! Server shutdown: stop accepting, end every hub session, wait for the
//! registry to drain, then join the serve task.

use std::sync::Arc;
use std::time::Duration;

use parlor_hub::Hub;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// What a graceful shutdown managed to finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Connections still registered when the deadline passed.
    pub remaining_connections: usize,
    /// The serve task finished.
    pub listener_stopped: bool,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.remaining_connections == 0 && self.listener_stopped
    }
}

/// Owns the listener's cancellation token and the hub it fronts.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    hub: Arc<Hub>,
}

impl ShutdownCoordinator {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            token: CancellationToken::new(),
            hub,
        }
    }

    /// Token the serve loop waits on before it stops accepting.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting and close every live session. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
        self.hub.shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down, then wait up to `timeout` for the hub to drain and for
    /// `serve` to return. A task still running at the deadline is aborted.
    pub async fn graceful_shutdown(&self, serve: JoinHandle<()>, timeout: Option<Duration>) -> DrainReport {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let deadline = Instant::now() + timeout;

        self.shutdown();
        info!(
            connections = self.hub.connection_count(),
            timeout_secs = timeout.as_secs(),
            "draining connections"
        );

        let drained = tokio::time::timeout_at(deadline, async {
            while self.hub.connection_count() > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();

        let abort = serve.abort_handle();
        let listener_stopped = drained && tokio::time::timeout_at(deadline, serve).await.is_ok();
        if !listener_stopped {
            abort.abort();
        }

        let report = DrainReport {
            remaining_connections: self.hub.connection_count(),
            listener_stopped,
        };
        if report.is_clean() {
            info!("shutdown complete");
        } else {
            warn!(
                remaining = report.remaining_connections,
                listener_stopped, "shutdown timed out after {timeout:?}"
            );
        }
        report
    }
}
