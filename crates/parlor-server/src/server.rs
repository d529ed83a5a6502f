//! `ParlorServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use parlor_core::{Authenticator, MessageStore};
use parlor_hub::Hub;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub auth: Arc<dyn Authenticator>,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    pub start_time: Instant,
    pub max_message_bytes: usize,
}

/// The chat server.
pub struct ParlorServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    auth: Arc<dyn Authenticator>,
    metrics: PrometheusHandle,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl ParlorServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        auth: Arc<dyn Authenticator>,
        metrics: PrometheusHandle,
    ) -> Self {
        let hub = Arc::new(Hub::new(store, config.hub.clone()));
        Self {
            config,
            hub: Arc::clone(&hub),
            auth,
            metrics,
            shutdown: Arc::new(ShutdownCoordinator::new(Arc::clone(&hub))),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            auth: Arc::clone(&self.auth),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            max_message_bytes: self.config.max_message_bytes,
        };

        let mut router: Router<AppState> = Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .route("/register", post(handlers::register))
            .route("/login", post(handlers::login))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics));
        if let Some(dir) = &self.config.static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }

        router
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task.
    ///
    /// Cancelling the shutdown coordinator stops accepting connections and
    /// ends every hub session.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, ws_path = %self.config.ws_path, "parlor server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                error!(error = %e, "server error");
            }
            info!("server stopped");
        });

        Ok(ServerHandle {
            addr: local_addr,
            task,
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}
