//! # parlor-server
//!
//! HTTP and WebSocket front end. Upgrades `ws_path` connections and hands
//! them to the [`parlor_hub::Hub`], serves registration and login against
//! an [`parlor_core::Authenticator`], and exposes `/health` and `/metrics`.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{ApiError, ServerError};
pub use server::{AppState, ParlorServer, ServerHandle};
pub use shutdown::{DrainReport, ShutdownCoordinator};
