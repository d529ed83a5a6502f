//! # parlor-hub
//!
//! The connection/broadcast hub: tracks live connections, accepts inbound
//! chat messages, persists them and fans them out in one total order.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection handle: bounded outbound queue + close token |
//! | `registry` | Thread-safe set of live connections with copy-on-read snapshots |
//! | `router` | Serialized persist + fan-out; join with atomic history cut |
//! | `session` | Per-connection state machine: join, replay, read loop, teardown |
//! | `transport` | `FrameSink` / `FrameStream` traits and an in-memory transport |
//! | `hub` | Composition root used by the HTTP layer |
//!
//! ## Data flow
//!
//! `transport` → `session` → `router::submit` → `MessageStore::append` →
//! `registry::snapshot` → each `connection` queue → session writer task →
//! `transport`.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;

pub use config::HubConfig;
pub use connection::ClientConnection;
pub use error::{DeliveryError, HubError, TransportError};
pub use hub::Hub;
pub use registry::ConnectionRegistry;
pub use router::{BroadcastRouter, Delivery};
pub use session::{CloseReason, Session, SessionOutcome, SessionState};
pub use transport::{Frame, FrameSink, FrameStream};
