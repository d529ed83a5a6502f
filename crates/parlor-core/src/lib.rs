//! # parlor-core
//!
//! Types shared by every parlor crate: the chat [`Message`], the inbound
//! [`ChatFrame`], branded identifiers, and the collaborator traits the hub
//! talks to ([`MessageStore`], [`Authenticator`]).

pub mod collaborators;
pub mod errors;
pub mod ids;
pub mod message;

pub use collaborators::{Authenticator, MessageStore};
pub use errors::StoreError;
pub use ids::ConnectionId;
pub use message::{ChatFrame, Message, TIMESTAMP_FORMAT};
