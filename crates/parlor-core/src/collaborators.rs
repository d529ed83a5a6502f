//! Interfaces the hub and the HTTP layer consume.
//!
//! The hub only ever talks to persistence and credentials through these
//! traits; concrete backends live in `parlor-store`.

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::message::Message;

/// Durable append-only message log.
///
/// Implementations must tolerate concurrent `append` / `list_ordered` calls.
/// `list_ordered` returns messages in the order they were appended.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: &Message) -> Result<(), StoreError>;
    async fn list_ordered(&self) -> Result<Vec<Message>, StoreError>;
}

/// Credential verification and registration.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `true` only if the user exists and the password matches.
    async fn verify(&self, username: &str, password: &str) -> bool;

    /// Create a user. A taken username is reported as [`StoreError::Conflict`].
    async fn register(&self, username: &str, password: &str) -> Result<(), StoreError>;
}
