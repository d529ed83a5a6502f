//! Chat message types.
//!
//! [`ChatFrame`] is what a client sends; [`Message`] is what the hub accepts,
//! persists and broadcasts. Both share the same JSON shape
//! (`username`, `message`, `timestamp`) so clients only need one decoder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server timestamp format. Fixed width, so lexical order is chronological.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An inbound frame as decoded from a client.
///
/// Missing fields decode as empty strings. The client-supplied `timestamp`
/// is kept only so the frame round-trips; the hub never trusts it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatFrame {
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

impl ChatFrame {
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            timestamp: String::new(),
        }
    }
}

/// A message accepted by the hub. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    username: String,
    #[serde(rename = "message")]
    body: String,
    timestamp: String,
}

impl Message {
    /// Accept an inbound frame, replacing whatever timestamp the client sent.
    pub fn accept(frame: ChatFrame, at: DateTime<Utc>) -> Self {
        Self {
            username: frame.username,
            body: frame.message,
            timestamp: format_timestamp(at),
        }
    }

    /// Rebuild a message that was already accepted (e.g. loaded from storage).
    pub fn from_parts(
        username: impl Into<String>,
        body: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            body: body.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}
