//! Wire format spoken between the browser widget and the relay server.
//!
//! One JSON envelope per WebSocket frame, discriminated by `type`.

use serde::{Deserialize, Serialize};

/// Interval at which the widget emits `heartbeat` envelopes (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Close codes (4000-range for application-level).
///
/// `4001`: send attempted without a valid session; closed immediately after
/// the error notice. `4002`: the subject is blocked; closed after a short
/// delay so the notice is delivered first.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_BLOCKED: u16 = 4002;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// An envelope received from the browser widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Bind the connection to the persisted browser client id.
    Init {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// Visitor text to relay.
    Message { message: String },
    /// Legacy alias for `message`, still emitted by older widget builds.
    #[serde(rename = "chatMessage")]
    ChatMessage { message: String },
    /// Keep-alive; no response required.
    Heartbeat,
}

impl ClientEnvelope {
    /// The visitor text carried by this envelope, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            ClientEnvelope::Message { message } | ClientEnvelope::ChatMessage { message } => {
                Some(message)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// An envelope sent to the browser widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Bot or support text.
    Message {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        author: Option<String>,
    },
    /// Echo of an accepted visitor message.
    MessageSent { message: String },
    /// Rejection or failure notice.
    Error { message: String },
    /// Terminal or administrative notice (e.g. ticket closed).
    Status { message: String },
}

impl ServerEnvelope {
    /// A staff reply relayed from the support channel.
    pub fn support(author: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEnvelope::Message {
            message: message.into(),
            sender: Some("support".to_string()),
            author: Some(author.into()),
        }
    }

    /// A system notice shown in the transcript as bot origin.
    pub fn notice(message: impl Into<String>) -> Self {
        ServerEnvelope::Message {
            message: message.into(),
            sender: None,
            author: None,
        }
    }

    pub fn echo(message: impl Into<String>) -> Self {
        ServerEnvelope::MessageSent {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEnvelope::Error {
            message: message.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        ServerEnvelope::Status {
            message: message.into(),
        }
    }
}
