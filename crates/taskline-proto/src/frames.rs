use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notification::Notification;
use crate::topic::{TaskId, UserId};

/// Control frames sent by the client after the handshake.
///
/// Topics travel as raw strings: an unrecognized topic is an application
/// level rejection (an `error` frame back), not a malformed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe this session to a topic.
    Join { topic: String },
    /// Unsubscribe this session from a topic.
    Leave { topic: String },
    /// Heartbeat; the server answers with `pong`.
    Ping,
}

/// Frames pushed from the gateway to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake succeeded; the session is bound to `identity`.
    Connected { identity: UserId },
    Joined { topic: String },
    Left { topic: String },
    Pong { timestamp: DateTime<Utc> },
    Error { message: String },
    /// A durable notification addressed to this session's identity.
    Notification {
        #[serde(flatten)]
        notification: Notification,
    },
    /// Ephemeral task snapshot broadcast to a `task:` room.
    TaskUpdated {
        task_id: TaskId,
        snapshot: serde_json::Value,
    },
}
