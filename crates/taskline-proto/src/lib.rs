//! Shared wire protocol and data model for the Taskline realtime gateway.
//!
//! Everything that crosses the WebSocket boundary lives here so the gateway
//! and the client session manager cannot drift apart: topics, control and
//! event frames, and the `Notification` record the REST fallback serves.

pub mod frames;
pub mod notification;
pub mod topic;

pub use frames::{ClientFrame, ServerFrame};
pub use notification::{NewNotification, Notification, NotificationKind};
pub use topic::{InvalidTopic, NotificationId, TaskId, Topic, UserId};

/// Bumped whenever a frame shape changes incompatibly.
pub const PROTOCOL_VERSION: u16 = 1;
