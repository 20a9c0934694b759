use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::topic::{NotificationId, TaskId, UserId};

/// What kind of change a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Assigned,
    Updated,
    StatusChanged,
    Comment,
    DueSoon,
}

/// A persisted notification, owned by the notification store. The gateway
/// only reads these: the push is a notification-of-change, the stored row is
/// the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Input shape for creating a notification; id, read flag, and timestamp are
/// assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient: UserId,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    pub message: String,
    pub kind: NotificationKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn kind_uses_snake_case_tags() {
        let json = serde_json::to_string(&NotificationKind::StatusChanged).unwrap();
        assert_eq!(json, "\"status_changed\"");
        let back: NotificationKind = serde_json::from_str("\"due_soon\"").unwrap();
        assert_eq!(back, NotificationKind::DueSoon);
    }

    #[test_timeout::timeout]
    fn task_is_omitted_when_absent() {
        let n = Notification {
            id: NotificationId::new("n1"),
            recipient: UserId::new("u1"),
            sender: UserId::new("u2"),
            task: None,
            message: "assigned to you".into(),
            kind: NotificationKind::Assigned,
            read: false,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&n).unwrap();
        assert!(value.get("task").is_none());
    }
}
