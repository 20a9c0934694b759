use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Stable user identity, as produced by the auth verifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable unique id of a persisted notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for a newly persisted notification.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid topic: {0:?}")]
pub struct InvalidTopic(pub String);

/// A named delivery channel. Two families exist: `user:<id>` (one per
/// identity, joined automatically at handshake) and `task:<id>` (joined and
/// left explicitly by the client).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    User(UserId),
    Task(TaskId),
}

impl Topic {
    pub fn user(id: impl Into<String>) -> Self {
        Topic::User(UserId::new(id))
    }

    pub fn task(id: impl Into<String>) -> Self {
        Topic::Task(TaskId::new(id))
    }

    /// The identity a `user:` topic belongs to, if any.
    pub fn owner(&self) -> Option<&UserId> {
        match self {
            Topic::User(id) => Some(id),
            Topic::Task(_) => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::User(id) => write!(f, "user:{id}"),
            Topic::Task(id) => write!(f, "task:{id}"),
        }
    }
}

impl FromStr for Topic {
    type Err = InvalidTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Topic::user(id)),
            Some(("task", id)) if !id.is_empty() => Ok(Topic::task(id)),
            _ => Err(InvalidTopic(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn parses_both_topic_families() {
        assert_eq!("user:u1".parse::<Topic>().unwrap(), Topic::user("u1"));
        assert_eq!("task:t7".parse::<Topic>().unwrap(), Topic::task("t7"));
    }

    #[test_timeout::timeout]
    fn rejects_unknown_or_empty_topics() {
        for bad in ["", "user:", "task:", "room:t1", "user", "task-t1"] {
            assert!(bad.parse::<Topic>().is_err(), "{bad:?} should be invalid");
        }
    }

    #[test_timeout::timeout]
    fn display_round_trips() {
        let topic = Topic::task("t42");
        assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
    }

    #[test_timeout::timeout]
    fn user_topic_exposes_owner() {
        assert_eq!(Topic::user("u1").owner(), Some(&UserId::new("u1")));
        assert_eq!(Topic::task("t1").owner(), None);
    }
}
