use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

use taskline_proto::{NewNotification, Notification, NotificationId, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("notification not found")]
    NotFound,
    #[error("notification belongs to another user")]
    Forbidden,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable notification record access. The store itself is an external
/// collaborator; the gateway only consumes this capability for the REST
/// fallback and for the persist-then-push internal endpoint.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError>;
    /// All notifications for a recipient, newest first.
    async fn list_for(&self, recipient: &UserId) -> Result<Vec<Notification>, StoreError>;
    async fn mark_read(
        &self,
        recipient: &UserId,
        id: &NotificationId,
    ) -> Result<Notification, StoreError>;
    /// Returns how many rows flipped from unread to read.
    async fn mark_all_read(&self, recipient: &UserId) -> Result<u64, StoreError>;
    async fn unread_count(&self, recipient: &UserId) -> Result<u64, StoreError>;
    async fn delete(&self, recipient: &UserId, id: &NotificationId) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn NotificationStore>;

/// In-memory store backing the binary in development and the test suites.
#[derive(Default)]
pub struct MemoryNotificationStore {
    rows: DashMap<NotificationId, Notification>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_owned(
        &self,
        recipient: &UserId,
        id: &NotificationId,
    ) -> Result<Notification, StoreError> {
        let row = self.rows.get(id).ok_or(StoreError::NotFound)?;
        if &row.recipient != recipient {
            return Err(StoreError::Forbidden);
        }
        Ok(row.clone())
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError> {
        let row = Notification {
            id: NotificationId::generate(),
            recipient: new.recipient,
            sender: new.sender,
            task: new.task,
            message: new.message,
            kind: new.kind,
            read: false,
            created_at: Utc::now(),
        };
        self.rows.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn list_for(&self, recipient: &UserId) -> Result<Vec<Notification>, StoreError> {
        let mut rows: Vec<Notification> = self
            .rows
            .iter()
            .filter(|entry| &entry.value().recipient == recipient)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn mark_read(
        &self,
        recipient: &UserId,
        id: &NotificationId,
    ) -> Result<Notification, StoreError> {
        self.get_owned(recipient, id)?;
        let mut row = self.rows.get_mut(id).ok_or(StoreError::NotFound)?;
        row.read = true;
        Ok(row.clone())
    }

    async fn mark_all_read(&self, recipient: &UserId) -> Result<u64, StoreError> {
        let mut flipped = 0;
        for mut entry in self.rows.iter_mut() {
            if &entry.recipient == recipient && !entry.read {
                entry.read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn unread_count(&self, recipient: &UserId) -> Result<u64, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| &entry.recipient == recipient && !entry.read)
            .count() as u64)
    }

    async fn delete(&self, recipient: &UserId, id: &NotificationId) -> Result<(), StoreError> {
        self.get_owned(recipient, id)?;
        self.rows.remove(id);
        Ok(())
    }
}
