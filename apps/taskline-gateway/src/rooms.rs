use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use taskline_proto::{ServerFrame, Topic};

use crate::session::{SessionHandle, SessionId};

#[derive(Debug, Error, PartialEq)]
pub enum JoinError {
    #[error("sessions may not join another user's topic")]
    Unauthorized,
}

/// Topic-scoped fan-out. Membership is session-scoped, not identity-scoped:
/// closing one of an identity's sessions leaves its other sessions' rooms
/// untouched.
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<DashMap<Topic, DashMap<SessionId, Arc<SessionHandle>>>>,
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe a session to a topic. Idempotent. A session may only join
    /// the `user:` topic of its own identity.
    pub fn join(&self, handle: &Arc<SessionHandle>, topic: Topic) -> Result<bool, JoinError> {
        if let Some(owner) = topic.owner() {
            if owner != handle.identity() {
                return Err(JoinError::Unauthorized);
            }
        }
        let members = self.rooms.entry(topic).or_default();
        let newly_joined = members.insert(handle.id(), handle.clone()).is_none();
        Ok(newly_joined)
    }

    /// Unsubscribe; a no-op when the session is not a member.
    pub fn leave(&self, session: SessionId, topic: &Topic) -> bool {
        let mut emptied = false;
        let mut removed = false;
        if let Some(members) = self.rooms.get(topic) {
            removed = members.remove(&session).is_some();
            emptied = members.is_empty();
        }
        if emptied {
            self.rooms.remove_if(topic, |_, members| members.is_empty());
        }
        removed
    }

    /// Deliver a frame to every session joined to `topic`, in queue order per
    /// session. A dead member is skipped and evicted; it never delays or
    /// fails delivery to the others. Zero members is a normal no-op.
    pub fn publish(&self, topic: &Topic, frame: &ServerFrame) -> usize {
        let Some(members) = self.rooms.get(topic) else {
            return 0;
        };

        let mut delivered = 0usize;
        let mut dead = Vec::new();
        for entry in members.iter() {
            match entry.value().send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(*entry.key()),
            }
        }
        drop(members);

        for session in dead {
            debug!(%session, %topic, "evicting dead session from room");
            counter!("gateway_room_members_evicted_total", 1);
            self.leave(session, topic);
        }

        counter!("gateway_frames_published_total", delivered as u64);
        delivered
    }

    /// Drop every membership a closing session holds.
    pub fn purge(&self, session: SessionId) {
        let topics: Vec<Topic> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains_key(&session))
            .map(|entry| entry.key().clone())
            .collect();
        for topic in topics {
            self.leave(session, &topic);
        }
    }

    pub fn member_count(&self, topic: &Topic) -> usize {
        self.rooms
            .get(topic)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}
