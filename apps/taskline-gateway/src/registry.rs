use dashmap::DashMap;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use taskline_proto::UserId;

use crate::session::{ConnectionState, SessionHandle, SessionId};

/// Identity -> live sessions bookkeeping; the single source of truth for
/// "is this user online". Multi-device is expected: one identity may own any
/// number of concurrent sessions.
#[derive(Clone)]
pub struct ConnectionRegistry {
    identities: Arc<DashMap<UserId, DashMap<SessionId, Arc<SessionHandle>>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            identities: Arc::new(DashMap::new()),
        }
    }

    /// Add a session under its identity. Idempotent per session id.
    pub fn register(&self, handle: Arc<SessionHandle>) {
        let sessions = self
            .identities
            .entry(handle.identity().clone())
            .or_default();
        sessions.insert(handle.id(), handle.clone());
        drop(sessions);
        gauge!("gateway_identities_online", self.identity_count() as f64);
        counter!("gateway_sessions_registered_total", 1);
    }

    /// Remove a session; a no-op when it was never (or already) registered,
    /// which absorbs double-close races. The identity goes offline when its
    /// last session is removed.
    pub fn unregister(&self, identity: &UserId, session: SessionId) {
        let mut emptied = false;
        if let Some(sessions) = self.identities.get(identity) {
            sessions.remove(&session);
            emptied = sessions.is_empty();
        }
        // Re-check emptiness under the removal to avoid racing a register.
        if emptied {
            self.identities
                .remove_if(identity, |_, sessions| sessions.is_empty());
        }
        gauge!("gateway_identities_online", self.identity_count() as f64);
    }

    pub fn is_online(&self, identity: &UserId) -> bool {
        self.identities
            .get(identity)
            .map(|sessions| !sessions.is_empty())
            .unwrap_or(false)
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn session_count(&self) -> usize {
        self.identities
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Per-identity session counts for the debug stats endpoint.
    pub fn snapshot(&self) -> Vec<(UserId, usize)> {
        self.identities
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }

    /// Ask every session idle past `idle_timeout` to close. The socket task
    /// owns the actual cleanup path; this only signals it.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> usize {
        // Clone handles out first so no dashmap guard is held across await.
        let mut handles = Vec::new();
        for entry in self.identities.iter() {
            for session in entry.value().iter() {
                handles.push(session.value().clone());
            }
        }

        let mut evicted = 0;
        for handle in handles {
            if handle.idle_for().await > idle_timeout {
                info!(
                    session = %handle.id(),
                    identity = %handle.identity(),
                    "evicting idle session (heartbeat timeout)"
                );
                handle.transition(ConnectionState::Closing).await;
                handle.request_close();
                counter!("gateway_sessions_evicted_total", 1);
                evicted += 1;
            }
        }
        evicted
    }

    /// Periodic dead-peer sweep.
    pub fn spawn_sweeper(&self, sweep_interval: Duration, idle_timeout: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                registry.evict_idle(idle_timeout).await;
            }
        })
    }
}
