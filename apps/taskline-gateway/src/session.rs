use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

use taskline_proto::{ServerFrame, UserId};

/// Transport-assigned session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of an accepted gateway connection. Credential verification
/// happens before the upgrade completes, so a handle only ever exists for an
/// authenticated session and starts `Active`; a failed handshake is rejected
/// at the HTTP layer and never produces a handle at all. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!((self, next), (Active, Closing) | (Closing, Closed))
    }
}

/// Send failed because the session's writer is gone.
#[derive(Debug)]
pub struct SessionGone;

/// Per-connection state shared between the socket task, the room manager,
/// and the registry sweeper. The outbound channel plus its single writer
/// task is what serializes writes to the transport.
pub struct SessionHandle {
    id: SessionId,
    identity: UserId,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    state: RwLock<ConnectionState>,
    last_activity: RwLock<Instant>,
    malformed_frames: AtomicU32,
    close: Notify,
}

impl SessionHandle {
    /// A handle only exists once the handshake bound an identity, so it is
    /// born `Active`.
    pub fn new(
        id: SessionId,
        identity: UserId,
        outbound: mpsc::UnboundedSender<ServerFrame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            identity,
            outbound,
            state: RwLock::new(ConnectionState::Active),
            last_activity: RwLock::new(Instant::now()),
            malformed_frames: AtomicU32::new(0),
            close: Notify::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Queue a frame for this session's writer task. Queueing preserves
    /// order; a failure means the writer is gone and the session is dead.
    pub fn send(&self, frame: ServerFrame) -> Result<(), SessionGone> {
        self.outbound.send(frame).map_err(|_| SessionGone)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Apply a state transition, refusing illegal ones.
    pub async fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write().await;
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Record inbound activity for dead-peer detection.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_activity.read().await.elapsed()
    }

    /// Bump the malformed-frame counter, returning the new total.
    pub fn record_malformed(&self) -> u32 {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Ask the socket task to shut this session down.
    pub fn request_close(&self) {
        self.close.notify_one();
    }

    pub async fn wait_close(&self) {
        self.close.notified().await;
    }
}
