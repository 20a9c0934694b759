use metrics::counter;
use tracing::debug;

use taskline_proto::{Notification, ServerFrame, TaskId, Topic, UserId};

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomManager;

/// The only entry point the mutation layer uses to trigger a push.
///
/// Deliberately store-free: persistence happens upstream before dispatch, so
/// a push failure can never lose the durable record and a persistence
/// failure never results in a push for a row that does not exist.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
    rooms: RoomManager,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry, rooms: RoomManager) -> Self {
        Self { registry, rooms }
    }

    /// Push a notification to every live session of `identity`. Returns
    /// whether at least one session received it; the return value is for
    /// observability only. An offline recipient is a normal skip: the row
    /// stays readable through the REST fallback.
    pub fn notify_user(&self, identity: &UserId, notification: Notification) -> bool {
        let topic = Topic::User(identity.clone());
        let delivered = self
            .rooms
            .publish(&topic, &ServerFrame::Notification { notification });

        counter!(
            "gateway_notifications_pushed_total",
            1,
            "outcome" => if delivered > 0 { "delivered" } else { "skipped" }
        );
        if delivered == 0 {
            debug!(%identity, "recipient has no live session; push skipped");
        }
        delivered > 0
    }

    /// Broadcast an ephemeral task snapshot to everyone watching the task's
    /// room. No durable record is created for these.
    pub fn broadcast_task_update(&self, task_id: &TaskId, snapshot: serde_json::Value) -> usize {
        let topic = Topic::Task(task_id.clone());
        let delivered = self.rooms.publish(
            &topic,
            &ServerFrame::TaskUpdated {
                task_id: task_id.clone(),
                snapshot,
            },
        );
        counter!("gateway_task_broadcasts_total", 1);
        delivered
    }

    pub fn is_online(&self, identity: &UserId) -> bool {
        self.registry.is_online(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionHandle, SessionId};
    use chrono::Utc;
    use std::sync::Arc;
    use taskline_proto::{NotificationId, NotificationKind};
    use tokio::sync::mpsc;

    fn session(identity: &str) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionHandle::new(SessionId::generate(), UserId::new(identity), tx),
            rx,
        )
    }

    fn notification(id: &str, recipient: &str) -> Notification {
        Notification {
            id: NotificationId::new(id),
            recipient: UserId::new(recipient),
            sender: UserId::new("admin"),
            task: Some(TaskId::new("T7")),
            message: "you were assigned".into(),
            kind: NotificationKind::Assigned,
            read: false,
            created_at: Utc::now(),
        }
    }

    /// U1 holds two sessions: S1 watches `task:T7` as well, S2 only its user
    /// room. A task broadcast reaches only S1; a user notification reaches
    /// both — and nobody else.
    #[test_timeout::tokio_timeout_test]
    async fn routes_to_user_sessions_and_task_watchers_independently() {
        let registry = ConnectionRegistry::new();
        let rooms = RoomManager::new();
        let dispatcher = Dispatcher::new(registry.clone(), rooms.clone());
        let u1 = UserId::new("U1");

        let (s1, mut rx1) = session("U1");
        let (s2, mut rx2) = session("U1");
        let (other, mut other_rx) = session("U9");
        for handle in [&s1, &s2, &other] {
            registry.register(handle.clone());
            rooms
                .join(handle, Topic::User(handle.identity().clone()))
                .unwrap();
        }
        rooms.join(&s1, Topic::task("T7")).unwrap();

        let broadcast = dispatcher.broadcast_task_update(
            &TaskId::new("T7"),
            serde_json::json!({"status": "in_progress"}),
        );
        assert_eq!(broadcast, 1);
        assert!(matches!(
            rx1.recv().await,
            Some(ServerFrame::TaskUpdated { .. })
        ));
        assert!(rx2.try_recv().is_err());

        assert!(dispatcher.notify_user(&u1, notification("n1", "U1")));
        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await {
                Some(ServerFrame::Notification { notification }) => {
                    assert_eq!(notification.id, NotificationId::new("n1"));
                }
                other => panic!("expected notification frame, got {other:?}"),
            }
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn offline_recipient_is_a_skip_not_an_error() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new(), RoomManager::new());
        let delivered = dispatcher.notify_user(&UserId::new("nobody"), notification("n2", "nobody"));
        assert!(!delivered);
        assert!(!dispatcher.is_online(&UserId::new("nobody")));
    }
}
