use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use taskline_proto::{ClientFrame, Notification, NotificationId, ServerFrame, TaskId, Topic};

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::dedup::RecentlySeen;
use crate::rest::{RestClient, RestError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Rest(#[from] RestError),
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("gateway rejected the session: {0}")]
    Rejected(String),
}

/// The only connectivity states the application ever sees. `Offline` is
/// terminal for the automatic retry loop; only an explicit [`SessionManager::reconnect`]
/// leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Connecting,
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectivityState),
    Notification(Notification),
    TaskUpdated {
        task_id: TaskId,
        snapshot: serde_json::Value,
    },
    UnreadChanged(u64),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://gateway:8080/ws`.
    pub gateway_url: String,
    /// Base URL of the REST fallback, e.g. `http://gateway:8080/`.
    pub rest_url: String,
    pub credential: String,
    pub reconnect: ReconnectPolicy,
    pub ping_interval: Duration,
    /// Extra slack past the ping interval before the link counts as dead.
    pub pong_timeout: Duration,
    pub handshake_timeout: Duration,
    pub dedup_capacity: usize,
}

impl ClientConfig {
    pub fn new(
        gateway_url: impl Into<String>,
        rest_url: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            rest_url: rest_url.into(),
            credential: credential.into(),
            reconnect: ReconnectPolicy::default(),
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            dedup_capacity: 512,
        }
    }
}

/// Room membership intent and the live connection's outbound queue, under
/// one lock: a join that races a reconnect is either replayed from the
/// desired set or sent directly, never both.
#[derive(Default)]
struct Subscriptions {
    /// The topic set this manager wants joined; re-sent on every reconnect.
    tasks: BTreeSet<TaskId>,
    /// Outbound queue of the live connection, if any.
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
}

struct Shared {
    config: ClientConfig,
    rest: RestClient,
    state_tx: watch::Sender<ConnectivityState>,
    events: mpsc::UnboundedSender<ClientEvent>,
    subs: Mutex<Subscriptions>,
    seen: Mutex<RecentlySeen>,
    unread: AtomicU64,
    reconnect_gate: Notify,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ConnectivityState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            self.emit(ClientEvent::StateChanged(next));
        }
    }

    fn subs(&self) -> std::sync::MutexGuard<'_, Subscriptions> {
        self.subs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn join_task(&self, task: &TaskId) {
        let mut subs = self.subs();
        subs.tasks.insert(task.clone());
        if let Some(tx) = subs.outbound.as_ref() {
            let _ = tx.send(ClientFrame::Join {
                topic: Topic::Task(task.clone()).to_string(),
            });
        }
    }

    fn leave_task(&self, task: &TaskId) {
        let mut subs = self.subs();
        subs.tasks.remove(task);
        if let Some(tx) = subs.outbound.as_ref() {
            let _ = tx.send(ClientFrame::Leave {
                topic: Topic::Task(task.clone()).to_string(),
            });
        }
    }

    fn set_unread(&self, count: u64) {
        self.unread.store(count, Ordering::Relaxed);
        self.emit(ClientEvent::UnreadChanged(count));
    }

    /// Reconcile with the store through the list endpoint: seed the
    /// recently-seen set with every row the server already holds and
    /// recompute the unread count from that same snapshot. The seeding is
    /// what absorbs the push-vs-hydration race: a push may arrive for a row
    /// the hydration already counted, and it must dedup instead of bumping
    /// the counter again. Tolerates REST being down; the cached value simply
    /// stays stale until the next opportunity.
    async fn hydrate(&self) {
        match self.rest.list_notifications().await {
            Ok(rows) => {
                let mut unread = 0;
                {
                    let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
                    for row in &rows {
                        seen.insert(&row.id);
                        if !row.read {
                            unread += 1;
                        }
                    }
                }
                self.set_unread(unread);
            }
            Err(err) => warn!(error = %err, "hydration failed"),
        }
    }

    fn handle_server_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Notification { notification } => {
                let first_time = self
                    .seen
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(&notification.id);
                if !first_time {
                    debug!(id = %notification.id, "duplicate push suppressed");
                    return;
                }
                let emit_unread = !notification.read;
                self.emit(ClientEvent::Notification(notification));
                if emit_unread {
                    let count = self.unread.fetch_add(1, Ordering::Relaxed) + 1;
                    self.emit(ClientEvent::UnreadChanged(count));
                }
            }
            ServerFrame::TaskUpdated { task_id, snapshot } => {
                self.emit(ClientEvent::TaskUpdated { task_id, snapshot });
            }
            ServerFrame::Joined { topic } => debug!(%topic, "joined"),
            ServerFrame::Left { topic } => debug!(%topic, "left"),
            ServerFrame::Error { message } => warn!(%message, "gateway error frame"),
            ServerFrame::Pong { .. } | ServerFrame::Connected { .. } => {}
        }
    }
}

/// Membership in a task room. Dropping the handle (or calling [`leave`])
/// unsubscribes; there is no other way to leave, so listener bookkeeping
/// cannot drift from room membership.
///
/// [`leave`]: RoomSubscription::leave
pub struct RoomSubscription {
    shared: Arc<Shared>,
    task: TaskId,
}

impl RoomSubscription {
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn leave(self) {}
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.shared.leave_task(&self.task);
    }
}

/// Owns the gateway connection on behalf of the application.
pub struct SessionManager {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectivityState>,
    runner: JoinHandle<()>,
}

impl SessionManager {
    /// Spawn the connection loop. Events (pushes, unread changes, state
    /// transitions) arrive on the returned receiver.
    pub fn start(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        // Fail fast on bad urls instead of spinning the retry loop on them.
        Url::parse(&config.gateway_url)?;
        let rest = RestClient::new(&config.rest_url, &config.credential)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectivityState::Connecting);
        let shared = Arc::new(Shared {
            seen: Mutex::new(RecentlySeen::new(config.dedup_capacity)),
            config,
            rest,
            state_tx,
            events: events_tx,
            subs: Mutex::new(Subscriptions::default()),
            unread: AtomicU64::new(0),
            reconnect_gate: Notify::new(),
        });

        let runner = tokio::spawn(run_loop(shared.clone()));
        Ok((
            Self {
                shared,
                state_rx,
                runner,
            },
            events_rx,
        ))
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state_rx.borrow()
    }

    /// Watch connectivity transitions without consuming the event stream.
    pub fn watch_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
    }

    pub fn unread(&self) -> u64 {
        self.shared.unread.load(Ordering::Relaxed)
    }

    /// Subscribe to a task's room. The manager remembers the subscription
    /// and re-joins it after every reconnect until the handle is dropped.
    pub fn join_task(&self, task: TaskId) -> RoomSubscription {
        self.shared.join_task(&task);
        RoomSubscription {
            shared: self.shared.clone(),
            task,
        }
    }

    /// Mark one notification read on the server, then re-hydrate from the
    /// authoritative list.
    pub async fn mark_read(&self, id: &NotificationId) -> Result<(), ClientError> {
        self.shared.rest.mark_read(id).await?;
        self.shared.hydrate().await;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), ClientError> {
        self.shared.rest.mark_all_read().await?;
        self.shared.hydrate().await;
        Ok(())
    }

    pub async fn list_notifications(&self) -> Result<Vec<Notification>, ClientError> {
        Ok(self.shared.rest.list_notifications().await?)
    }

    /// Leave the terminal `Offline` state and start a fresh round of
    /// connection attempts.
    pub fn reconnect(&self) {
        self.shared.reconnect_gate.notify_one();
    }

    pub fn shutdown(self) {
        self.runner.abort();
        self.shared.set_state(ConnectivityState::Offline);
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let mut backoff = Backoff::new(shared.config.reconnect.clone());
    loop {
        shared.set_state(ConnectivityState::Connecting);
        match run_connection(&shared).await {
            Ok(()) => {
                // The link was established and later lost; retry with a
                // fresh backoff round.
                info!("gateway connection lost; reconnecting");
                backoff.reset();
            }
            Err(err) => {
                debug!(error = %err, attempt = backoff.attempt(), "connection attempt failed");
            }
        }

        match backoff.next_delay() {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                warn!("reconnect attempts exhausted; going offline");
                shared.set_state(ConnectivityState::Offline);
                shared.reconnect_gate.notified().await;
                backoff.reset();
            }
        }
    }
}

/// Drive one connection from dial to close. `Ok(())` means the session was
/// fully established before it ended; any error before the `connected` frame
/// counts against the backoff budget.
async fn run_connection(shared: &Arc<Shared>) -> Result<(), ClientError> {
    let config = &shared.config;
    let mut url = Url::parse(&config.gateway_url)?;
    url.query_pairs_mut().append_pair("token", &config.credential);

    let (socket, _) = tokio::time::timeout(config.handshake_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ClientError::HandshakeTimeout)??;
    let (mut sink, mut stream) = socket.split();

    // The session exists once the gateway confirms the bound identity.
    let identity = tokio::time::timeout(config.handshake_timeout, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(ServerFrame::Connected { identity }) => return Ok(identity),
                    Ok(ServerFrame::Error { message }) => {
                        return Err(ClientError::Rejected(message))
                    }
                    _ => continue,
                },
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
                None => {
                    return Err(ClientError::Rejected(
                        "closed before handshake completed".to_string(),
                    ))
                }
            }
        }
    })
    .await
    .map_err(|_| ClientError::HandshakeTimeout)??;
    info!(%identity, "gateway session established");

    // The desired set is the source of truth for room membership: replay it
    // on every (re)connect, then publish the queue, all under the one lock.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
    {
        let mut subs = shared.subs();
        for task in subs.tasks.iter() {
            let _ = out_tx.send(ClientFrame::Join {
                topic: Topic::Task(task.clone()).to_string(),
            });
        }
        subs.outbound = Some(out_tx.clone());
    }
    // `Online` doubles as the replay-complete barrier.
    shared.set_state(ConnectivityState::Online);

    shared.hydrate().await;

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_pong = Instant::now();

    let result = loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_pong.elapsed() > config.ping_interval + config.pong_timeout {
                    warn!("no pong within deadline; dropping connection");
                    break Ok(());
                }
                let _ = out_tx.send(ClientFrame::Ping);
            }
            frame = out_rx.recv() => {
                // out_tx lives in this scope, so recv never yields None here.
                let Some(frame) = frame else { break Ok(()) };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "dropping unserializable frame");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    debug!(error = %err, "write failed");
                    break Ok(());
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Pong { .. }) => last_pong = Instant::now(),
                        Ok(frame) => shared.handle_server_frame(frame),
                        Err(err) => warn!(error = %err, "unparseable server frame"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "read failed");
                        break Ok(());
                    }
                }
            }
        }
    };

    shared.subs().outbound = None;
    result
}
