//! WebSocket upgrade and per-connection socket task.
//!
//! The credential travels as a `?token=` query parameter and is verified
//! before the upgrade completes, so a failed handshake never produces a
//! registered session. After the upgrade the socket task owns the single
//! cleanup path; the sweeper and room manager only ever signal it.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use taskline_proto::{ClientFrame, ServerFrame, Topic, UserId};

use crate::rooms::JoinError;
use crate::server::AppState;
use crate::session::{ConnectionState, SessionHandle, SessionId};

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    token: Option<String>,
}

fn reject(reason: &str) -> Response {
    counter!("gateway_handshakes_failed_total", 1);
    (StatusCode::UNAUTHORIZED, reason.to_string()).into_response()
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Response {
    let token = match query.token {
        Some(token) if !token.is_empty() => token,
        _ => return reject("no credential supplied"),
    };

    let verified = tokio::time::timeout(
        state.config.handshake_timeout,
        state.verifier.verify(&token),
    )
    .await;
    let identity = match verified {
        Ok(Ok(identity)) => identity,
        Ok(Err(err)) => {
            debug!(error = %err, "websocket handshake rejected");
            return reject(&err.to_string());
        }
        Err(_) => {
            warn!("credential check timed out during handshake");
            return reject("credential check timed out");
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: UserId) {
    let session_id = SessionId::generate();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let handle = SessionHandle::new(session_id, identity.clone(), outbound_tx);

    state.registry.register(handle.clone());
    // A session's own user topic cannot be rejected.
    let _ = state.rooms.join(&handle, Topic::User(identity.clone()));

    counter!("gateway_connections_total", 1);
    info!(session = %session_id, %identity, "session connected");

    let (mut sink, mut stream) = socket.split();

    // Single writer task per session: every producer goes through the
    // unbounded queue, so frames for this session leave in queue order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "dropping unserializable frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let _ = handle.send(ServerFrame::Connected {
        identity: identity.clone(),
    });

    loop {
        tokio::select! {
            _ = handle.wait_close() => {
                debug!(session = %session_id, "close requested");
                break;
            }
            incoming = stream.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        debug!(session = %session_id, error = %err, "socket read error");
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Text(text) => {
                        if !handle_text(&state, &handle, &text).await {
                            break;
                        }
                    }
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if !handle_text(&state, &handle, &text).await {
                                break;
                            }
                        }
                        Err(_) => {
                            if !report_malformed(&state, &handle, "binary frame is not utf-8") {
                                break;
                            }
                        }
                    },
                    Message::Ping(_) | Message::Pong(_) => handle.touch().await,
                    Message::Close(_) => break,
                }
            }
        }
    }

    // The one cleanup path. Both calls are idempotent, so racing a sweeper
    // triggered close is harmless.
    handle.transition(ConnectionState::Closing).await;
    state.rooms.purge(session_id);
    state.registry.unregister(&identity, session_id);
    handle.transition(ConnectionState::Closed).await;
    writer.abort();
    counter!("gateway_disconnections_total", 1);
    info!(session = %session_id, %identity, "session closed");
}

/// Process one text frame. Returns `false` when the session must close.
async fn handle_text(state: &AppState, handle: &Arc<SessionHandle>, text: &str) -> bool {
    handle.touch().await;

    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => return report_malformed(state, handle, &err.to_string()),
    };

    match frame {
        ClientFrame::Join { topic } => {
            let parsed = match topic.parse::<Topic>() {
                Ok(parsed) => parsed,
                Err(err) => {
                    // A well-formed frame naming a bad topic is an
                    // application error, not protocol abuse.
                    let _ = handle.send(ServerFrame::Error {
                        message: err.to_string(),
                    });
                    return true;
                }
            };
            match state.rooms.join(handle, parsed.clone()) {
                Ok(_) => {
                    debug!(session = %handle.id(), %parsed, "joined topic");
                    let _ = handle.send(ServerFrame::Joined { topic });
                }
                Err(JoinError::Unauthorized) => {
                    counter!("gateway_joins_rejected_total", 1);
                    let _ = handle.send(ServerFrame::Error {
                        message: format!("not allowed to join {topic}"),
                    });
                }
            }
        }
        ClientFrame::Leave { topic } => {
            match topic.parse::<Topic>() {
                Ok(parsed) => {
                    // Leaving a topic the session never joined is a no-op.
                    state.rooms.leave(handle.id(), &parsed);
                    let _ = handle.send(ServerFrame::Left { topic });
                }
                Err(err) => {
                    let _ = handle.send(ServerFrame::Error {
                        message: err.to_string(),
                    });
                }
            }
        }
        ClientFrame::Ping => {
            let _ = handle.send(ServerFrame::Pong {
                timestamp: Utc::now(),
            });
        }
    }
    true
}

/// Send an `error` frame and bump the malformed counter; closes the session
/// once the configured threshold is hit.
fn report_malformed(state: &AppState, handle: &Arc<SessionHandle>, reason: &str) -> bool {
    counter!("gateway_malformed_frames_total", 1);
    let count = handle.record_malformed();
    let _ = handle.send(ServerFrame::Error {
        message: format!("malformed frame: {reason}"),
    });
    if count >= state.config.malformed_frame_limit {
        warn!(
            session = %handle.id(),
            count,
            "malformed frame limit reached; closing session"
        );
        return false;
    }
    true
}
