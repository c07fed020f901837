use super::protocol as ws_protocol;
use super::session::{ConnectionId, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
};
use crate::metrics;
use crate::room::{CollaborationRegistry, RoomError};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use huddle_common::protocol::ws::{ClientEvent, ServerEvent};
use huddle_common::room::RoomId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub fn router(registry: Arc<CollaborationRegistry>) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(registry)
}

pub async fn ws_upgrade(
    State(registry): State<Arc<CollaborationRegistry>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES).max_message_size(MAX_FRAME_BYTES).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id, handle_socket(registry, socket)).await;
        },
    )
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

/// Resolves once a ping has gone unanswered for `timeout`; never resolves
/// while no ping is outstanding.
async fn pong_deadline(awaiting_since: Option<Instant>, timeout: Duration) {
    match awaiting_since {
        Some(sent_at) => tokio::time::sleep_until(sent_at + timeout).await,
        None => std::future::pending::<()>().await,
    }
}

async fn handle_socket(registry: Arc<CollaborationRegistry>, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = registry.sessions().register(outbound_sender).await;
    metrics::connection_opened();
    info!(connection_id = %connection_id, request_id = %request_id, "connection opened");

    // Ping every HEARTBEAT_INTERVAL_MS; drop the connection if a ping stays
    // unanswered for HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut awaiting_pong_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if awaiting_pong_since.is_none() {
                    if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    awaiting_pong_since = Some(Instant::now());
                }
            }
            _ = pong_deadline(awaiting_pong_since, heartbeat_timeout) => {
                warn!(
                    connection_id = %connection_id,
                    request_id = %request_id,
                    "heartbeat timeout, disconnecting"
                );
                break;
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if ws_protocol::send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_FRAME_BYTES {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        match ws_protocol::decode_event(&raw_message) {
                            Ok(event) => dispatch_event(&registry, connection_id, event).await,
                            Err(error) => {
                                metrics::record_ws_event("invalid", true, 0);
                                debug!(
                                    connection_id = %connection_id,
                                    error = %error,
                                    "rejected malformed event"
                                );
                                let reply = invalid_message_event(error.to_string());
                                if ws_protocol::send_event(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        let reply =
                            invalid_message_event("binary frames are not supported".to_string());
                        if ws_protocol::send_event(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        awaiting_pong_since = None;
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    registry.disconnect(connection_id).await;
    metrics::connection_closed();
    info!(connection_id = %connection_id, request_id = %request_id, "connection closed");
}

/// Runs one client event. Replies and broadcasts are queued on the
/// connections' outbound channels, so they reach each socket in order.
pub(crate) async fn dispatch_event(
    registry: &CollaborationRegistry,
    connection_id: ConnectionId,
    event: ClientEvent,
) {
    let started_at = Instant::now();
    let event_name = event.name();

    let result = handle_event(registry, connection_id, event).await;
    let is_error = result.is_err();
    if let Err(reply) = result {
        registry.sessions().send_to(connection_id, reply).await;
    }

    metrics::record_ws_event(event_name, is_error, started_at.elapsed().as_millis() as u64);
}

async fn handle_event(
    registry: &CollaborationRegistry,
    connection_id: ConnectionId,
    event: ClientEvent,
) -> Result<(), ServerEvent> {
    match event {
        ClientEvent::Authenticate { credential } => {
            let identity = registry
                .sessions()
                .authenticate(connection_id, &credential)
                .await
                .map_err(|error| {
                    warn!(connection_id = %connection_id, reason = %error, "authentication failed");
                    ServerEvent::AuthError { reason: error.to_string() }
                })?;

            registry
                .sessions()
                .send_to(connection_id, ServerEvent::Authenticated { identity: identity.clone() })
                .await;
            registry.refresh_identity(connection_id, &identity).await;
            Ok(())
        }
        ClientEvent::JoinRoom { room_id } => registry
            .join(connection_id, &room_id)
            .await
            .map(drop)
            .map_err(|error| room_error_event(&error, &room_id)),
        ClientEvent::ChatMessage { content, room_id } => registry
            .post(connection_id, &room_id, &content)
            .await
            .map(drop)
            .map_err(|error| room_error_event(&error, &room_id)),
        ClientEvent::EditorUpdate { content, room_id, observed_version } => registry
            .propose(connection_id, &room_id, content, observed_version)
            .await
            .map(drop)
            .map_err(|error| room_error_event(&error, &room_id)),
        ClientEvent::TypingStart { room_id } => {
            registry.start_typing(connection_id, &room_id).await;
            Ok(())
        }
        ClientEvent::TypingStop { room_id } => {
            registry.stop_typing(connection_id, &room_id).await;
            Ok(())
        }
    }
}

fn room_error_event(error: &RoomError, room_id: &RoomId) -> ServerEvent {
    ServerEvent::OperationError {
        code: error.code().as_str().to_string(),
        message: error.to_string(),
        room_id: Some(room_id.clone()),
    }
}

fn invalid_message_event(detail: String) -> ServerEvent {
    ServerEvent::OperationError {
        code: ErrorCode::InvalidMessage.as_str().to_string(),
        message: format!("{}: {detail}", ErrorCode::InvalidMessage.default_message()),
        room_id: None,
    }
}
