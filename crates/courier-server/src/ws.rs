//! `GET /ws`: one authenticated WebSocket per user.
//!
//! The socket is split into a writer task draining the connection's outbound
//! queue and a reader loop dispatching inbound frames one at a time. Whichever
//! side finishes first ends the session, as does the notifier closing the
//! connection after a failed live delivery.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use courier_shared::protocol::{ClientFrame, ErrorCode, ServerFrame};
use courier_shared::FrameError;

use crate::api::AppState;
use crate::auth::{AuthUser, Authenticated};
use crate::handlers::Handlers;
use crate::registry::Connection;

const OUTBOUND_CAPACITY: usize = 256;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn ws_handler(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthUser) {
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);

    let conn = Connection::new(user.id, tx);
    let connection_id = conn.id;
    if let Some(old) = state.registry.register(conn.clone()) {
        tracing::info!(user = %user.id, old = %old.id, new = %connection_id, "replaced existing connection");
    }
    tracing::info!(user = %user.id, username = %user.username, connection = %connection_id, "websocket connected");

    let notifier = state.handlers.notifier().clone();
    let user_id = user.id;
    let mut writer = tokio::spawn(async move {
        let undelivered = write_loop(sink, rx).await;
        if !undelivered.is_empty() {
            notifier.requeue_undelivered(user_id, undelivered).await;
        }
    });

    let send_timeout = state.config.ws_send_timeout;
    tokio::select! {
        _ = &mut writer => {
            tracing::debug!(connection = %connection_id, "writer finished");
        }
        _ = read_loop(stream, &state.handlers, &conn, send_timeout) => {
            tracing::debug!(connection = %connection_id, "reader finished");
        }
        _ = conn.closed() => {
            tracing::info!(connection = %connection_id, "connection closed by notifier");
        }
    }

    // Teardown: drop our entry (unless already replaced) and our sender so the
    // writer drains what is queued and exits.
    state.registry.remove_if_current(user.id, connection_id);
    drop(conn);

    if !writer.is_finished() && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(user = %user.id, connection = %connection_id, "websocket disconnected");
}

/// Write queued frames to `sink` until every sender is gone. If the sink
/// fails, the outbound queue is closed and the failed frame plus everything
/// still buffered is returned unsent.
pub(crate) async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame>
where
    S: Sink<WsMessage> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(frame = frame.frame_type(), error = %e, "failed to encode frame");
                continue;
            }
        };
        if sink.send(WsMessage::Text(text)).await.is_err() {
            rx.close();
            let mut undelivered = vec![frame];
            while let Ok(frame) = rx.try_recv() {
                undelivered.push(frame);
            }
            tracing::debug!(unsent = undelivered.len(), "websocket write failed");
            return undelivered;
        }
    }
    let _ = sink.close().await;
    Vec::new()
}

/// Read frames until the peer closes, the transport fails or a frame cannot
/// be decoded.
pub(crate) async fn read_loop<S>(
    mut stream: S,
    handlers: &Handlers,
    conn: &Connection,
    send_timeout: Duration,
) where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let frame = ServerFrame::error("unknown", ErrorCode::Malformed, "binary frame is not UTF-8");
                    reply(conn, frame, send_timeout).await;
                    break;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(connection = %conn.id, error = %e, "websocket read failed");
                break;
            }
        };

        let frame = match ClientFrame::parse(&text) {
            Ok(frame) => frame,
            Err(FrameError::UnknownType(kind)) => {
                tracing::warn!(user = %conn.user_id, kind = %kind, "unknown event type");
                let msg = format!("unknown event type: {kind}");
                if !reply(conn, ServerFrame::error(kind, ErrorCode::UnknownType, msg), send_timeout).await {
                    break;
                }
                continue;
            }
            Err(FrameError::Malformed(reason)) => {
                tracing::warn!(user = %conn.user_id, error = %reason, "malformed frame, closing connection");
                reply(conn, ServerFrame::error(type_hint(&text), ErrorCode::Malformed, reason), send_timeout).await;
                break;
            }
        };

        let event = frame.event_name();
        if let Err(e) = handlers.dispatch(conn.user_id, frame).await {
            tracing::warn!(user = %conn.user_id, event, error = %e, "event failed");
            if !reply(conn, ServerFrame::error(event, e.code(), e.to_string()), send_timeout).await {
                break;
            }
        }
    }
}

async fn reply(conn: &Connection, frame: ServerFrame, timeout: Duration) -> bool {
    conn.send(frame, timeout).await.is_ok()
}

/// Best-effort `type` of a frame that failed to decode.
fn type_hint(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::UserId;
    use futures::stream;

    use crate::handlers::harness::{next_frame, Harness};

    fn text(s: impl Into<String>) -> Result<WsMessage, axum::Error> {
        Ok(WsMessage::Text(s.into()))
    }

    #[tokio::test]
    async fn unknown_type_is_answered_and_loop_continues() {
        let h = Harness::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let (conn, mut rx) = h.online(alice);

        let frames = vec![
            text(r#"{"type":"dance"}"#),
            text(format!(r#"{{"type":"send_message","receiver_id":"{bob}","content":"still here"}}"#)),
        ];
        read_loop(stream::iter(frames), &h.handlers, &conn, Duration::from_millis(100)).await;

        match next_frame(&mut rx).await {
            ServerFrame::Error { event, code, .. } => {
                assert_eq!(event, "dance");
                assert_eq!(code, ErrorCode::UnknownType);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(matches!(next_frame(&mut rx).await, ServerFrame::MessageSentAck { .. }));
    }

    #[tokio::test]
    async fn malformed_frame_ends_the_loop() {
        let h = Harness::new().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let (conn, mut rx) = h.online(alice);

        let frames = vec![
            text(r#"{"type":"send_message","content":42}"#),
            text(format!(r#"{{"type":"send_message","receiver_id":"{bob}","content":"never"}}"#)),
        ];
        read_loop(stream::iter(frames), &h.handlers, &conn, Duration::from_millis(100)).await;

        match next_frame(&mut rx).await {
            ServerFrame::Error { event, code, .. } => {
                assert_eq!(event, "send_message");
                assert_eq!(code, ErrorCode::Malformed);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handler_errors_are_reported_with_the_event_name() {
        let h = Harness::new().await;
        let alice = UserId::new();
        let (conn, mut rx) = h.online(alice);

        let frames = vec![text(format!(
            r#"{{"type":"send_contact_request","target_user_id":"{alice}"}}"#
        ))];
        read_loop(stream::iter(frames), &h.handlers, &conn, Duration::from_millis(100)).await;

        match next_frame(&mut rx).await {
            ServerFrame::Error { event, code, .. } => {
                assert_eq!(event, "send_contact_request");
                assert_eq!(code, ErrorCode::InvalidState);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_write_hands_back_unsent_frames() {
        let sink = Box::pin(futures::sink::unfold(0usize, |sent, _msg: WsMessage| async move {
            if sent == 0 {
                Ok(sent + 1)
            } else {
                Err("socket gone")
            }
        }));

        let removed = |n: u128| ServerFrame::ContactRemoved {
            contact_id: uuid::Uuid::from_u128(n),
            user_id: UserId::new(),
        };
        let (tx, rx) = mpsc::channel(8);
        for n in 1..=4 {
            tx.send(removed(n)).await.unwrap();
        }

        let undelivered = write_loop(sink, rx).await;
        let ids: Vec<_> = undelivered
            .iter()
            .map(|f| match f {
                ServerFrame::ContactRemoved { contact_id, .. } => contact_id.as_u128(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![2, 3, 4]);

        // Later sends fail fast, so the notifier falls back for them too.
        assert!(tx.send(removed(5)).await.is_err());
    }

    #[tokio::test]
    async fn clean_shutdown_writes_everything() {
        let (sink_tx, mut sink_rx) = futures::channel::mpsc::unbounded::<WsMessage>();
        let (tx, rx) = mpsc::channel(4);
        tx.send(ServerFrame::error("x", ErrorCode::Internal, "boom")).await.unwrap();
        drop(tx);

        assert!(write_loop(sink_tx, rx).await.is_empty());
        match sink_rx.next().await {
            Some(WsMessage::Text(text)) => assert!(text.contains("\"ERROR\"")),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn type_hint_falls_back_to_unknown() {
        assert_eq!(type_hint(r#"{"type":"remove_contact"}"#), "remove_contact");
        assert_eq!(type_hint("{not json"), "unknown");
    }
}
