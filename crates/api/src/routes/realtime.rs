//! Session WebSocket: audio ingress and result fan-out.
//!
//! One invocation per accepted upgrade. After ownership is verified the
//! socket splits into a reader task (frames in, dispatch on `type`) and a
//! writer task (pub/sub payloads out, byte-for-byte). Either task ending
//! tears down the other; the subscription and socket are released on every
//! exit path.

use std::ops::ControlFlow;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::middleware::AuthenticatedUser;
use crate::routes::sessions::owned_session;
use crate::state::AppState;
use services::realtime::{ClientFrame, ServerFrame, Subscription};
use services::sessions::Session;
use services::ErrorCode;

/// Read deadline; refreshed by any inbound frame, pongs included.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Per-frame write deadline. The socket is not safe for concurrent writes,
/// so all writes funnel through the single writer task.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Server pings keep an idle peer's pongs flowing within the read deadline.
const PING_INTERVAL: Duration = Duration::from_secs(30);

const OUTBOUND_BUFFER: usize = 32;

/// `GET /ws/session/{session_id}` - upgrade to the session socket.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
) -> Response {
    // Authorise before upgrading; a foreign session is refused outright.
    let session =
        match owned_session(&state, &session_id, &user.user_id, "WsHandler.SessionWs").await {
            Ok(session) => session,
            Err(err) => return err.into_response(),
        };

    tracing::info!(
        session_id = %session.session_id,
        user_id = %user.user_id,
        "session socket accepted"
    );
    ws.on_upgrade(move |socket| handle_session_socket(socket, state, session))
}

async fn handle_session_socket(socket: WebSocket, state: AppState, session: Session) {
    let session_id = session.session_id.clone();
    let (mut sender, receiver) = socket.split();

    let subscription = match state.realtime.subscribe(&session_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "fan-out subscribe failed");
            let frame = error_payload(ErrorCode::Unavailable, "subscription unavailable");
            let _ = sender.send(Message::Text(frame.into())).await;
            return;
        }
    };

    // Inline error frames from the reader are serialised through the writer.
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let mut write_task = tokio::spawn(write_loop(sender, subscription, outbound_rx));
    let mut read_task = tokio::spawn(read_loop(receiver, state, session, outbound_tx));

    // Either side ending cancels the other.
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    tracing::info!(session_id = %session_id, "session socket closed");
}

/// Forward pub/sub payloads and inline errors to the peer, pinging on an
/// interval. Payloads are forwarded byte-for-byte; the writer never parses
/// them.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut subscription: Subscription,
    mut outbound: mpsc::Receiver<String>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping.tick().await; // first tick completes immediately

    loop {
        let message = tokio::select! {
            payload = subscription.next() => match payload {
                Some(payload) => Message::Text(payload.into()),
                None => break,
            },
            payload = outbound.recv() => match payload {
                Some(payload) => Message::Text(payload.into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match tokio::time::timeout(WRITE_TIMEOUT, sender.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                tracing::warn!("socket write deadline exceeded");
                break;
            }
        }
    }
}

/// Consume peer frames until the peer disconnects, the read deadline
/// passes, or an `end_session` arrives.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    state: AppState,
    session: Session,
    outbound: mpsc::Sender<String>,
) {
    loop {
        let message = match tokio::time::timeout(READ_TIMEOUT, receiver.next()).await {
            Err(_) => {
                tracing::info!(session_id = %session.session_id, "socket read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(session_id = %session.session_id, error = %e, "socket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if handle_client_frame(&state, &session, text.as_str(), &outbound)
                    .await
                    .is_break()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pongs refresh the deadline simply by arriving; pings are
            // answered by the transport.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                send_error(&outbound, ErrorCode::InvalidArgument, "invalid json").await;
            }
        }
    }
}

/// Dispatch one decoded text frame. Malformed input produces an inline
/// error frame and the connection continues.
async fn handle_client_frame(
    state: &AppState,
    session: &Session,
    text: &str,
    outbound: &mpsc::Sender<String>,
) -> ControlFlow<()> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            send_error(outbound, ErrorCode::InvalidArgument, "invalid json").await;
            return ControlFlow::Continue(());
        }
    };

    let frame: ClientFrame = match serde_json::from_value(value) {
        Ok(frame) => frame,
        Err(_) => {
            send_error(outbound, ErrorCode::InvalidArgument, "unknown message type").await;
            return ControlFlow::Continue(());
        }
    };

    match frame {
        ClientFrame::AudioChunk {
            chunk_index,
            audio_base64,
            audio_url,
            is_final,
            ..
        } => {
            if let Err(e) = state
                .realtime
                .ingest_chunk(session, chunk_index, audio_base64, audio_url, is_final)
                .await
            {
                send_error(outbound, e.code, &e.message).await;
            }
        }
        ClientFrame::Pause => state.realtime.pause(&session.session_id).await,
        ClientFrame::Resume => state.realtime.resume(&session.session_id).await,
        ClientFrame::EndSession => {
            if let Err(e) = state.realtime.end_session(&session.session_id).await {
                tracing::warn!(session_id = %session.session_id, error = %e, "end_session failed");
            }
            return ControlFlow::Break(());
        }
    }

    ControlFlow::Continue(())
}

async fn send_error(outbound: &mpsc::Sender<String>, code: ErrorCode, message: &str) {
    let _ = outbound.send(error_payload(code, message)).await;
}

fn error_payload(code: ErrorCode, message: &str) -> String {
    serde_json::to_string(&ServerFrame::Error {
        code,
        message: message.to_string(),
    })
    .unwrap_or_else(|_| r#"{"type":"error","code":"INTERNAL","message":"serialisation"}"#.to_string())
}
