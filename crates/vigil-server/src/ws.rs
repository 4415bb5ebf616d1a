use crate::session::{now_ms, Session};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant};
use tracing;
use vigil_common::proto::{Frame, FrameType, RegisterPayload};

/// Initial and refreshed read deadline.
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Per-write deadline on the socket.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Server-side application ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// GET /api/probe/ws
pub async fn probe_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_probe_socket(socket, state, addr))
}

/// Accepted -> registered -> closed. The first frame must be a `register`
/// within the read deadline; anything else closes the socket.
async fn handle_probe_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let (sender, mut receiver) = socket.split();

    let reg = match await_register(&mut receiver).await {
        Some(reg) => reg,
        None => return,
    };
    let ip = if reg.ip.is_empty() {
        addr.ip().to_string()
    } else {
        reg.ip.clone()
    };

    let at_ms = now_ms();
    state.ingest.handle_register(&reg, &ip, at_ms);

    let (session, rx) = Session::new(&reg.id);
    state.manager.register(session.clone());

    let write_task = tokio::spawn(write_pump(sender, rx, session.clone()));

    read_pump(&mut receiver, &session, &state).await;

    // Either pump exiting tears the session down; unregister is a no-op if
    // a newer session already displaced this one.
    state.manager.unregister(&session);
    session.close();
    let _ = write_task.await;
}

async fn await_register(receiver: &mut SplitStream<WebSocket>) -> Option<RegisterPayload> {
    let msg = match timeout(READ_DEADLINE, receiver.next()).await {
        Ok(Some(Ok(msg))) => msg,
        Ok(Some(Err(e))) => {
            tracing::info!(error = %e, "socket error before registration");
            return None;
        }
        Ok(None) => return None,
        Err(_) => {
            tracing::info!("no register frame within deadline, closing socket");
            return None;
        }
    };

    let text = match msg {
        Message::Text(text) => text,
        other => {
            tracing::warn!(?other, "non-text frame before registration, closing socket");
            return None;
        }
    };

    let frame: Frame = match serde_json::from_str(&text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable frame before registration, closing socket");
            return None;
        }
    };
    if frame.frame_type != FrameType::Register {
        tracing::warn!(
            frame_type = frame.frame_type.as_str(),
            "expected register frame first, closing socket"
        );
        return None;
    }

    match serde_json::from_value::<RegisterPayload>(frame.data) {
        Ok(reg) if !reg.id.is_empty() => Some(reg),
        Ok(_) => {
            tracing::warn!("register frame without probe id, closing socket");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "bad register payload, closing socket");
            None
        }
    }
}

/// Single-threaded per session: frames are handled in arrival order. Any
/// I/O error or deadline expiry exits the loop, which unregisters the
/// session; decode errors skip the frame only.
async fn read_pump(receiver: &mut SplitStream<WebSocket>, session: &Arc<Session>, state: &AppState) {
    let cancel = session.cancel_token();
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            res = timeout(READ_DEADLINE, receiver.next()) => match res {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    tracing::info!(probe_id = %session.probe_id, error = %e, "socket read error");
                    break;
                }
                Ok(None) => {
                    tracing::info!(probe_id = %session.probe_id, "socket closed by peer");
                    break;
                }
                Err(_) => {
                    tracing::info!(probe_id = %session.probe_id, "read deadline exceeded");
                    break;
                }
            }
        };

        let at_ms = now_ms();
        session.touch(at_ms);

        match msg {
            Message::Text(text) => match serde_json::from_str::<Frame>(&text) {
                Ok(frame) => state.ingest.handle_frame(&session.probe_id, frame, at_ms).await,
                Err(e) => {
                    tracing::warn!(
                        probe_id = %session.probe_id,
                        error = %e,
                        "failed to parse frame, skipping"
                    );
                }
            },
            // Pong refreshes the deadline via touch above; pings are
            // answered by axum automatically.
            Message::Pong(_) | Message::Ping(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                tracing::warn!(probe_id = %session.probe_id, "binary frame ignored");
            }
        }
    }
}

/// Drains the send queue to the socket and pings every 30 s. Exits on
/// cancellation, queue closure, or a failed/timed-out write; dropping the
/// sink closes the socket so the read pump observes EOF.
async fn write_pump(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: tokio::sync::mpsc::Receiver<String>,
    session: Arc<Session>,
) {
    let cancel = session.cancel_token();
    let mut ping = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            maybe = rx.recv() => match maybe {
                Some(text) => {
                    match timeout(WRITE_DEADLINE, sender.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::info!(probe_id = %session.probe_id, error = %e, "socket write failed");
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(probe_id = %session.probe_id, "socket write deadline exceeded");
                            break;
                        }
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                match timeout(WRITE_DEADLINE, sender.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
    session.close();
}
