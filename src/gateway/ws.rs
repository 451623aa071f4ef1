//! WebSocket connection loop
//!
//! The socket is split: a writer task drains the session's outbound queue
//! into text frames while the reader loop feeds inbound frames to the
//! [`Session`]. When the client goes away (or the server shuts down) the
//! session is closed, which cancels every command it still runs.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::protocol::ServerMessage;
use super::session::{Session, SessionContext, SessionManager};

const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Drive one upgraded connection until it closes.
pub async fn handle_socket(
    socket: WebSocket,
    ctx: Arc<SessionContext>,
    manager: Arc<SessionManager>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(ctx.config.outbound_buffer.max(1));

    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message.to_json().into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session::new(ctx, tx);
    manager.register(&session).await;
    crate::log_component!(info, "gateway", "Client connected", session_id = session.id());
    session.greet().await;

    let mut shutdown = manager.shutdown_signal();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let was_authenticated = session.identity().is_some();
                    session.handle_text(text.as_str()).await;
                    if !was_authenticated && session.identity().is_some() {
                        manager.update(&session).await;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    session.handle_text(&String::from_utf8_lossy(&bytes)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session_id = %session.id(), error = %e, "WebSocket read error");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    session.close().await;
    manager.unregister(session.id()).await;
    crate::log_component!(info, "gateway", "Client disconnected", session_id = session.id());

    // the writer ends once the last forwarder drops its sender
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}
