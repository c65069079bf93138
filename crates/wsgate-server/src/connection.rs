//! Per-connection lifecycle: ACCEPTING -> OPEN -> CLOSING -> CLOSED.
//!
//! One task owns each connection end to end. The OPEN state is a single
//! `tokio::select!` loop over inbound frames, commands from the rest of
//! the gateway (broadcast, send_to, eviction), and the shutdown signal.
//! Every path through OPEN ends in either a written response or a
//! transition to CLOSING; a malformed frame or a handler fault never
//! tears the connection down, and teardown always clears the registry
//! entry.

use crate::registry::{generate_client_id, ClientRecord, ConnCommand};
use crate::server::Gateway;
use crate::transport::WebSocketConnection;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use wsgate_core::envelope::{codes, now_rfc3339, TYPE_WELCOME};
use wsgate_core::{codec, ResponseEnvelope};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Why a connection left the OPEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Clean close from the peer.
    PeerClosed,
    /// Socket-level failure.
    TransportError,
    /// Forced close by the liveness sweeper.
    Evicted,
    /// Gateway shutdown.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::TransportError => write!(f, "transport error"),
            CloseReason::Evicted => write!(f, "evicted"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Run one connection to completion.
pub(crate) async fn run_connection(gateway: Arc<Gateway>, conn: WebSocketConnection) {
    let WebSocketConnection {
        ws_stream,
        remote_addr,
    } = conn;

    // ACCEPTING: register the record before the peer can send anything.
    // Subscribe first so a shutdown between insert and the OPEN loop is
    // not missed.
    let mut shutdown_rx = gateway.shutdown_tx.subscribe();
    let client_id = generate_client_id();
    let connected_at = Instant::now();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ConnCommand>();

    if let Err(e) = gateway
        .registry
        .insert(ClientRecord::new(client_id.clone(), cmd_tx))
        .await
    {
        error!(client_id = %client_id, error = %e, "could not register connection");
        return;
    }

    let (mut sink, mut stream) = ws_stream.split();

    // OPEN begins with the welcome envelope.
    let welcome = ResponseEnvelope::success(
        None,
        TYPE_WELCOME,
        json!({
            "clientId": client_id,
            "timestamp": now_rfc3339(),
            "message": "connected to wsgate",
        }),
    );

    let mut early_close = None;
    match codec::encode(&welcome) {
        Ok(frame) => {
            if sink.send(Message::Text(frame)).await.is_err() {
                early_close = Some(CloseReason::TransportError);
            }
        }
        Err(e) => {
            error!(client_id = %client_id, error = %e, "welcome encode failed");
            early_close = Some(CloseReason::TransportError);
        }
    }

    let reason = match early_close {
        Some(reason) => reason,
        None => {
            info!(client_id = %client_id, remote = %remote_addr, "connection open");
            open_loop(
                &gateway,
                &client_id,
                &mut sink,
                &mut stream,
                &mut cmd_rx,
                &mut shutdown_rx,
            )
            .await
        }
    };

    // CLOSING: no further frames are processed past this point.
    let removed = gateway.registry.remove(&client_id).await;
    let _ = sink.close().await;

    let duration_secs = connected_at.elapsed().as_secs_f64();
    if reason == CloseReason::TransportError {
        warn!(client_id = %client_id, reason = %reason, removed, duration_secs, "connection closed");
    } else {
        info!(client_id = %client_id, reason = %reason, removed, duration_secs, "connection closed");
    }
}

/// OPEN state select loop. Returns the reason for leaving it.
async fn open_loop(
    gateway: &Gateway,
    client_id: &str,
    sink: &mut WsSink,
    stream: &mut WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<ConnCommand>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> CloseReason {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return CloseReason::Shutdown,

            Some(cmd) = cmd_rx.recv() => match cmd {
                ConnCommand::Frame(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return CloseReason::TransportError;
                    }
                }
                ConnCommand::Close => return CloseReason::Evicted,
            },

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reason) =
                        handle_frame(gateway, client_id, sink, text.as_bytes()).await
                    {
                        return reason;
                    }
                }
                // Binary frames go through the same UTF-8 JSON decode path.
                Some(Ok(Message::Binary(data))) => {
                    if let Some(reason) = handle_frame(gateway, client_id, sink, &data).await {
                        return reason;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    // The transport pong is the only acknowledgement a
                    // liveness probe gets; no envelope is produced.
                    gateway.registry.touch(client_id).await;
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    gateway.registry.touch(client_id).await;
                }
                Some(Ok(Message::Close(_))) | None => return CloseReason::PeerClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(client_id = %client_id, error = %e, "transport error");
                    return CloseReason::TransportError;
                }
            },
        }
    }
}

/// Decode, dispatch and answer one inbound frame.
///
/// Returns `Some` only when the response could not be written and the
/// connection must close; protocol-level failures are answered in-band.
async fn handle_frame(
    gateway: &Gateway,
    client_id: &str,
    sink: &mut WsSink,
    raw: &[u8],
) -> Option<CloseReason> {
    // Any inbound frame proves the peer is alive.
    gateway.registry.touch(client_id).await;

    let response = if raw.len() > gateway.config.max_frame_bytes {
        debug!(client_id = %client_id, len = raw.len(), "oversized frame rejected");
        ResponseEnvelope::failure(
            None,
            codes::INVALID_FORMAT,
            format!(
                "frame too large: {} bytes (max {})",
                raw.len(),
                gateway.config.max_frame_bytes
            ),
            None,
        )
    } else {
        match codec::decode(raw) {
            Ok(envelope) => gateway.dispatcher.dispatch(client_id, envelope).await,
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "frame decode failed");
                ResponseEnvelope::failure(None, codes::INVALID_FORMAT, e.to_string(), None)
            }
        }
    };

    match codec::encode(&response) {
        Ok(frame) => {
            if sink.send(Message::Text(frame)).await.is_err() {
                return Some(CloseReason::TransportError);
            }
        }
        Err(e) => {
            error!(client_id = %client_id, error = %e, "response encode failed");
        }
    }
    None
}
