//! `WebSocket` session lifecycle: one verified client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::handler::handle_text;
use crate::auth::Identity;
use crate::dispatch::MessageTable;
use crate::gateway::SessionGateway;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::SubscriptionRegistry;
use crate::resync::ResyncService;

/// How long cleanup waits for the writer to flush its Close frame.
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a session loop needs, shared by all connections.
pub struct SessionContext {
    /// Admits sessions into the registry.
    pub gateway: Arc<SessionGateway>,
    /// Topic membership.
    pub registry: Arc<SubscriptionRegistry>,
    /// Inbound message routing.
    pub table: Arc<MessageTable>,
    /// Snapshot reads for `requestSync`.
    pub resync: Arc<ResyncService>,
    /// Per-session outbound queue depth.
    pub send_buffer_size: usize,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Close after this long without a Pong.
    pub pong_timeout: Duration,
    /// Fires on server shutdown.
    pub shutdown: CancellationToken,
}

/// Run a session for an upgraded, already verified connection.
///
/// 1. Registers the session and joins the privileged-audience topic
/// 2. Sends `connected` before anything else
/// 3. Forwards queued frames and sends periodic Pings
/// 4. Routes inbound text frames through the message table
/// 5. Removes every registry entry for the session on exit, then lets the
///    writer send a Close frame (`1001 Going Away` on server shutdown)
#[instrument(skip_all, fields(user_id = %identity.user_id))]
pub async fn run_ws_session(ws: WebSocket, identity: Identity, ctx: Arc<SessionContext>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(ctx.send_buffer_size.max(1));

    let (session, connected) = ctx.gateway.accept(identity, send_tx);
    let conn_id = session.id.clone();
    let started = Instant::now();
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // `connected` goes out directly so it precedes anything already queued.
    match connected.to_json() {
        Ok(json) => {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!(%conn_id, "client went away before connected was sent");
            }
        }
        Err(e) => warn!(%conn_id, error = %e, "failed to serialize connected message"),
    }

    let outbound_session = Arc::clone(&session);
    let ping_every = ctx.ping_interval;
    let pong_timeout = ctx.pong_timeout;
    let stop = CancellationToken::new();
    let writer_stop = stop.clone();
    let server_shutdown = ctx.shutdown.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = writer_stop.cancelled() => {
                    if server_shutdown.is_cancelled() {
                        let frame = CloseFrame {
                            code: close_code::AWAY,
                            reason: Utf8Bytes::from_static("server shutting down"),
                        };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    }
                    break;
                }
                frame = send_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_session.check_alive()
                        && outbound_session.last_pong_elapsed() > pong_timeout
                    {
                        warn!(conn_id = %outbound_session.id, "client unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => {
                debug!(%conn_id, "server shutting down, closing session");
                break;
            }
            _ = &mut outbound => {
                // Writer ended (peer gone or dead-peer timeout).
                writer_done = true;
                break;
            }
            inbound = ws_rx.next() => {
                let Some(Ok(msg)) = inbound else { break };
                match msg {
                    Message::Text(text) => {
                        session.mark_alive();
                        handle_text(text.as_str(), &session, &ctx);
                    }
                    Message::Binary(data) => {
                        session.mark_alive();
                        match std::str::from_utf8(&data) {
                            Ok(text) => handle_text(text, &session, &ctx),
                            Err(_) => debug!(%conn_id, len = data.len(), "non-UTF8 binary frame ignored"),
                        }
                    }
                    Message::Ping(_) | Message::Pong(_) => session.mark_alive(),
                    Message::Close(_) => {
                        debug!(%conn_id, "client sent close frame");
                        break;
                    }
                }
            }
        }
    }

    // Registry state goes first so no further deliveries are attempted.
    let _ = ctx.registry.drop_session(&conn_id);
    stop.cancel();
    if !writer_done && tokio::time::timeout(WRITER_CLOSE_TIMEOUT, &mut outbound).await.is_err() {
        warn!(%conn_id, "writer did not finish closing, aborting");
        outbound.abort();
    }

    info!(
        %conn_id,
        dropped = session.drop_count(),
        duration_secs = started.elapsed().as_secs(),
        "session closed"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
