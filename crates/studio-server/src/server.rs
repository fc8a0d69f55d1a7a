//! `StudioSyncServer`: Axum HTTP + `WebSocket` server wiring.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{BEARER_PROTOCOL, TokenVerifier, extract_credential};
use crate::bus::{BusError, MessageBus};
use crate::config::ServerConfig;
use crate::dispatch::MessageTable;
use crate::gateway::SessionGateway;
use crate::health::{self, HealthResponse};
use crate::metrics::HANDSHAKE_REJECTIONS_TOTAL;
use crate::publisher::MutationPublisher;
use crate::registry::{ConnectionStats, SubscriptionRegistry};
use crate::relay::CrossInstanceRelay;
use crate::resync::ResyncService;
use crate::shutdown::ShutdownCoordinator;
use crate::store::ConfigReader;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Errors from bringing the server up.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    /// The relay could not subscribe to the bus.
    #[error("relay failed to start: {0}")]
    Bus(#[from] BusError),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session loop dependencies.
    pub ctx: Arc<SessionContext>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// Bus backend name for `/health`.
    pub bus_backend: &'static str,
    /// One permit per allowed session, held for the session's lifetime.
    pub connection_slots: Arc<Semaphore>,
}

/// The sync server for one process.
pub struct StudioSyncServer {
    config: Arc<ServerConfig>,
    registry: Arc<SubscriptionRegistry>,
    relay: Arc<CrossInstanceRelay>,
    publisher: Arc<MutationPublisher>,
    ctx: Arc<SessionContext>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    bus_backend: &'static str,
    connection_slots: Arc<Semaphore>,
    start_time: Instant,
}

impl StudioSyncServer {
    /// Wire the gateway, registry, relay, and resync service together.
    ///
    /// Nothing touches the network until [`listen`](Self::listen).
    pub fn new(
        config: ServerConfig,
        verifier: TokenVerifier,
        bus: Arc<dyn MessageBus>,
        reader: Arc<dyn ConfigReader>,
        metrics: PrometheusHandle,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let bus_backend = bus.backend();
        let relay = Arc::new(CrossInstanceRelay::new(
            bus,
            Arc::clone(&registry),
            config.bus_channel.clone(),
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new());

        let ctx = Arc::new(SessionContext {
            gateway: Arc::new(SessionGateway::new(verifier, Arc::clone(&registry))),
            registry: Arc::clone(&registry),
            table: Arc::new(MessageTable::new()),
            resync: Arc::new(ResyncService::new(reader)),
            send_buffer_size: config.send_buffer_size,
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            shutdown: shutdown.token(),
        });
        let connection_slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));

        Self {
            config: Arc::new(config),
            registry,
            publisher: Arc::new(MutationPublisher::new(Arc::clone(&relay))),
            relay,
            ctx,
            shutdown,
            connection_slots,
            metrics,
            bus_backend,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: Arc::clone(&self.ctx),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            bus_backend: self.bus_backend,
            connection_slots: Arc::clone(&self.connection_slots),
        };

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/stats", get(stats_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.config.ws_path, get(ws_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        match self.cors_layer() {
            Some(cors) => router.layer(cors),
            None => router,
        }
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origin = self.config.cors_origin.as_deref()?;
        match HeaderValue::from_str(origin) {
            Ok(origin) => Some(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_methods([Method::GET])
                    .allow_headers([header::AUTHORIZATION])
                    .allow_credentials(true),
            ),
            Err(_) => {
                warn!(origin, "ignoring unparseable CORS origin");
                None
            }
        }
    }

    /// Start the relay, bind the listener, and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn listen(&self) -> Result<SocketAddr, ServerError> {
        let token = self.shutdown.token();
        let relay_task = self.relay.start(token.clone()).await?;
        self.shutdown.track(relay_task);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        self.shutdown.track(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server loop failed");
            }
        }));

        info!(
            %local_addr,
            ws_path = %self.config.ws_path,
            bus = self.bus_backend,
            channel = %self.relay.channel(),
            "studio sync server listening"
        );
        Ok(local_addr)
    }

    /// Close every session, stop the relay, and wait for background tasks.
    pub async fn stop(&self, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(timeout).await;
        self.registry.clear();
        info!("studio sync server stopped");
    }

    /// Session slots not currently held by a session or a pending upgrade.
    pub fn available_slots(&self) -> usize {
        self.connection_slots.available_permits()
    }

    /// Entry point for the external mutation path.
    pub fn publisher(&self) -> &Arc<MutationPublisher> {
        &self.publisher
    }

    /// Local subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Cross-instance relay.
    pub fn relay(&self) -> &Arc<CrossInstanceRelay> {
        &self.relay
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Per-session diagnostics for this process.
    pub fn connection_stats(&self) -> ConnectionStats {
        self.registry.stats()
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.ctx.registry;
    Json(health::health_check(
        state.start_time,
        registry.len(),
        registry.topic_count(),
        state.bus_backend,
        state.ctx.shutdown.is_cancelled(),
    ))
}

/// GET /stats
async fn stats_handler(State(state): State<AppState>) -> Json<ConnectionStats> {
    Json(state.ctx.registry.stats())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// GET on the configured `WebSocket` path.
///
/// The credential is checked before the upgrade request itself, so a refused
/// handshake never creates a session. A connection slot is reserved before
/// upgrading and held until the session ends, so concurrent handshakes
/// cannot overshoot `max_connections`.
async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let credential = extract_credential(&query, &headers);
    let identity = match state.ctx.gateway.on_connect_attempt(credential.as_deref()) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let Ok(permit) = Arc::clone(&state.connection_slots).try_acquire_owned() else {
        counter!(HANDSHAKE_REJECTIONS_TOTAL, "reason" => "TOO_MANY_CONNECTIONS").increment(1);
        warn!(
            max = state.config.max_connections,
            user_id = %identity.user_id,
            "connection limit reached, handshake rejected"
        );
        let body = serde_json::json!({
            "error": { "code": "TOO_MANY_CONNECTIONS", "message": "Server at capacity" }
        });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    };

    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let ctx = Arc::clone(&state.ctx);
    ws.protocols([BEARER_PROTOCOL])
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _permit = permit;
            run_ws_session(socket, identity, ctx).await;
        })
}
