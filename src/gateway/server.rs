//! Axum HTTP server for the lab gateway.
//!
//! Serves the REST API (health, docker status, validation, templates) and
//! the `/ws` terminal endpoint. REST routes are rate limited per client IP;
//! every response carries `nosniff` / `DENY` framing headers and CORS is
//! restricted to the configured origins.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Path, Request, State, WebSocketUpgrade},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::bus::ActivityBus;
use crate::config::{Config, ServerConfig};
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::runtime::{create_runtime, docker_status, kafka_clusters, ContainerRuntime};
use crate::security::CommandValidator;

use super::rate_limit::{RateDecision, SlidingWindowRateLimiter};
use super::session::{SessionContext, SessionManager};
use super::templates::templates_for;
use super::ws::handle_socket;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state for all handlers.
pub struct AppState {
    pub sessions: Arc<SessionContext>,
    pub manager: Arc<SessionManager>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub validator: Arc<CommandValidator>,
    pub limiter: SlidingWindowRateLimiter,
    pub allowed_origins: Vec<String>,
}

impl AppState {
    /// Wire the validator, executor and session context around `runtime`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &Config) -> Self {
        let validator = config
            .security
            .extra_base_commands
            .iter()
            .fold(CommandValidator::new(), |v, cmd| v.register_base_command(cmd));
        let validator = Arc::new(validator);
        let executor = Arc::new(CommandExecutor::new(
            Arc::clone(&runtime),
            Arc::clone(&validator),
            &config.executor,
        ));
        let sessions = Arc::new(SessionContext::new(
            executor,
            ActivityBus::new(),
            config.session.clone(),
        ));
        Self {
            sessions,
            manager: Arc::new(SessionManager::new()),
            runtime,
            validator,
            limiter: SlidingWindowRateLimiter::from_config(&config.rate_limit),
            allowed_origins: config.server.allowed_origins.clone(),
        }
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.sessions.executor
    }

    pub fn activity(&self) -> &ActivityBus {
        &self.sessions.activity
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/docker/status", get(docker_status_handler))
        .route("/api/kafka/clusters", get(kafka_clusters_handler))
        .route("/api/command/validate", post(validate_handler))
        .route("/api/templates/{category}", get(templates_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit_middleware,
        ));

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    Router::new()
        .merge(api)
        .route(
            "/ws",
            get(ws_handler).route_layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                origin_guard,
            )),
        )
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn serve(config: Config) -> Result<()> {
    let runtime = create_runtime(&config.runtime)?;
    let state = Arc::new(AppState::new(runtime, &config));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %listener.local_addr()?,
        runtime = state.runtime.name(),
        "Lab gateway listening"
    );

    serve_on(listener, state, &config.server, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// On shutdown every session is told to close and any command still running
/// is cancelled.
pub async fn serve_on<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    config: &ServerConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&state), config);
    let sweeper = spawn_limiter_sweep(Arc::clone(&state));
    let activity_log = spawn_activity_log(state.activity().clone());

    let manager = Arc::clone(&state.manager);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        info!("Lab gateway shutting down");
        manager.shutdown();
    })
    .await;

    sweeper.abort();
    activity_log.abort();
    let cancelled = state.executor().cancel_all().await;
    info!(cancelled, "Lab gateway stopped");
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn spawn_limiter_sweep(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            state.limiter.sweep();
        }
    })
}

fn spawn_activity_log(bus: ActivityBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(activity) => debug!(
                    target: "labgate::activity",
                    session_id = %activity.session_id,
                    user_id = activity.user_id.as_deref().unwrap_or("-"),
                    command_id = %activity.command_id,
                    outcome = ?activity.outcome,
                    exit_code = ?activity.exit_code,
                    "Command executed"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Activity log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// --- Middleware ---

async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match state.limiter.check(ip) {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { retry_after } => {
            debug!(ip = %ip, "Rate limited");
            let secs = retry_after.as_secs().max(1);
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(json!({ "error": "Too many requests from this IP" })),
            )
                .into_response()
        }
    }
}

/// Refuse WebSocket upgrades from foreign browser origins.
async fn origin_guard(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    // non-browser clients send no Origin; browsers always do
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| state.origin_allowed(o))
            .unwrap_or(false);
        if !allowed {
            warn!(origin = ?origin, "WebSocket origin refused");
            return (StatusCode::FORBIDDEN, "WebSocket origin not allowed").into_response();
        }
    }
    next.run(request).await
}

// --- Handlers ---

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime": state.manager.uptime().as_secs(),
        "connections": state.manager.count().await,
        "runtime": state.runtime.name(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn docker_status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(docker_status(state.runtime.as_ref()).await)
}

async fn kafka_clusters_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(kafka_clusters(state.runtime.as_ref()).await)
}

async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    Json(state.validator.validate_value(body.get("command")))
}

async fn templates_handler(Path(category): Path<String>) -> impl IntoResponse {
    Json(templates_for(&category))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Response, (StatusCode, &'static str)> {
    if state.manager.is_shutting_down() {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "Server shutting down"));
    }

    let ctx = Arc::clone(&state.sessions);
    let manager = Arc::clone(&state.manager);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, ctx, manager)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockContainerRuntime, RuntimeError};
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn mock_runtime() -> MockContainerRuntime {
        let mut mock = MockContainerRuntime::new();
        mock.expect_name().return_const("daemon");
        mock.expect_host_program().returning(|p| p.to_string());
        mock.expect_ping()
            .returning(|| Err(RuntimeError::NotAvailable("no daemon".into())));
        mock.expect_list_containers()
            .returning(|| Err(RuntimeError::NotAvailable("no daemon".into())));
        mock
    }

    fn app_with(config: Config) -> Router {
        let state = Arc::new(AppState::new(Arc::new(mock_runtime()), &config));
        router(state, &config.server)
    }

    fn app() -> Router {
        app_with(Config::default())
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["runtime"], "daemon");
    }

    #[tokio::test]
    async fn test_validate_endpoint() {
        let response = app()
            .oneshot(post_json("/api/command/validate", json!({"command": "docker ps"})))
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await,
            json!({"valid": true, "sanitizedCommand": "docker ps"})
        );

        let response = app()
            .oneshot(post_json("/api/command/validate", json!({"command": "rm -rf /"})))
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await,
            json!({"valid": false, "reason": "Command contains dangerous pattern"})
        );

        let response = app()
            .oneshot(post_json("/api/command/validate", json!({"command": 7})))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["reason"], "Invalid command format");
    }

    #[tokio::test]
    async fn test_extra_base_command_registered() {
        let mut config = Config::default();
        config.security.extra_base_commands = vec!["kcat".into()];
        let response = app_with(config)
            .oneshot(post_json("/api/command/validate", json!({"command": "kcat -L"})))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["valid"], true);
    }

    #[tokio::test]
    async fn test_templates() {
        let response = app().oneshot(get("/api/templates/kafka")).await.unwrap();
        let body = json_body(response).await;
        assert!(body.as_array().is_some_and(|t| !t.is_empty()));
        assert!(body[0]["command"].is_string());

        let response = app().oneshot(get("/api/templates/unknown")).await.unwrap();
        assert_eq!(json_body(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_docker_status_when_daemon_down() {
        let response = app().oneshot(get("/api/docker/status")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["running"], false);
        assert!(body["error"].is_string());

        let response = app().oneshot(get("/api/kafka/clusters")).await.unwrap();
        assert_eq!(json_body(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let mut config = Config::default();
        config.rate_limit.max_requests = 2;
        let app = app_with(config);
        for _ in 0..2 {
            let response = app.clone().oneshot(get("/api/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let request = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/api/command/validate")
            .header(header::ORIGIN, "http://localhost:8000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://localhost:8000"
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_cors_foreign_origin() {
        let request = HttpRequest::builder()
            .uri("/api/health")
            .header(header::ORIGIN, "http://evil.test")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_ws_foreign_origin_forbidden() {
        let request = HttpRequest::builder()
            .uri("/ws")
            .header(header::ORIGIN, "http://evil.test")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
