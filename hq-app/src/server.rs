//! AI HQ server.
//!
//! Wires configuration, storage, the debate engine, the event hub and the
//! workflow notifier into one shared [`HqState`], then mounts the HTTP routes
//! and the `/ws` event stream behind the usual tower layers.

use crate::config::{HqConfig, non_empty};
use crate::debate::{DebateEngine, DebateSettings};
use crate::http_auth;
use crate::routes;
use crate::store::{Store, open_store};
use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use hq_channels::{EventHub, WebhookNotifier};
use hq_llm::{LlmClient, ResponsesApi};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub const SERVICE_NAME: &str = "aihq";

pub struct HqState {
    pub config: Arc<HqConfig>,
    pub store: Arc<dyn Store>,
    pub engine: DebateEngine,
    pub hub: Arc<EventHub>,
    pub notifier: Arc<WebhookNotifier>,
}

impl HqState {
    pub fn from_config(cfg: HqConfig) -> Result<Self> {
        let store = open_store(cfg.store.database_path()?.as_deref());
        let llm = build_llm_client(&cfg)?;
        let engine = DebateEngine::new(llm, DebateSettings::from_config(&cfg));
        let hub = Arc::new(EventHub::new().with_auth_token(cfg.security.ws_auth_token.clone()));
        let notifier = Arc::new(
            WebhookNotifier::new(cfg.workflow.webhook_url.as_deref(), cfg.workflow.timeout())?
                .with_token(cfg.workflow.webhook_token.clone()),
        );
        Ok(Self {
            config: Arc::new(cfg),
            store,
            engine,
            hub,
            notifier,
        })
    }

    pub fn db_disabled(&self) -> bool {
        !self.store.is_persistent()
    }

    pub fn llm(&self) -> Option<&dyn ResponsesApi> {
        self.engine.llm().map(|llm| llm.as_ref())
    }
}

fn build_llm_client(cfg: &HqConfig) -> Result<Option<Arc<dyn ResponsesApi>>> {
    let Some(api_key) = cfg.llm.api_key() else {
        tracing::warn!("no LLM api key configured; chat and debate answer with a disabled notice");
        return Ok(None);
    };
    let client = LlmClient::new(api_key, cfg.llm.debate_model())?
        .with_base_url(non_empty(cfg.llm.base_url.as_deref()));
    Ok(Some(Arc::new(client)))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let origin = origin.trim();
    let allow_origin = if origin.is_empty() || origin == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// Routes, auth and shared state, without the transport layers.
pub fn build_app(state: Arc<HqState>) -> Router {
    let policy = http_auth::MutatingAuthPolicy::from_config(&state.config);
    let hub_router = state.hub.clone().router();
    routes::router()
        .layer(axum::middleware::from_fn(http_auth::require_mutating_auth))
        .layer(Extension(http_auth::MutatingAuthPolicyExt(policy)))
        .layer(Extension(state))
        .merge(hub_router)
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = HqConfig::load_with_path(config_path).await?;
    let database_path = cfg.store.database_path()?;
    tracing::info!(
        config_path = %path.display(),
        bind = %cfg.bind_addr(),
        app_env = %cfg.server.app_env,
        debate_model = %cfg.llm.debate_model(),
        chat_model = %cfg.llm.chat_model(),
        llm_enabled = cfg.llm.api_key().is_some(),
        database_path = ?database_path,
        webhook_configured = non_empty(cfg.workflow.webhook_url.as_deref()).is_some(),
        control_auth = non_empty(cfg.security.control_api_token.as_deref()).is_some(),
        "config ok"
    );
    let state = HqState::from_config(cfg)?;
    match state.store.ping().await {
        Ok(()) => tracing::info!(persistent = state.store.is_persistent(), "store ok"),
        Err(e) => tracing::error!(error = %e, "store ping failed"),
    }
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = HqConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr();
    let listener = preflight_bind_listener(addr).await?;
    let shutdown = CancellationToken::new();

    let http_max_in_flight = cfg.server.http_max_in_flight;
    let http_timeout = Duration::from_secs(cfg.server.http_timeout_seconds);
    let cors = cors_layer(&cfg.server.cors_origin);

    let state = Arc::new(HqState::from_config(cfg)?);
    tracing::info!(
        config_path = %path.display(),
        db_enabled = !state.db_disabled(),
        llm_enabled = state.engine.is_enabled(),
        webhook_configured = state.notifier.is_configured(),
        debate_concurrency = state.engine.settings().concurrency,
        "aihq state ready"
    );

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = build_app(state)
        .layer(cors)
        .layer(GlobalConcurrencyLimitLayer::new(http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            http_timeout,
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "aihq serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}

/// In-process state for tests: memory store, no webhook, scripted or absent
/// LLM.
#[cfg(test)]
pub(crate) fn test_state(llm: Option<Arc<dyn ResponsesApi>>) -> Arc<HqState> {
    test_state_with(llm, HqConfig::default())
}

#[cfg(test)]
pub(crate) fn test_state_with(llm: Option<Arc<dyn ResponsesApi>>, cfg: HqConfig) -> Arc<HqState> {
    Arc::new(HqState {
        config: Arc::new(cfg),
        store: Arc::new(crate::store::MemoryStore::new()),
        engine: DebateEngine::new(llm, crate::debate::testing::settings()),
        hub: Arc::new(EventHub::new()),
        notifier: Arc::new(WebhookNotifier::disabled()),
    })
}
