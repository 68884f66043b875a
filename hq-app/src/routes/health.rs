use crate::debate::ENGINE_VERSION;
use crate::server::{HqState, SERVICE_NAME};
use axum::routing::get;
use axum::{Extension, Json};
use std::sync::Arc;

pub const ENDPOINTS: [&str; 12] = [
    "GET /health",
    "GET /api",
    "GET /api/agents",
    "POST /api/chat",
    "POST /api/debate",
    "GET /api/proposals?status=pending",
    "POST /api/proposals/:id/decision",
    "GET /api/notifications?recipient=ceo&unread=1&limit=50",
    "POST /api/notifications/:id/read",
    "POST /api/executions/callback",
    "GET /api/threads/:id/messages",
    "POST /api/debug/openai",
];

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/health", get(get_health))
        .route("/api", get(get_index))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<HqState>>) -> Json<serde_json::Value> {
    let db_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health check store ping failed");
            false
        }
    };
    Json(serde_json::json!({
        "ok": true,
        "service": SERVICE_NAME,
        "env": state.config.server.app_env,
        "db": {
            "enabled": !state.db_disabled(),
            "ok": db_ok,
        },
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_index(Extension(state): Extension<Arc<HqState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": SERVICE_NAME,
        "db": { "enabled": !state.db_disabled() },
        "debateEngine": ENGINE_VERSION,
        "endpoints": ENDPOINTS,
    }))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::call;
    use crate::server::test_state;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_in_process_store() {
        let state = test_state(None);
        let (status, body) = call(&state, "GET", "/health", None, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], "aihq");
        assert_eq!(body["env"], "development");
        assert_eq!(body["db"]["enabled"], false);
        assert_eq!(body["db"]["ok"], true);
    }

    #[tokio::test]
    async fn index_lists_endpoints_and_engine() {
        let state = test_state(None);
        let (_, body) = call(&state, "GET", "/api", None, &[]).await;
        assert!(body["debateEngine"].as_str().expect("engine").starts_with("aihq-debate/"));
        let endpoints = body["endpoints"].as_array().expect("endpoints");
        assert!(endpoints.iter().any(|e| e == "POST /api/debate"));
    }
}
