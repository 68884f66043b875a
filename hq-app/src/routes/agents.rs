use crate::agents::list_agents;
use axum::Json;
use axum::routing::get;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/agents", get(get_agents))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_agents() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "agents": list_agents() }))
}
