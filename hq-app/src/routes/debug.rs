use super::{error_response, json_body};
use crate::agents::resolve_chat_agent;
use crate::config::non_empty;
use crate::error::HqError;
use crate::http_auth::token_matches_any;
use crate::server::HqState;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use hq_llm::{ResponseRequest, truncate_chars, with_timeout};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

pub const DEBUG_TOKEN_HEADER: &str = "x-debug-token";
const RAW_PREVIEW_CHARS: usize = 4000;

#[derive(Debug, Default, Deserialize)]
struct DebugCallBody {
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/debug/openai", post(post_debug_call))
}

fn check_token(state: &HqState, headers: &HeaderMap) -> Result<(), HqError> {
    let Some(expected) = non_empty(state.config.security.debug_api_token.as_deref()) else {
        return Err(HqError::not_found("debug endpoint disabled"));
    };
    let provided = headers
        .get(DEBUG_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if token_matches_any(&[expected.to_string()], provided) {
        Ok(())
    } else {
        Err(HqError::Unauthorized("forbidden (missing/invalid debug token)".to_string()))
    }
}

/// Sends one chat-style call and echoes the raw provider envelope.
#[tracing::instrument(level = "info", skip_all)]
async fn post_debug_call(
    Extension(state): Extension<Arc<HqState>>,
    headers: HeaderMap,
    body: Result<Json<DebugCallBody>, JsonRejection>,
) -> Response {
    if let Err(e) = check_token(&state, &headers) {
        return error_response(&state, &e);
    }
    let body = match json_body(body) {
        Ok(body) => body,
        Err(e) => return error_response(&state, &e),
    };
    let agent = resolve_chat_agent(body.agent.as_deref());
    let message = non_empty(body.message.as_deref()).unwrap_or("ping");

    let Some(llm) = state.llm() else {
        return Json(json!({
            "ok": false,
            "status": null,
            "agent": agent.id,
            "extractedText": "",
            "raw": "LLM disabled",
        }))
        .into_response();
    };

    let request = ResponseRequest::new(state.config.llm.chat_model())
        .system(agent.chat_system)
        .user(message);
    let timeout = state.config.llm.timeout();
    match with_timeout(llm.create(&request), timeout, "LLM timeout (debug)").await {
        Ok(envelope) => {
            let raw = serde_json::to_string_pretty(&envelope.body)
                .unwrap_or_else(|_| envelope.body.to_string());
            tracing::info!(
                http_status = envelope.http_status,
                response_status = envelope.status().unwrap_or("unknown"),
                "debug call answered"
            );
            Json(json!({
                "ok": true,
                "status": envelope.http_status,
                "agent": agent.id,
                "extractedText": envelope.text(),
                "raw": Value::String(truncate_chars(&raw, RAW_PREVIEW_CHARS)),
            }))
            .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "debug call failed");
            Json(json!({
                "ok": false,
                "status": null,
                "agent": agent.id,
                "extractedText": "",
                "raw": e.to_string(),
            }))
            .into_response()
        }
    }
}
