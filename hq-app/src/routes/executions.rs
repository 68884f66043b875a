use super::{json_body, ok_response, strict_error_response};
use crate::error::HqResult;
use crate::executions::{CALLBACK_PATH, CallbackResult, apply_report, authorize, parse_report};
use crate::server::HqState;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use axum::{Extension, Json};
use serde_json::Value;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route(CALLBACK_PATH, post(post_callback))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_callback(
    Extension(state): Extension<Arc<HqState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    match handle(&state, &headers, body).await {
        Ok(result) => ok_response(
            &state,
            serde_json::json!({ "job": result.job, "notification": result.notification }),
        ),
        Err(e) => strict_error_response(&state, &e),
    }
}

async fn handle(
    state: &HqState,
    headers: &HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> HqResult<CallbackResult> {
    authorize(&state.config.workflow.callback_tokens(), headers)?;
    let report = parse_report(&json_body(body)?)?;
    apply_report(state, report).await
}
