pub mod agents;
pub mod chat;
pub mod debate;
pub mod debug;
pub mod executions;
pub mod health;
pub mod notifications;
pub mod proposals;
pub mod threads;

use crate::error::HqError;
use crate::server::HqState;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(agents::router())
        .merge(chat::router())
        .merge(debate::router())
        .merge(proposals::router())
        .merge(notifications::router())
        .merge(executions::router())
        .merge(threads::router())
        .merge(debug::router())
}

/// `{ok:true, …, dbDisabled}` envelope.
pub(crate) fn ok_response(state: &HqState, mut body: Value) -> Response {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("ok".to_string(), Value::Bool(true));
        obj.insert("dbDisabled".to_string(), Value::Bool(state.db_disabled()));
    }
    Json(body).into_response()
}

/// `ok:false` envelope on a 200 for client errors, as most endpoints report.
pub(crate) fn error_response(state: &HqState, err: &HqError) -> Response {
    log_error(err);
    (err.status(), Json(err.to_body(state.db_disabled()))).into_response()
}

/// Same body, but with a status code the caller can branch on.
pub(crate) fn strict_error_response(state: &HqState, err: &HqError) -> Response {
    log_error(err);
    (err.strict_status(), Json(err.to_body(state.db_disabled()))).into_response()
}

fn log_error(err: &HqError) {
    match err {
        HqError::Store(e) => tracing::error!(error = %e, "request failed on store"),
        other => tracing::info!(code = other.code(), error = %other, "request rejected"),
    }
}

/// Unwraps a JSON body, turning a malformed one into an input error.
pub(crate) fn json_body<T: DeserializeOwned>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, HqError> {
    body.map(|Json(v)| v)
        .map_err(|e| HqError::invalid(format!("invalid JSON body: {}", e.body_text())))
}
