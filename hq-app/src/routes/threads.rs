use super::{error_response, ok_response};
use crate::chat::parse_thread_id;
use crate::error::{HqError, HqResult};
use crate::models::Message;
use crate::server::HqState;
use axum::Extension;
use axum::extract::Path;
use axum::response::Response;
use axum::routing::get;
use std::sync::Arc;
use uuid::Uuid;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/threads/{id}/messages", get(get_messages))
}

#[tracing::instrument(level = "debug", skip_all, fields(thread_id = %id))]
async fn get_messages(Extension(state): Extension<Arc<HqState>>, Path(id): Path<String>) -> Response {
    match load(&state, &id).await {
        Ok((thread_id, messages)) => ok_response(
            &state,
            serde_json::json!({ "threadId": thread_id, "messages": messages }),
        ),
        Err(e) => error_response(&state, &e),
    }
}

async fn load(state: &HqState, raw_id: &str) -> HqResult<(Uuid, Vec<Message>)> {
    let thread_id =
        parse_thread_id(Some(raw_id))?.ok_or_else(|| HqError::invalid("threadId required"))?;
    let messages = state.store.list_messages(thread_id).await?;
    Ok((thread_id, messages))
}
