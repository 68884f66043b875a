use super::{error_response, json_body, ok_response};
use crate::chat;
use crate::server::HqState;
use axum::extract::rejection::JsonRejection;
use axum::response::Response;
use axum::routing::post;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/chat", post(post_chat))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_chat(
    Extension(state): Extension<Arc<HqState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(body) {
        Ok(req) => req,
        Err(e) => return error_response(&state, &e),
    };
    let hint = req.agent.as_deref().or(req.agent_id.as_deref());
    match chat::chat(&state, &req.message, hint, req.thread_id.as_deref()).await {
        Ok(reply) => ok_response(
            &state,
            serde_json::json!({
                "threadId": reply.thread_id,
                "agent": reply.agent,
                "replyText": reply.reply_text,
                "proposal": null,
            }),
        ),
        Err(e) => error_response(&state, &e),
    }
}

#[cfg(test)]
mod tests {
    use crate::debate::testing::{ScriptedLlm, Step};
    use crate::routes::test_support::call;
    use crate::server::test_state;
    use axum::http::StatusCode;
    use hq_llm::ResponsesApi;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn chat_round_trip() {
        let llm: Arc<dyn ResponsesApi> = Arc::new(ScriptedLlm::new(vec![Step::text("Do X.")]));
        let state = test_state(Some(llm));
        let (status, body) = call(
            &state,
            "POST",
            "/api/chat",
            Some(json!({ "message": "help", "agentId": "atlas" })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["agent"], "atlas");
        assert_eq!(body["replyText"], "Do X.");
        assert_eq!(body["dbDisabled"], true);
        assert!(body["proposal"].is_null());
    }

    #[tokio::test]
    async fn missing_message_is_ok_false() {
        let state = test_state(None);
        let (status, body) = call(&state, "POST", "/api/chat", Some(json!({})), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "message required");
    }
}
