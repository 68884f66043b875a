use crate::agents::{self, AgentProfile, DISABLED_ANSWER};
use crate::error::{HqError, HqResult};
use crate::events::{HqEvent, publish};
use crate::models::{MessageRole, NewMessage};
use crate::server::HqState;
use chrono::Utc;
use hq_llm::{ResponseRequest, ResponsesApi, with_timeout};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

pub const NO_TEXT_REPLY: &str = "(no text)";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub thread_id: Uuid,
    pub agent: &'static str,
    pub reply_text: String,
}

/// Parses an optional client-supplied thread id; blank means "new thread".
pub fn parse_thread_id(raw: Option<&str>) -> HqResult<Option<Uuid>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| HqError::invalid("threadId must be uuid")),
    }
}

pub fn new_thread_title() -> String {
    format!("Thread {}", Utc::now().to_rfc3339())
}

/// One single-agent turn. Upstream failures come back as reply text.
#[tracing::instrument(level = "info", skip_all, fields(agent = agent.id))]
pub async fn agent_reply(
    llm: Option<&dyn ResponsesApi>,
    model: &str,
    timeout: Duration,
    agent: &AgentProfile,
    message: &str,
) -> String {
    let Some(llm) = llm else {
        return DISABLED_ANSWER.to_string();
    };
    let request = ResponseRequest::new(model)
        .system(agent.chat_system)
        .user(message);
    match with_timeout(llm.create(&request), timeout, "LLM timeout (chat)").await {
        Ok(envelope) => {
            let text = envelope.text();
            if text.is_empty() {
                tracing::warn!(
                    response_status = envelope.status().unwrap_or("unknown"),
                    "chat reply was empty"
                );
                format!(
                    "Empty reply (model={model}, status={}). Check /api/debug/openai for the raw response.",
                    envelope.status().unwrap_or("unknown")
                )
            } else {
                text
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "chat call failed");
            format!("LLM error: {e}")
        }
    }
}

#[tracing::instrument(level = "info", skip(state, message))]
pub async fn chat(
    state: &HqState,
    message: &str,
    agent_hint: Option<&str>,
    thread_id: Option<&str>,
) -> HqResult<ChatReply> {
    let message = message.trim();
    if message.is_empty() {
        return Err(HqError::invalid("message required"));
    }
    let hint = agent_hint.map(str::trim).filter(|h| !h.is_empty());
    let thread_id = parse_thread_id(thread_id)?;
    let thread = state.store.ensure_thread(thread_id, &new_thread_title()).await?;

    state
        .store
        .append_message(NewMessage {
            thread_id: thread.id,
            role: MessageRole::User,
            agent: hint.map(ToOwned::to_owned),
            content: message.to_string(),
            meta: serde_json::json!({}),
        })
        .await?;

    let agent = agents::resolve_chat_agent(hint);
    let reply_text = agent_reply(
        state.llm(),
        state.config.llm.chat_model(),
        state.config.llm.timeout(),
        agent,
        message,
    )
    .await;

    let saved = state
        .store
        .append_message(NewMessage {
            thread_id: thread.id,
            role: MessageRole::Assistant,
            agent: Some(agent.id.to_string()),
            content: reply_text.clone(),
            meta: serde_json::json!({}),
        })
        .await?;
    publish(
        &state.hub,
        HqEvent::ThreadMessage {
            thread_id: thread.id,
            message: &saved,
        },
    );

    Ok(ChatReply {
        thread_id: thread.id,
        agent: agent.id,
        reply_text: if reply_text.trim().is_empty() {
            NO_TEXT_REPLY.to_string()
        } else {
            reply_text
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::testing::{ScriptedLlm, Step};
    use crate::server::test_state;
    use std::sync::Arc;

    #[tokio::test]
    async fn chat_persists_both_turns_and_uses_chat_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::text("Here is the plan.")]));
        let state = test_state(Some(llm.clone()));
        let mut events = state.hub.subscribe();

        let reply = chat(&state, "  grow sales ", Some("ghost"), None)
            .await
            .expect("chat");
        assert_eq!(reply.agent, "orion");
        assert_eq!(reply.reply_text, "Here is the plan.");

        let messages = state.store.list_messages(reply.thread_id).await.expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "grow sales");
        assert_eq!(messages[0].agent.as_deref(), Some("ghost"));
        assert_eq!(messages[1].agent.as_deref(), Some("orion"));

        let seen = llm.requests();
        assert_eq!(seen[0].model, "gpt-4.1-mini");
        assert!(seen[0].input[0].content.starts_with("You are Orion"));
        let event = events.recv().await.expect("event");
        assert!(event.contains("thread.message"));
    }

    #[tokio::test]
    async fn chat_reuses_thread_and_reports_failures_as_text() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Step::text("first"),
            Step::error("http error: 401"),
        ]));
        let state = test_state(Some(llm));
        let first = chat(&state, "hi", Some("nova"), None).await.expect("chat");
        assert_eq!(first.agent, "nova");
        let second = chat(&state, "again", None, Some(&first.thread_id.to_string()))
            .await
            .expect("chat");
        assert_eq!(second.thread_id, first.thread_id);
        assert!(second.reply_text.starts_with("LLM error: "));
        let messages = state.store.list_messages(first.thread_id).await.expect("messages");
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn chat_without_key_answers_disabled_text() {
        let state = test_state(None);
        let reply = chat(&state, "hi", None, None).await.expect("chat");
        assert_eq!(reply.reply_text, DISABLED_ANSWER);
    }

    #[tokio::test]
    async fn chat_rejects_blank_message_and_bad_thread_id() {
        let state = test_state(None);
        assert_eq!(chat(&state, "  ", None, None).await.expect_err("blank").code(), "invalid_input");
        assert_eq!(
            chat(&state, "hi", None, Some("not-a-uuid")).await.expect_err("bad id").code(),
            "invalid_input"
        );
    }
}
