//! Scripted stand-in for the Responses API.

use super::DebateSettings;
use super::proposal::ProposalSchema;
use async_trait::async_trait;
use hq_llm::{LlmError, ResponseEnvelope, ResponseRequest, ResponsesApi};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Text(String),
    Empty(String),
    Error(String),
    Delayed(String, Duration),
}

impl Step {
    pub fn text(t: impl Into<String>) -> Self {
        Self::Text(t.into())
    }

    pub fn empty(id: &str) -> Self {
        Self::Empty(id.to_string())
    }

    pub fn error(message: &str) -> Self {
        Self::Error(message.to_string())
    }

    pub fn delayed(t: &str, delay: Duration) -> Self {
        Self::Delayed(t.to_string(), delay)
    }
}

type Router = Box<dyn Fn(&ResponseRequest) -> Step + Send + Sync>;

pub(crate) struct ScriptedLlm {
    script: Mutex<VecDeque<Step>>,
    router: Option<Router>,
    seen: Mutex<Vec<ResponseRequest>>,
}

impl ScriptedLlm {
    /// Replays `steps` in call order, then answers "ok".
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            router: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Answers each call from the request content.
    pub fn routed(router: impl Fn(&ResponseRequest) -> Step + Send + Sync + 'static) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            router: Some(Box::new(router)),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ResponseRequest> {
        self.seen.lock().expect("lock").clone()
    }
}

pub(crate) fn text_envelope(model: &str, text: &str) -> ResponseEnvelope {
    ResponseEnvelope::new(
        200,
        json!({
            "id": "resp_test",
            "status": "completed",
            "model": model,
            "output": [{
                "type": "message",
                "content": [{ "type": "output_text", "text": text }]
            }]
        }),
    )
}

#[async_trait]
impl ResponsesApi for ScriptedLlm {
    fn model(&self) -> &str {
        "gpt-test"
    }

    async fn create(&self, request: &ResponseRequest) -> hq_llm::Result<ResponseEnvelope> {
        self.seen.lock().expect("lock").push(request.clone());
        let step = match &self.router {
            Some(route) => route(request),
            None => self
                .script
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Step::text("ok")),
        };
        match step {
            Step::Text(t) => Ok(text_envelope(&request.model, &t)),
            Step::Empty(id) => Ok(ResponseEnvelope::new(
                200,
                json!({
                    "id": id,
                    "status": "incomplete",
                    "model": request.model,
                    "output": [],
                    "usage": {
                        "output_tokens": 450,
                        "output_tokens_details": { "reasoning_tokens": 450 }
                    }
                }),
            )),
            Step::Error(message) => Err(LlmError::Http(message)),
            Step::Delayed(t, delay) => {
                tokio::time::sleep(delay).await;
                Ok(text_envelope(&request.model, &t))
            }
        }
    }
}

pub(crate) fn settings() -> DebateSettings {
    DebateSettings {
        model: "gpt-5".to_string(),
        agent_max_output_tokens: 450,
        synthesis_max_output_tokens: 750,
        proposal_max_output_tokens: 1400,
        timeout: Duration::from_secs(5),
        concurrency: 2,
        schema: ProposalSchema::default(),
    }
}

/// A draft that satisfies the default schema.
pub(crate) fn valid_proposal_json() -> serde_json::Value {
    let steps: Vec<_> = (1..=7)
        .map(|day| {
            json!({
                "day": day,
                "title": format!("Day {day}"),
                "tasks": ["task a", "task b", "task c"],
            })
        })
        .collect();
    json!({
        "type": "plan",
        "title": "Launch week",
        "payload": {
            "summary": "Launch the offer and measure it.",
            "steps": steps,
            "kpis": ["leads", "conversion", "revenue", "reach", "retention"],
            "ownerMap": {
                "orion": "strategy",
                "nova": "content",
                "atlas": "sales",
                "echo": "analytics"
            }
        }
    })
}
