use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
struct TextFormat {
    r#type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct TextOptions {
    format: TextFormat,
}

/// One generation request against the Responses endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    pub model: String,
    pub input: Vec<InputTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    text: TextOptions,
}

impl ResponseRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: Vec::new(),
            max_output_tokens: None,
            text: TextOptions {
                format: TextFormat { r#type: "text" },
            },
        }
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.input.push(InputTurn {
            role: Role::System,
            content: content.into(),
        });
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.input.push(InputTurn {
            role: Role::User,
            content: content.into(),
        });
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens).filter(|t| *t > 0);
        self
    }
}

/// Raw provider reply. The body shape is not stable across model and SDK
/// versions, so it is kept as an untyped JSON tree and read through accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub http_status: u16,
    pub body: serde_json::Value,
}

impl ResponseEnvelope {
    pub fn new(http_status: u16, body: serde_json::Value) -> Self {
        Self { http_status, body }
    }

    pub fn text(&self) -> String {
        crate::extract::extract_text(&self.body)
    }

    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(|v| v.as_str())
    }

    pub fn status(&self) -> Option<&str> {
        self.body.get("status").and_then(|v| v.as_str())
    }

    pub fn model(&self) -> Option<&str> {
        self.body.get("model").and_then(|v| v.as_str())
    }

    pub fn output_tokens(&self) -> Option<u64> {
        let usage = self.body.get("usage")?;
        usage
            .get("output_tokens")
            .or_else(|| usage.get("completion_tokens"))
            .and_then(|v| v.as_u64())
    }

    pub fn reasoning_tokens(&self) -> Option<u64> {
        let usage = self.body.get("usage")?;
        usage
            .get("output_tokens_details")
            .or_else(|| usage.get("completion_tokens_details"))
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(|v| v.as_u64())
    }

    pub fn incomplete_reason(&self) -> Option<&str> {
        self.body
            .get("incomplete_details")
            .and_then(|d| d.get("reason"))
            .and_then(|v| v.as_str())
    }

    /// Visible stand-in for an answer that came back without any text.
    pub fn empty_marker(&self, agent_id: &str, requested_model: &str) -> String {
        let mut out = format!(
            "⚠️ empty response (agent={agent_id}, http={}, status={}, model={}, id={}, output_tokens={}",
            self.http_status,
            self.status().unwrap_or("unknown"),
            self.model().unwrap_or(requested_model),
            self.id().unwrap_or("none"),
            self.output_tokens()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
        );
        if let Some(reasoning) = self.reasoning_tokens() {
            out.push_str(&format!(", reasoning_tokens={reasoning}"));
        }
        if let Some(reason) = self.incomplete_reason() {
            out.push_str(&format!(", incomplete={reason}"));
        }
        out.push(')');
        out
    }
}
