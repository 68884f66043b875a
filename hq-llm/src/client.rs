use crate::error::{LlmError, Result};
use crate::types::{ResponseEnvelope, ResponseRequest};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Anything that can answer a [`ResponseRequest`].
#[async_trait]
pub trait ResponsesApi: Send + Sync {
    /// Model used when a request does not name one.
    fn model(&self) -> &str;

    async fn create(&self, request: &ResponseRequest) -> Result<ResponseEnvelope>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::InvalidInput("api key is empty".to_string()));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(LlmError::InvalidInput("model is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: Option<&str>) -> Self {
        if let Some(url) = base_url.map(str::trim).filter(|u| !u.is_empty()) {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }
}

#[async_trait]
impl ResponsesApi for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %request.model))]
    async fn create(&self, request: &ResponseRequest) -> Result<ResponseEnvelope> {
        let response = self
            .http
            .post(self.responses_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "responses status={status} body={}",
                truncate_chars(&body, 600)
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body)?;
        Ok(ResponseEnvelope::new(status.as_u16(), parsed))
    }
}

/// Races `call` against `timeout`. A zero timeout disables the race. On expiry
/// the in-flight call is dropped and the error message is `label`.
pub async fn with_timeout<F, T>(call: F, timeout: Duration, label: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return call.await;
    }
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(label.to_string())),
    }
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
