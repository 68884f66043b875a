use anyhow::{Result, anyhow};
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

const MIN_TIMEOUT: Duration = Duration::from_millis(1000);
const MAX_BODY_CHARS: usize = 2000;

/// Result of one notify attempt. Delivery is best effort, so failures are
/// values the caller inspects rather than errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Skipped { reason: String },
    Delivered { status: u16, body: serde_json::Value },
    Rejected { status: u16, body: serde_json::Value },
    Failed { error: String },
}

/// Posts JSON events to the external workflow system (an n8n-style webhook).
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    /// A notifier without a URL is valid and reports every event as skipped.
    pub fn new(url: Option<&str>, timeout: Duration) -> Result<Self> {
        let url = match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(raw) => Some(normalize_http_url(raw, "webhook_url")?),
            None => None,
        };
        Ok(Self {
            http: reqwest::Client::new(),
            url,
            token: None,
            timeout: timeout.max(MIN_TIMEOUT),
        })
    }

    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            url: None,
            token: None,
            timeout: MIN_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn notify(&self, payload: &serde_json::Value) -> NotifyOutcome {
        let Some(url) = self.url.as_deref() else {
            return NotifyOutcome::Skipped {
                reason: "webhook url not configured".to_string(),
            };
        };

        let mut request = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header("content-type", "application/json; charset=utf-8")
            .json(payload);
        if let Some(token) = self.token.as_deref() {
            request = request.header(WEBHOOK_TOKEN_HEADER, token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let error = if e.is_timeout() {
                    format!("webhook timed out after {}ms", self.timeout.as_millis())
                } else {
                    e.to_string()
                };
                return NotifyOutcome::Failed { error };
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = parse_body(&text);
        if status.is_success() {
            NotifyOutcome::Delivered {
                status: status.as_u16(),
                body,
            }
        } else {
            NotifyOutcome::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// Workflow engines often answer with plain text ("Workflow was started").
fn parse_body(text: &str) -> serde_json::Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Null;
    }
    match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => serde_json::Value::String(trimmed.chars().take(MAX_BODY_CHARS).collect()),
    }
}

fn normalize_http_url(raw: &str, field: &str) -> Result<String> {
    let normalized = raw.trim().to_string();
    if normalized.is_empty() {
        return Err(anyhow!("{field} is required"));
    }
    let parsed = Url::parse(&normalized).map_err(|e| anyhow!("invalid {field}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(normalized),
        other => Err(anyhow!("invalid {field} scheme: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{NotifyOutcome, WEBHOOK_TOKEN_HEADER, WebhookNotifier, normalize_http_url, parse_body};
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn normalize_http_url_requires_http_or_https() {
        assert_eq!(
            normalize_http_url("https://n8n.example.com/webhook/hq", "webhook_url")
                .expect("https url should be valid"),
            "https://n8n.example.com/webhook/hq"
        );
        assert!(normalize_http_url("ftp://n8n.example.com/hook", "webhook_url").is_err());
        assert!(WebhookNotifier::new(Some("not a url"), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn parse_body_tolerates_plain_text() {
        assert_eq!(parse_body(r#"{"ok":true}"#), json!({ "ok": true }));
        assert_eq!(
            parse_body("Workflow was started"),
            json!("Workflow was started")
        );
        assert_eq!(parse_body("  "), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn unconfigured_notifier_skips() {
        let notifier = WebhookNotifier::new(None, Duration::from_secs(1)).expect("notifier");
        assert!(!notifier.is_configured());
        let outcome = notifier.notify(&json!({ "event": "proposal.approved" })).await;
        assert!(matches!(outcome, NotifyOutcome::Skipped { .. }));
    }

    async fn spawn_webhook_server(
        status: StatusCode,
        reply: &'static str,
        seen_token: Arc<Mutex<Option<String>>>,
    ) -> String {
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap| {
                let seen_token = seen_token.clone();
                async move {
                    let token = headers
                        .get(WEBHOOK_TOKEN_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(ToOwned::to_owned);
                    *seen_token.lock().expect("lock") = token;
                    (status, reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/hook")
    }

    #[tokio::test]
    async fn delivers_with_shared_secret_header_and_text_body() {
        let seen = Arc::new(Mutex::new(None));
        let url = spawn_webhook_server(StatusCode::OK, "Workflow was started", seen.clone()).await;
        let notifier = WebhookNotifier::new(Some(&url), Duration::from_secs(5))
            .expect("notifier")
            .with_token(Some("hook-secret".to_string()));

        let outcome = notifier.notify(&json!({ "event": "proposal.approved" })).await;
        assert_eq!(
            outcome,
            NotifyOutcome::Delivered {
                status: 200,
                body: json!("Workflow was started"),
            }
        );
        assert_eq!(seen.lock().expect("lock").as_deref(), Some("hook-secret"));
    }

    #[tokio::test]
    async fn non_success_status_is_reported_as_rejected() {
        let seen = Arc::new(Mutex::new(None));
        let url = spawn_webhook_server(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"message":"boom"}"#,
            seen,
        )
        .await;
        let notifier = WebhookNotifier::new(Some(&url), Duration::from_secs(5)).expect("notifier");
        let outcome = notifier.notify(&json!({})).await;
        assert!(matches!(
            outcome,
            NotifyOutcome::Rejected { status: 500, ref body } if body["message"] == "boom"
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_without_panicking() {
        let notifier = WebhookNotifier::new(Some("http://127.0.0.1:9/hook"), Duration::from_secs(1))
            .expect("notifier");
        let outcome = notifier.notify(&json!({})).await;
        assert!(matches!(outcome, NotifyOutcome::Failed { .. }));
    }
}
