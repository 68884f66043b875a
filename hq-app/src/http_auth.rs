use crate::config::{HqConfig, non_empty};
use crate::executions::CALLBACK_PATH;
use axum::Json;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sha2::{Digest, Sha256};

pub const DEBUG_PATH_PREFIX: &str = "/api/debug/";

#[derive(Debug, Clone)]
pub struct MutatingAuthPolicy {
    pub control_api_tokens: Vec<String>,
    /// Routes that carry their own shared secret.
    pub mutating_auth_exempt_prefixes: Vec<String>,
}

impl Default for MutatingAuthPolicy {
    fn default() -> Self {
        Self {
            control_api_tokens: Vec::new(),
            mutating_auth_exempt_prefixes: vec![
                CALLBACK_PATH.to_string(),
                DEBUG_PATH_PREFIX.to_string(),
            ],
        }
    }
}

impl MutatingAuthPolicy {
    pub fn from_config(cfg: &HqConfig) -> Self {
        Self {
            control_api_tokens: non_empty(cfg.security.control_api_token.as_deref())
                .map(|t| vec![t.to_string()])
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn requires_auth(&self) -> bool {
        !self.control_api_tokens.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MutatingAuthPolicyExt(pub MutatingAuthPolicy);

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn path_matches_prefix(path: &str, prefix: &str) -> bool {
    if path == prefix {
        return true;
    }
    let Some(suffix) = path.strip_prefix(prefix) else {
        return false;
    };
    if prefix.ends_with('/') {
        return true;
    }
    suffix.starts_with('/')
}

fn is_mutating_path_exempt(path: &str, policy: &MutatingAuthPolicy) -> bool {
    policy
        .mutating_auth_exempt_prefixes
        .iter()
        .any(|prefix| path_matches_prefix(path, prefix))
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    let mut diff = left.len() ^ right.len();
    for index in 0..left.len().max(right.len()) {
        let l = left.get(index).copied().unwrap_or(0);
        let r = right.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

/// Compares SHA-256 digests so timing does not leak the secret's length or
/// prefix.
pub fn token_matches_any(expected: &[String], provided: &str) -> bool {
    let provided = Sha256::digest(provided.trim().as_bytes());
    expected.iter().fold(false, |found, token| {
        let candidate = Sha256::digest(token.trim().as_bytes());
        constant_time_eq(&candidate, &provided) | found
    })
}

fn unauthorized_with_context(code: &str, message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!(error_code = code, error = %message, "mutating auth rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "ok": false,
            "error": message,
            "code": code,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_mutating_auth(req: Request<Body>, next: Next) -> Response {
    if !is_mutating(req.method()) || !path_matches_prefix(req.uri().path(), "/api") {
        return next.run(req).await;
    }

    let policy = req
        .extensions()
        .get::<MutatingAuthPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();
    if !policy.requires_auth() || is_mutating_path_exempt(req.uri().path(), &policy) {
        return next.run(req).await;
    }

    let Some(provided) = parse_bearer_token(req.headers()) else {
        return unauthorized_with_context("missing_bearer_token", "missing bearer token");
    };
    if !token_matches_any(&policy.control_api_tokens, &provided) {
        return unauthorized_with_context("invalid_bearer_token", "invalid bearer token");
    }
    next.run(req).await
}
