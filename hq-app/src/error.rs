use crate::models::Proposal;
use axum::http::StatusCode;
use serde_json::json;
use thiserror::Error;

pub type HqResult<T> = std::result::Result<T, HqError>;

/// Client-visible failures. Upstream LLM and webhook problems never show up
/// here; they degrade into marker text or logged outcomes instead.
#[derive(Debug, Error)]
pub enum HqError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("proposal already decided (status={})", proposal.status)]
    AlreadyDecided { proposal: Box<Proposal> },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl HqError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::AlreadyDecided { .. } => "already_decided",
            Self::Store(_) => "store_error",
        }
    }

    /// Status for envelope-style endpoints, which report most failures as
    /// `ok:false` on a 200.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }

    /// Status for machine-to-machine endpoints such as the execution
    /// callback, where the caller branches on the HTTP status.
    pub fn strict_status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyDecided { .. } => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self, db_disabled: bool) -> serde_json::Value {
        let mut body = json!({
            "ok": false,
            "error": self.to_string(),
            "code": self.code(),
            "dbDisabled": db_disabled,
        });
        if let (Self::AlreadyDecided { proposal }, Some(obj)) = (self, body.as_object_mut()) {
            obj.insert("proposal".to_string(), json!(proposal));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::HqError;
    use crate::models::{Proposal, ProposalStatus};
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn already_decided_body_carries_current_proposal() {
        let proposal = Proposal {
            id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            agent: "kernel".to_string(),
            kind: "plan".to_string(),
            status: ProposalStatus::Approved,
            title: "t".to_string(),
            payload: json!({}),
            created_at: Utc::now(),
            decided_at: Some(Utc::now()),
            decision_by: Some("ceo".to_string()),
        };
        let err = HqError::AlreadyDecided {
            proposal: Box::new(proposal.clone()),
        };
        let body = err.to_body(true);
        assert_eq!(body["ok"], false);
        assert_eq!(body["code"], "already_decided");
        assert_eq!(body["dbDisabled"], true);
        assert_eq!(body["proposal"]["status"], "approved");
        assert!(body["error"].as_str().unwrap_or("").contains("already decided"));
        assert_eq!(err.status(), StatusCode::OK);
    }

    #[test]
    fn strict_status_distinguishes_bad_input_from_missing_job() {
        assert_eq!(
            HqError::invalid("bad jobId").strict_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HqError::not_found("job not found").strict_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HqError::Unauthorized("nope".to_string()).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
