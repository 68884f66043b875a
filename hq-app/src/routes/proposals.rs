use super::{error_response, json_body, ok_response};
use crate::decisions::decide;
use crate::error::HqError;
use crate::models::ProposalStatus;
use crate::server::HqState;
use crate::store::DEFAULT_PROPOSAL_LIST_LIMIT;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DecisionBody {
    #[serde(default)]
    decision: String,
    #[serde(default)]
    by: Option<String>,
    #[serde(default, alias = "note")]
    reason: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/proposals", get(list_proposals))
        .route("/api/proposals/{id}/decision", post(post_decision))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_proposals(
    Extension(state): Extension<Arc<HqState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => ProposalStatus::Pending,
        Some(raw) => match raw.parse::<ProposalStatus>() {
            Ok(status) => status,
            Err(_) => {
                let err = HqError::invalid("status must be \"pending\"|\"approved\"|\"rejected\"");
                return error_response(&state, &err);
            }
        },
    };
    match state.store.list_proposals(status, DEFAULT_PROPOSAL_LIST_LIMIT).await {
        Ok(proposals) => ok_response(
            &state,
            serde_json::json!({ "status": status, "proposals": proposals }),
        ),
        Err(e) => error_response(&state, &HqError::Store(e)),
    }
}

#[tracing::instrument(level = "info", skip_all, fields(proposal_id = %id))]
async fn post_decision(
    Extension(state): Extension<Arc<HqState>>,
    Path(id): Path<String>,
    body: Result<Json<DecisionBody>, JsonRejection>,
) -> Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(e) => return error_response(&state, &e),
    };
    match decide(
        &state,
        &id,
        &body.decision,
        body.by.as_deref(),
        body.reason.as_deref(),
    )
    .await
    {
        Ok(result) => ok_response(
            &state,
            serde_json::json!({
                "proposal": result.proposal,
                "notification": result.notification,
                "job": result.job,
            }),
        ),
        Err(e) => error_response(&state, &e),
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{NewProposal, Proposal};
    use crate::routes::test_support::call;
    use crate::server::{HqState, test_state};
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn pending(state: &Arc<HqState>) -> Proposal {
        state
            .store
            .create_proposal(NewProposal {
                thread_id: Uuid::new_v4(),
                agent: "kernel".into(),
                kind: "plan".into(),
                title: "7-day plan".into(),
                payload: json!({ "summary": "s", "steps": [], "kpis": [], "ownerMap": {} }),
            })
            .await
            .expect("proposal")
    }

    #[tokio::test]
    async fn approve_once_then_already_decided() {
        let state = test_state(None);
        let proposal = pending(&state).await;
        let uri = format!("/api/proposals/{}/decision", proposal.id);

        let (status, body) = call(&state, "POST", &uri, Some(json!({ "decision": "approve" })), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true, "{body}");
        assert_eq!(body["proposal"]["status"], "approved");
        assert_eq!(body["notification"]["title"], "Proposal Approved");
        assert_eq!(body["job"]["status"], "queued");

        let (status, body) = call(&state, "POST", &uri, Some(json!({ "decision": "rejected" })), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert_eq!(body["code"], "already_decided");
        assert!(body["error"].as_str().expect("error").contains("already decided"));
        assert_eq!(body["proposal"]["status"], "approved");

        let (_, listed) = call(&state, "GET", "/api/proposals?status=approved", None, &[]).await;
        assert_eq!(listed["proposals"].as_array().expect("list").len(), 1);
        let (_, listed) = call(&state, "GET", "/api/proposals", None, &[]).await;
        assert_eq!(listed["status"], "pending");
        assert!(listed["proposals"].as_array().expect("list").is_empty());
    }

    #[tokio::test]
    async fn reject_with_note_creates_no_job() {
        let state = test_state(None);
        let proposal = pending(&state).await;
        let uri = format!("/api/proposals/{}/decision", proposal.id);
        let (_, body) = call(
            &state,
            "POST",
            &uri,
            Some(json!({ "decision": "REJECT", "by": "ceo", "note": "too costly" })),
            &[],
        )
        .await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["proposal"]["status"], "rejected");
        assert!(body["job"].is_null());
        assert_eq!(body["notification"]["payload"]["reason"], "too costly");
    }

    #[tokio::test]
    async fn bad_decision_and_unknown_ids() {
        let state = test_state(None);
        let proposal = pending(&state).await;
        let uri = format!("/api/proposals/{}/decision", proposal.id);
        let (_, body) = call(&state, "POST", &uri, Some(json!({ "decision": "maybe" })), &[]).await;
        assert_eq!(body["code"], "invalid_input");

        let uri = format!("/api/proposals/{}/decision", Uuid::new_v4());
        let (_, body) = call(&state, "POST", &uri, Some(json!({ "decision": "approved" })), &[]).await;
        assert_eq!(body["code"], "not_found");

        let (_, body) = call(&state, "GET", "/api/proposals?status=bogus", None, &[]).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["code"], "invalid_input");
    }

    #[tokio::test]
    async fn control_token_guards_decisions_but_not_reads() {
        let mut cfg = crate::config::HqConfig::default();
        cfg.security.control_api_token = Some("ctl".into());
        let state = crate::server::test_state_with(None, cfg);
        let proposal = pending(&state).await;
        let uri = format!("/api/proposals/{}/decision", proposal.id);

        let (status, body) = call(&state, "POST", &uri, Some(json!({ "decision": "approved" })), &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "missing_bearer_token");

        let (status, _) = call(&state, "GET", "/api/proposals", None, &[]).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(
            &state,
            "POST",
            &uri,
            Some(json!({ "decision": "approved" })),
            &[("authorization", "Bearer ctl")],
        )
        .await;
        assert_eq!(body["ok"], true);
    }
}
