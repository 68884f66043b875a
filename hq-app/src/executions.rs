//! Status reports from the external workflow system about queued jobs.

use crate::error::{HqError, HqResult};
use crate::events::{HqEvent, publish};
use crate::http_auth::token_matches_any;
use crate::models::{
    Job, JobStatus, JobUpdate, NewAuditEntry, NewNotification, Notification, NotificationKind,
};
use crate::notifications::{audit, raise};
use crate::server::HqState;
use axum::http::HeaderMap;
use chrono::Utc;
use hq_channels::WEBHOOK_TOKEN_HEADER;
use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

pub const CALLBACK_PATH: &str = "/api/executions/callback";
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

const WORKFLOW_ACTOR: &str = "n8n";

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result: Map<String, Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackResult {
    pub job: Job,
    pub notification: Notification,
}

/// Checks the shared secret in `x-webhook-token` (or `x-callback-token`).
/// With no configured token every caller is accepted.
pub fn authorize(expected: &[String], headers: &HeaderMap) -> HqResult<()> {
    if expected.is_empty() {
        return Ok(());
    }
    let provided = [WEBHOOK_TOKEN_HEADER, CALLBACK_TOKEN_HEADER]
        .iter()
        .find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        });
    match provided {
        Some(token) if token_matches_any(expected, token) => Ok(()),
        _ => Err(HqError::Unauthorized(
            "forbidden (missing/invalid token)".to_string(),
        )),
    }
}

fn text_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Validates a callback body. Accepts `jobId` or `id`; status is
/// case-insensitive; a non-object `result` counts as empty.
pub fn parse_report(body: &Value) -> HqResult<CallbackReport> {
    let raw_id = text_field(body, "jobId")
        .or_else(|| text_field(body, "id"))
        .ok_or_else(|| HqError::invalid("jobId required"))?;
    let job_id = Uuid::parse_str(raw_id).map_err(|_| HqError::invalid("jobId must be uuid"))?;

    let status = text_field(body, "status")
        .and_then(|s| s.parse::<JobStatus>().ok())
        .filter(|s| *s != JobStatus::Queued)
        .ok_or_else(|| {
            HqError::invalid("status must be \"running\"|\"completed\"|\"failed\"")
        })?;

    let result = body
        .get("result")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let error = text_field(body, "error").map(ToOwned::to_owned);

    Ok(CallbackReport {
        job_id,
        status,
        result,
        error,
    })
}

#[tracing::instrument(level = "info", skip_all, fields(job_id = %report.job_id, status = %report.status))]
pub async fn apply_report(state: &HqState, report: CallbackReport) -> HqResult<CallbackResult> {
    let update = JobUpdate {
        status: report.status,
        result: Some(report.result.clone()),
        error: report.error.clone(),
        at: Utc::now(),
    };
    let job = state
        .store
        .update_job(report.job_id, &update)
        .await?
        .ok_or_else(|| HqError::not_found("job not found"))?;
    if job.status != report.status {
        tracing::info!(current = %job.status, "job status kept; report would move it backwards");
    }

    publish(&state.hub, HqEvent::JobUpdated { job: &job });
    audit(
        state,
        NewAuditEntry::new(
            WORKFLOW_ACTOR,
            "job.update",
            "job",
            job.id,
            json!({ "status": report.status }),
        ),
    )
    .await;

    let kind = match report.status {
        JobStatus::Completed => NotificationKind::Success,
        JobStatus::Failed => NotificationKind::Danger,
        JobStatus::Queued | JobStatus::Running => NotificationKind::Info,
    };
    let body = match (report.status, report.error.as_deref()) {
        (JobStatus::Failed, Some(error)) => error.to_string(),
        (JobStatus::Failed, None) => "Execution failed".to_string(),
        _ => "Execution update received".to_string(),
    };
    let notification = raise(
        state,
        NewNotification::for_ceo(
            kind,
            format!("Execution {}", report.status.as_str().to_ascii_uppercase()),
            body,
            json!({
                "jobId": job.id,
                "status": report.status,
                "result": report.result,
            }),
        ),
    )
    .await?;

    Ok(CallbackResult { job, notification })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewJob;
    use crate::server::test_state;
    use axum::http::HeaderValue;

    async fn queued_job(state: &HqState) -> Job {
        state
            .store
            .create_job(NewJob {
                proposal_id: None,
                kind: "plan".to_string(),
                input: json!({}),
            })
            .await
            .expect("job")
    }

    #[test]
    fn authorize_checks_either_header() {
        let tokens = vec!["s3cret".to_string()];
        let mut headers = HeaderMap::new();
        assert_eq!(
            authorize(&tokens, &headers).expect_err("missing").code(),
            "unauthorized"
        );
        headers.insert(CALLBACK_TOKEN_HEADER, HeaderValue::from_static("wrong"));
        assert!(authorize(&tokens, &headers).is_err());
        headers.insert(WEBHOOK_TOKEN_HEADER, HeaderValue::from_static(" s3cret "));
        assert!(authorize(&tokens, &headers).is_ok());
        assert!(authorize(&[], &HeaderMap::new()).is_ok());
    }

    #[test]
    fn parse_report_validates_input() {
        let id = Uuid::new_v4();
        let report = parse_report(&json!({
            "id": id.to_string(),
            "status": " Completed ",
            "result": [1, 2],
            "error": "   ",
        }))
        .expect("valid");
        assert_eq!(report.job_id, id);
        assert_eq!(report.status, JobStatus::Completed);
        assert!(report.result.is_empty());
        assert!(report.error.is_none());

        let cases = [
            (json!({ "status": "running" }), "jobId required"),
            (json!({ "jobId": "42", "status": "running" }), "jobId must be uuid"),
            (json!({ "jobId": id.to_string(), "status": "queued" }), "status must be"),
            (json!({ "jobId": id.to_string() }), "status must be"),
        ];
        for (body, expected) in cases {
            let err = parse_report(&body).expect_err("invalid");
            assert_eq!(err.code(), "invalid_input");
            assert!(err.to_string().contains(expected), "{err}");
        }
    }

    #[tokio::test]
    async fn reports_merge_output_and_keep_timestamps() {
        let state = test_state(None);
        let job = queued_job(&state).await;

        let first = parse_report(&json!({
            "jobId": job.id.to_string(),
            "status": "running",
            "result": { "a": 1 },
        }))
        .expect("report");
        let out = apply_report(&state, first).await.expect("apply");
        assert_eq!(out.job.status, JobStatus::Running);
        assert_eq!(out.notification.kind, NotificationKind::Info);
        assert_eq!(out.notification.title, "Execution RUNNING");
        let started = out.job.started_at.expect("started");

        let second = parse_report(&json!({
            "jobId": job.id.to_string(),
            "status": "completed",
            "result": { "b": 2 },
        }))
        .expect("report");
        let out = apply_report(&state, second).await.expect("apply");
        assert_eq!(out.job.output, json!({ "a": 1, "b": 2 }));
        assert_eq!(out.job.started_at, Some(started));
        assert!(out.job.finished_at.is_some());
        assert_eq!(out.notification.kind, NotificationKind::Success);

        let audit = state.store.list_audit(10).await.expect("audit");
        assert_eq!(audit.iter().filter(|a| a.action == "job.update").count(), 2);
        assert_eq!(audit[0].actor, "n8n");
    }

    #[tokio::test]
    async fn failed_report_uses_error_as_notification_body() {
        let state = test_state(None);
        let job = queued_job(&state).await;
        let report = parse_report(&json!({
            "jobId": job.id.to_string(),
            "status": "failed",
            "error": "workflow crashed",
        }))
        .expect("report");
        let out = apply_report(&state, report).await.expect("apply");
        assert_eq!(out.job.error.as_deref(), Some("workflow crashed"));
        assert_eq!(out.notification.kind, NotificationKind::Danger);
        assert_eq!(out.notification.body, "workflow crashed");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found_without_writes() {
        let state = test_state(None);
        let report = parse_report(&json!({
            "jobId": Uuid::new_v4().to_string(),
            "status": "running",
        }))
        .expect("report");
        let err = apply_report(&state, report).await.expect_err("missing");
        assert_eq!(err.code(), "not_found");
        assert!(state.store.list_audit(10).await.expect("audit").is_empty());
    }
}
