//! Human decisions on pending proposals.
//!
//! The store performs the pending-to-terminal flip as one conditional
//! update, so every side effect below runs at most once per proposal no
//! matter how many decision requests race. Once the flip has landed there is
//! no retry path, so the job and the workflow webhook go out first and the
//! CEO notification is best effort.

use crate::error::{HqError, HqResult};
use crate::events::{HqEvent, publish};
use crate::executions::CALLBACK_PATH;
use crate::models::{
    DecideOutcome, Decision, DecisionRecord, Job, NewAuditEntry, NewJob, NewNotification,
    Notification, NotificationKind, Proposal, CEO_RECIPIENT,
};
use crate::notifications::{audit, raise};
use crate::server::HqState;
use chrono::Utc;
use hq_channels::{NotifyOutcome, WEBHOOK_TOKEN_HEADER};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

const GENERIC_JOB_KIND: &str = "generic";

#[derive(Debug, Clone, Serialize)]
pub struct DecisionResult {
    pub proposal: Proposal,
    /// `None` when the notification could not be stored.
    pub notification: Option<Notification>,
    pub job: Option<Job>,
}

#[tracing::instrument(level = "info", skip(state, reason))]
pub async fn decide(
    state: &HqState,
    raw_id: &str,
    raw_decision: &str,
    by: Option<&str>,
    reason: Option<&str>,
) -> HqResult<DecisionResult> {
    let raw_id = raw_id.trim();
    if raw_id.is_empty() {
        return Err(HqError::invalid("proposal id required"));
    }
    let decision = Decision::parse(raw_decision).ok_or_else(|| {
        HqError::invalid("decision must be \"approved\" or \"rejected\" (or approve/reject)")
    })?;
    let id = Uuid::parse_str(raw_id).map_err(|_| HqError::not_found("proposal not found"))?;
    let by = by.map(str::trim).filter(|b| !b.is_empty()).unwrap_or(CEO_RECIPIENT);
    let record = DecisionRecord::new(decision, by, reason.unwrap_or_default(), Utc::now());

    let proposal = match state.store.decide_proposal(id, &record).await? {
        DecideOutcome::Applied(proposal) => proposal,
        DecideOutcome::AlreadyDecided(current) => {
            tracing::info!(status = %current.status, "proposal already decided");
            return Err(HqError::AlreadyDecided {
                proposal: Box::new(current),
            });
        }
        DecideOutcome::NotFound => return Err(HqError::not_found("proposal not found")),
    };
    tracing::info!(decision = %decision, by = %record.by, "proposal decided");

    publish(&state.hub, HqEvent::ProposalUpdated { proposal: &proposal });
    audit(
        state,
        NewAuditEntry::new(
            &record.by,
            "proposal.decision",
            "proposal",
            proposal.id,
            json!({ "decision": decision }),
        ),
    )
    .await;

    let (job, job_error) = match decision {
        Decision::Approved => match queue_job(state, &proposal).await {
            Ok(job) => (Some(job), None),
            Err(e) => {
                tracing::error!(error = %e, "approved proposal has no execution job");
                (None, Some(e))
            }
        },
        Decision::Rejected => (None, None),
    };

    let payload = workflow_payload(&proposal, &record, job.as_ref(), state.db_disabled());
    dispatch_workflow(state, payload);

    let notification = notify_ceo(state, &proposal, &record).await;
    if let Some(e) = job_error {
        return Err(e);
    }

    Ok(DecisionResult {
        proposal,
        notification,
        job,
    })
}

async fn notify_ceo(
    state: &HqState,
    proposal: &Proposal,
    record: &DecisionRecord,
) -> Option<Notification> {
    let (kind, title) = match record.decision {
        Decision::Approved => (NotificationKind::Success, "Proposal Approved"),
        Decision::Rejected => (NotificationKind::Warning, "Proposal Rejected"),
    };
    let notification = NewNotification::for_ceo(
        kind,
        title,
        proposal.title.clone(),
        json!({
            "proposalId": proposal.id,
            "threadId": proposal.thread_id,
            "decision": record.decision,
            "reason": record.reason,
        }),
    );
    match raise(state, notification).await {
        Ok(created) => Some(created),
        Err(e) => {
            tracing::warn!(error = %e, proposal_id = %proposal.id, "decision notification not stored");
            None
        }
    }
}

async fn queue_job(state: &HqState, proposal: &Proposal) -> HqResult<Job> {
    let kind = if proposal.kind.trim().is_empty() {
        GENERIC_JOB_KIND.to_string()
    } else {
        proposal.kind.clone()
    };
    let job = state
        .store
        .create_job(NewJob {
            proposal_id: Some(proposal.id),
            kind,
            input: json!({ "proposal": proposal }),
        })
        .await?;
    publish(&state.hub, HqEvent::JobUpdated { job: &job });
    audit(
        state,
        NewAuditEntry::new(
            "system",
            "job.create",
            "job",
            job.id,
            json!({ "proposalId": proposal.id }),
        ),
    )
    .await;
    tracing::info!(job_id = %job.id, "execution job queued");
    Ok(job)
}

/// Body posted to the workflow webhook after a decision.
pub fn workflow_payload(
    proposal: &Proposal,
    record: &DecisionRecord,
    job: Option<&Job>,
    db_disabled: bool,
) -> Value {
    let event = match record.decision {
        Decision::Approved => "proposal.approved",
        Decision::Rejected => "proposal.rejected",
    };
    let field = |name: &str| proposal.payload.get(name).cloned().unwrap_or(Value::Null);
    json!({
        "event": event,
        "proposalId": proposal.id,
        "threadId": proposal.thread_id,
        "by": record.by,
        "decidedAt": proposal.decided_at,
        "jobId": job.map(|j| j.id),
        "callback": {
            "url": CALLBACK_PATH,
            "tokenHeader": WEBHOOK_TOKEN_HEADER,
        },
        "title": proposal.title,
        "summary": field("summary"),
        "tasks": field("steps"),
        "ownerMap": field("ownerMap"),
        "decision": record.decision,
        "reason": record.reason,
        "proposal": proposal,
        "dbDisabled": db_disabled,
    })
}

fn dispatch_workflow(state: &HqState, payload: Value) {
    if !state.notifier.is_configured() {
        tracing::debug!("workflow webhook not configured; decision not forwarded");
        return;
    }
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        let event = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        match notifier.notify(&payload).await {
            NotifyOutcome::Delivered { status, .. } => {
                tracing::info!(event = %event, status, "workflow webhook delivered");
            }
            NotifyOutcome::Skipped { reason } => {
                tracing::debug!(event = %event, reason = %reason, "workflow webhook skipped");
            }
            NotifyOutcome::Rejected { status, body } => {
                tracing::warn!(event = %event, status, body = %body, "workflow webhook rejected");
            }
            NotifyOutcome::Failed { error } => {
                tracing::warn!(event = %event, error = %error, "workflow webhook failed");
            }
        }
    });
}
