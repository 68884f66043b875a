use super::{error_response, json_body, ok_response};
use crate::agents::KERNEL_AGENT_ID;
use crate::chat::{new_thread_title, parse_thread_id};
use crate::debate::{
    DebateMode, DebateOutcome, DebateRequest, ENGINE_VERSION, ProposalDraft, fallback_synthesis,
};
use crate::error::{HqError, HqResult};
use crate::events::{HqEvent, publish};
use crate::models::{
    MessageRole, NewAuditEntry, NewMessage, NewNotification, NewProposal, NotificationKind,
    Proposal,
};
use crate::notifications::{audit, raise};
use crate::server::HqState;
use axum::extract::rejection::JsonRejection;
use axum::response::Response;
use axum::routing::post;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const UNTITLED_PROPOSAL: &str = "Debate Proposal";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebateBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    agents: Option<Vec<String>>,
    #[serde(default)]
    rounds: Option<i64>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/debate", post(post_debate))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_debate(
    Extension(state): Extension<Arc<HqState>>,
    body: Result<Json<DebateBody>, JsonRejection>,
) -> Response {
    let result = match json_body(body) {
        Ok(body) => run(&state, body).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(body) => ok_response(&state, body),
        Err(e) => error_response(&state, &e),
    }
}

async fn run(state: &HqState, body: DebateBody) -> HqResult<serde_json::Value> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(HqError::invalid("message required"));
    }
    let thread_id = parse_thread_id(body.thread_id.as_deref())?;
    let thread = state.store.ensure_thread(thread_id, &new_thread_title()).await?;
    let agent = body
        .agent
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(ToOwned::to_owned);

    state
        .store
        .append_message(NewMessage {
            thread_id: thread.id,
            role: MessageRole::User,
            agent,
            content: message.to_string(),
            meta: json!({ "kind": "debate" }),
        })
        .await?;

    let request = DebateRequest::new(
        message,
        body.agents,
        body.rounds,
        DebateMode::parse(body.mode.as_deref()),
    );
    let DebateOutcome {
        mut final_answer,
        agent_notes,
        proposal,
    } = state.engine.run(&request).await;
    if final_answer.trim().is_empty() {
        final_answer = fallback_synthesis(&agent_notes);
    }

    let saved = state
        .store
        .append_message(NewMessage {
            thread_id: thread.id,
            role: MessageRole::Assistant,
            agent: Some(KERNEL_AGENT_ID.to_string()),
            content: final_answer.clone(),
            meta: json!({ "kind": "debate.synthesis", "mode": request.mode }),
        })
        .await?;
    publish(
        &state.hub,
        HqEvent::ThreadMessage {
            thread_id: thread.id,
            message: &saved,
        },
    );

    let proposal = match proposal {
        Some((draft, source)) => {
            tracing::info!(?source, kind = draft.kind(), "persisting debate proposal");
            Some(persist_proposal(state, thread.id, &draft).await?)
        }
        None => None,
    };

    let agent_lens: Vec<_> = agent_notes
        .iter()
        .map(|n| json!({ "agentId": n.agent_id, "len": n.text.chars().count() }))
        .collect();
    Ok(json!({
        "threadId": thread.id,
        "finalAnswer": final_answer,
        "agentNotes": agent_notes,
        "proposal": proposal,
        "debug": {
            "engineVersion": ENGINE_VERSION,
            "mode": request.mode,
            "rounds": request.rounds,
            "agents": request.agents,
            "synthesisLen": final_answer.chars().count(),
            "hasProposal": proposal.is_some(),
            "agentLens": agent_lens,
        },
    }))
}

async fn persist_proposal(
    state: &HqState,
    thread_id: Uuid,
    draft: &ProposalDraft,
) -> HqResult<Proposal> {
    let title = match draft.title().trim() {
        "" => UNTITLED_PROPOSAL.to_string(),
        t => t.to_string(),
    };
    let proposal = state
        .store
        .create_proposal(NewProposal {
            thread_id,
            agent: KERNEL_AGENT_ID.to_string(),
            kind: draft.kind().to_string(),
            title: title.clone(),
            payload: draft.payload_json(),
        })
        .await?;
    publish(&state.hub, HqEvent::ProposalCreated { proposal: &proposal });

    raise(
        state,
        NewNotification::for_ceo(
            NotificationKind::Info,
            "New Proposal Needs Review",
            title,
            json!({ "proposalId": proposal.id, "threadId": thread_id }),
        ),
    )
    .await?;
    audit(
        state,
        NewAuditEntry::new(
            KERNEL_AGENT_ID,
            "proposal.create",
            "proposal",
            proposal.id,
            json!({ "type": proposal.kind }),
        ),
    )
    .await;
    Ok(proposal)
}
