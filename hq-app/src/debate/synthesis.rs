use super::proposal::{ProposalDraft, ProposalSource, extract_proposal};
use super::{AgentNote, DebateMode, DebateSettings, FAILURE_PREFIX};
use crate::agents::KERNEL_AGENT_ID;
use hq_llm::{ResponseRequest, ResponsesApi, with_timeout};

const SYNTHESIS_SYSTEM: &str = "You are the AI HQ kernel. Merge the agents' contributions into one final answer.\n\n\
RULES:\n\
- Be short and concrete.\n\
- Format:\n\
  1) Final Plan (bullet points)\n\
  2) KPIs (bullet points)\n\
  3) Risks (bullet points)\n\
  4) Next Actions (executable tasks)\n\n\
IMPORTANT:\n\
- You MUST always write text. An empty answer is not allowed.";

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub final_answer: String,
    pub proposal: Option<(ProposalDraft, ProposalSource)>,
}

pub(crate) fn notes_text(notes: &[AgentNote]) -> String {
    notes
        .iter()
        .map(|n| format!("### {}\n{}", n.agent_id, n.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Local synthesis from the raw notes. Empty when no agent produced text.
pub fn fallback_synthesis(notes: &[AgentNote]) -> String {
    let blocks: Vec<String> = notes
        .iter()
        .filter(|n| !n.text.trim().is_empty())
        .map(|n| format!("### {}\n{}", n.agent_id, n.text.trim()))
        .collect();
    if blocks.is_empty() {
        return String::new();
    }
    format!(
        "Final Plan (fallback)\n\n{}\n\n\
         KPIs:\n- (fallback: derive from the agent notes above)\n\n\
         Risks:\n- (fallback)\n\n\
         Next Actions:\n- (fallback)",
        blocks.join("\n\n")
    )
}

#[tracing::instrument(level = "info", skip_all, fields(mode = %mode, notes = notes.len()))]
pub async fn synthesize_final(
    llm: &dyn ResponsesApi,
    settings: &DebateSettings,
    message: &str,
    notes: &[AgentNote],
    mode: DebateMode,
) -> Synthesis {
    let notes_block = notes_text(notes);
    let user = format!(
        "MODE: {mode}\nUSER MESSAGE:\n{message}\n\nAGENT NOTES:\n{}",
        if notes_block.is_empty() {
            "(no agent notes)"
        } else {
            &notes_block
        }
    );
    let request = ResponseRequest::new(settings.model.as_str())
        .system(SYNTHESIS_SYSTEM)
        .user(user)
        .max_output_tokens(settings.synthesis_max_output_tokens);

    let final_answer = match with_timeout(
        llm.create(&request),
        settings.timeout,
        "LLM timeout (synthesis)",
    )
    .await
    {
        Ok(envelope) => {
            let text = envelope.text();
            tracing::info!(
                response_status = envelope.status().unwrap_or("unknown"),
                response_id = envelope.id().unwrap_or("none"),
                len = text.chars().count(),
                "synthesis answered"
            );
            if text.trim().is_empty() {
                envelope.empty_marker(KERNEL_AGENT_ID, &settings.model)
            } else {
                text.trim().to_string()
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "synthesis failed; using agent notes");
            let local = fallback_synthesis(notes);
            if local.is_empty() {
                format!("{FAILURE_PREFIX}{e}")
            } else {
                local
            }
        }
    };

    let proposal = match mode {
        DebateMode::Proposal => {
            Some(extract_proposal(llm, settings, message, &final_answer).await)
        }
        DebateMode::Answer => None,
    };

    Synthesis {
        final_answer,
        proposal,
    }
}
