use super::{DebateSettings, FAILURE_PREFIX};
use crate::agents;
use hq_llm::{ResponseRequest, ResponsesApi, with_timeout};

pub(crate) fn agent_prompt(agent_id: &str, message: &str, round: u32, notes_so_far: &str) -> String {
    let notes = if notes_so_far.trim().is_empty() {
        "(none)"
    } else {
        notes_so_far
    };
    format!(
        "You are an AI HQ agent. Your role: {role}\n\n\
         RULES:\n\
         - No more than 8-12 bullet points.\n\
         - Be concrete and actionable.\n\
         - Skip long explanations.\n\
         - Round {round}.\n\n\
         USER MESSAGE:\n{message}\n\n\
         PRIOR NOTES (if any):\n{notes}\n\n\
         OUTPUT:\n\
         - Your contribution, as bullet points",
        role = agents::debate_role(agent_id),
    )
}

/// Asks one agent for its contribution. Never fails: timeouts and API errors
/// come back as a visible `failed:` marker, empty answers as a diagnostic
/// marker.
#[tracing::instrument(level = "info", skip_all, fields(agent = %agent_id, round))]
pub async fn ask_agent(
    llm: &dyn ResponsesApi,
    settings: &DebateSettings,
    agent_id: &str,
    message: &str,
    round: u32,
    notes_so_far: &str,
) -> String {
    let request = ResponseRequest::new(settings.model.as_str())
        .system(format!(
            "You are agent \"{agent_id}\". Follow the user's rules strictly."
        ))
        .user(agent_prompt(agent_id, message, round, notes_so_far))
        .max_output_tokens(settings.agent_max_output_tokens);

    let label = format!("LLM timeout ({agent_id})");
    match with_timeout(llm.create(&request), settings.timeout, &label).await {
        Ok(envelope) => {
            let text = envelope.text();
            tracing::info!(
                http_status = envelope.http_status,
                response_status = envelope.status().unwrap_or("unknown"),
                response_id = envelope.id().unwrap_or("none"),
                len = text.chars().count(),
                "debate agent answered"
            );
            if text.is_empty() {
                envelope.empty_marker(agent_id, &settings.model)
            } else {
                text
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "debate agent failed");
            format!("{FAILURE_PREFIX}{e}")
        }
    }
}
