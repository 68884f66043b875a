//! Multi-agent debate kernel.
//!
//! A debate fans the user message out to every agent for a fixed number of
//! rounds (bounded concurrency inside a round, rounds strictly sequential),
//! then merges the notes into one answer and, in proposal mode, a structured
//! proposal.

mod agent;
mod concurrency;
mod proposal;
mod synthesis;
#[cfg(test)]
pub(crate) mod testing;

use agent::ask_agent;
use concurrency::map_limit;
pub use proposal::{ProposalDraft, ProposalSchema, ProposalSource};
pub use synthesis::fallback_synthesis;
use synthesis::{Synthesis, synthesize_final};

use crate::agents::{self, DISABLED_ANSWER};
use crate::config::HqConfig;
use hq_llm::ResponsesApi;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of the note recorded for an agent call that errored or timed out.
pub const FAILURE_PREFIX: &str = "⚠️ failed: ";

pub const ENGINE_VERSION: &str = concat!("aihq-debate/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_ROUNDS: u32 = 2;
pub const MAX_ROUNDS: u32 = 3;

#[derive(Debug, Clone)]
pub struct DebateSettings {
    pub model: String,
    pub agent_max_output_tokens: u32,
    pub synthesis_max_output_tokens: u32,
    pub proposal_max_output_tokens: u32,
    pub timeout: Duration,
    pub concurrency: usize,
    pub schema: ProposalSchema,
}

impl DebateSettings {
    pub fn from_config(cfg: &HqConfig) -> Self {
        Self {
            model: cfg.llm.debate_model().to_string(),
            agent_max_output_tokens: cfg.llm.agent_max_output_tokens,
            synthesis_max_output_tokens: cfg.llm.synthesis_max_output_tokens,
            proposal_max_output_tokens: cfg.llm.proposal_max_output_tokens,
            timeout: cfg.llm.timeout(),
            concurrency: cfg.llm.clamped_concurrency(),
            schema: ProposalSchema::from_config(&cfg.proposal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateMode {
    Answer,
    #[default]
    Proposal,
}

impl DebateMode {
    /// Anything other than `answer` means proposal mode.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("answer") => Self::Answer,
            _ => Self::Proposal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Proposal => "proposal",
        }
    }
}

impl fmt::Display for DebateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNote {
    pub agent_id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct DebateRequest {
    pub message: String,
    pub agents: Vec<String>,
    pub rounds: u32,
    pub mode: DebateMode,
}

impl DebateRequest {
    /// Trims agent ids, drops blanks (an empty list means the default
    /// roster) and clamps rounds to 1..=3 (absent means 2).
    pub fn new(
        message: impl Into<String>,
        agents: Option<Vec<String>>,
        rounds: Option<i64>,
        mode: DebateMode,
    ) -> Self {
        let mut agents: Vec<String> = agents
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if agents.is_empty() {
            agents = agents::default_agent_ids();
        }
        let rounds = match rounds {
            None => DEFAULT_ROUNDS,
            Some(n) => n.clamp(1, i64::from(MAX_ROUNDS)) as u32,
        };
        Self {
            message: message.into(),
            agents,
            rounds,
            mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebateOutcome {
    pub final_answer: String,
    pub agent_notes: Vec<AgentNote>,
    pub proposal: Option<(ProposalDraft, ProposalSource)>,
}

/// `[agentId] text` blocks of every note so far.
fn notes_so_far(notes: &[AgentNote]) -> String {
    notes
        .iter()
        .map(|n| format!("[{}] {}", n.agent_id, n.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Clone)]
pub struct DebateEngine {
    llm: Option<Arc<dyn ResponsesApi>>,
    settings: DebateSettings,
}

impl DebateEngine {
    pub fn new(llm: Option<Arc<dyn ResponsesApi>>, settings: DebateSettings) -> Self {
        Self { llm, settings }
    }

    pub fn is_enabled(&self) -> bool {
        self.llm.is_some()
    }

    pub fn settings(&self) -> &DebateSettings {
        &self.settings
    }

    pub fn llm(&self) -> Option<&Arc<dyn ResponsesApi>> {
        self.llm.as_ref()
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(mode = %request.mode, rounds = request.rounds, agents = request.agents.len())
    )]
    pub async fn run(&self, request: &DebateRequest) -> DebateOutcome {
        let Some(llm) = self.llm.as_deref() else {
            tracing::warn!("debate requested without an LLM key; returning disabled answer");
            return DebateOutcome {
                final_answer: DISABLED_ANSWER.to_string(),
                agent_notes: agents::default_agent_ids()
                    .into_iter()
                    .map(|agent_id| AgentNote {
                        agent_id,
                        text: String::new(),
                    })
                    .collect(),
                proposal: None,
            };
        };

        tracing::info!(
            engine = ENGINE_VERSION,
            agents = ?request.agents,
            concurrency = self.settings.concurrency,
            "debate started"
        );

        let mut notes: Vec<AgentNote> = Vec::with_capacity(request.agents.len() * request.rounds as usize);
        for round in 1..=request.rounds {
            let context = notes_so_far(&notes);
            let round_notes = map_limit(
                request.agents.clone(),
                self.settings.concurrency,
                |agent_id, _| {
                    let context = context.as_str();
                    async move {
                        let text = ask_agent(
                            llm,
                            &self.settings,
                            &agent_id,
                            &request.message,
                            round,
                            context,
                        )
                        .await;
                        AgentNote { agent_id, text }
                    }
                },
            )
            .await;
            tracing::debug!(round, notes = round_notes.len(), "debate round finished");
            notes.extend(round_notes);
        }

        let Synthesis {
            final_answer,
            proposal,
        } = synthesize_final(llm, &self.settings, &request.message, &notes, request.mode).await;

        tracing::info!(
            synthesis_len = final_answer.chars().count(),
            has_proposal = proposal.is_some(),
            proposal_source = ?proposal.as_ref().map(|(_, source)| *source),
            agent_lens = ?notes.iter().map(|n| (n.agent_id.as_str(), n.text.chars().count())).collect::<Vec<_>>(),
            "debate finished"
        );

        DebateOutcome {
            final_answer,
            agent_notes: notes,
            proposal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedLlm, Step, settings, valid_proposal_json};
    use super::*;

    fn engine(llm: ScriptedLlm) -> (DebateEngine, Arc<ScriptedLlm>) {
        let llm = Arc::new(llm);
        let engine = DebateEngine::new(Some(llm.clone() as Arc<dyn ResponsesApi>), settings());
        (engine, llm)
    }

    fn is_agent_call(content: &str) -> bool {
        content.starts_with("You are agent \"")
    }

    #[test]
    fn request_normalises_agents_and_rounds() {
        let req = DebateRequest::new(
            "m",
            Some(vec![" orion ".into(), "".into(), "legal".into()]),
            Some(9),
            DebateMode::parse(Some("bogus")),
        );
        assert_eq!(req.agents, ["orion", "legal"]);
        assert_eq!(req.rounds, 3);
        assert_eq!(req.mode, DebateMode::Proposal);

        let req = DebateRequest::new("m", Some(vec!["  ".into()]), None, DebateMode::parse(Some("ANSWER")));
        assert_eq!(req.agents.len(), 4);
        assert_eq!(req.rounds, 2);
        assert_eq!(req.mode, DebateMode::Answer);
        assert_eq!(DebateRequest::new("m", None, Some(-4), DebateMode::Answer).rounds, 1);
    }

    #[test]
    fn zero_rounds_clamps_up_to_one() {
        let req = DebateRequest::new("m", None, Some(0), DebateMode::Proposal);
        assert_eq!(req.rounds, 1);
    }

    #[tokio::test]
    async fn disabled_engine_makes_no_calls() {
        let engine = DebateEngine::new(None, settings());
        let out = engine
            .run(&DebateRequest::new("m", None, Some(1), DebateMode::Proposal))
            .await;
        assert_eq!(out.final_answer, DISABLED_ANSWER);
        assert_eq!(out.agent_notes.len(), 4);
        assert!(out.agent_notes.iter().all(|n| n.text.is_empty()));
        assert!(out.proposal.is_none());
    }

    #[tokio::test]
    async fn one_round_collects_a_note_per_agent_in_order() {
        let (engine, llm) = engine(ScriptedLlm::routed(|req| {
            let system = &req.input[0].content;
            if is_agent_call(system) {
                let id = system.split('"').nth(1).unwrap_or_default().to_string();
                Step::delayed(&format!("notes from {id}"), std::time::Duration::from_millis(5))
            } else {
                Step::text("Final Plan\n- go")
            }
        }));
        let out = engine
            .run(&DebateRequest::new("launch plan", None, Some(1), DebateMode::Answer))
            .await;
        let ids: Vec<_> = out.agent_notes.iter().map(|n| n.agent_id.as_str()).collect();
        assert_eq!(ids, ["orion", "nova", "atlas", "echo"]);
        assert_eq!(out.agent_notes[2].text, "notes from atlas");
        assert_eq!(out.final_answer, "Final Plan\n- go");
        assert_eq!(llm.requests().len(), 5);
    }

    #[tokio::test]
    async fn later_rounds_see_prior_notes() {
        let (engine, llm) = engine(ScriptedLlm::routed(|req| {
            let system = &req.input[0].content;
            if is_agent_call(system) {
                let id = system.split('"').nth(1).unwrap_or_default().to_string();
                Step::text(format!("idea-{id}"))
            } else {
                Step::text("merged")
            }
        }));
        let out = engine
            .run(&DebateRequest::new(
                "m",
                Some(vec!["orion".into(), "echo".into()]),
                Some(2),
                DebateMode::Answer,
            ))
            .await;
        assert_eq!(out.agent_notes.len(), 4);

        let agent_calls: Vec<_> = llm
            .requests()
            .into_iter()
            .filter(|r| is_agent_call(&r.input[0].content))
            .collect();
        assert_eq!(agent_calls.len(), 4);
        let round_two: Vec<_> = agent_calls.iter().filter(|r| r.input[1].content.contains("Round 2.")).collect();
        assert_eq!(round_two.len(), 2);
        for req in round_two {
            assert!(req.input[1].content.contains("[orion] idea-orion\n\n[echo] idea-echo"));
        }
    }

    #[tokio::test]
    async fn failing_agent_does_not_sink_the_debate() {
        let (engine, _) = engine(ScriptedLlm::routed(|req| {
            let system = &req.input[0].content;
            if system.contains("\"nova\"") {
                Step::error("http error: 500")
            } else if is_agent_call(system) {
                Step::text("fine")
            } else {
                Step::text("merged")
            }
        }));
        let out = engine
            .run(&DebateRequest::new("m", None, Some(1), DebateMode::Answer))
            .await;
        assert!(out.agent_notes[1].text.starts_with(FAILURE_PREFIX));
        assert_eq!(out.agent_notes[0].text, "fine");
    }

    #[tokio::test]
    async fn proposal_mode_always_yields_a_valid_proposal() {
        for proposal_reply in [valid_proposal_json().to_string(), "garbage".to_string()] {
            let reply = proposal_reply.clone();
            let (engine, _) = engine(ScriptedLlm::routed(move |req| {
                let system = &req.input[0].content;
                if is_agent_call(system) {
                    Step::text("- idea")
                } else if system.starts_with("You are the AI HQ kernel") {
                    Step::text("Final Plan\n- go")
                } else {
                    Step::text(reply.clone())
                }
            }));
            let out = engine
                .run(&DebateRequest::new("launch plan", None, Some(1), DebateMode::Proposal))
                .await;
            let (draft, _) = out.proposal.expect("proposal in proposal mode");
            let ProposalDraft::Plan(plan) = &draft;
            assert_eq!(draft.kind(), "plan");
            assert!(!plan.title.is_empty());
            assert_eq!(plan.payload.steps.len(), 7);
            assert!(plan.payload.kpis.len() >= 5);
            assert_eq!(plan.payload.owner_map.len(), 4);
        }
    }
}
