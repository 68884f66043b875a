//! The agent roster. Prompts are configuration data, not logic.

use serde::Serialize;

pub const DEFAULT_AGENT_ID: &str = "orion";
pub const KERNEL_AGENT_ID: &str = "kernel";

/// Reply used when no API key is configured.
pub const DISABLED_ANSWER: &str = "LLM is disabled: no API key is configured (set OPENAI_API_KEY).";

const GENERIC_DEBATE_ROLE: &str = "General expert.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub role: &'static str,
    /// System prompt for single-agent chat.
    pub chat_system: &'static str,
    /// Role description inside debate prompts.
    pub debate_role: &'static str,
}

pub const ROSTER: [AgentProfile; 4] = [
    AgentProfile {
        id: "orion",
        name: "Orion",
        role: "Strategist",
        chat_system: "You are Orion, a business strategist. Give structured, concise guidance. \
                      If asked for a plan, give numbered steps. End with one clarifying question.",
        debate_role: "Strategist: product strategy, roadmap, KPIs, risks.",
    },
    AgentProfile {
        id: "nova",
        name: "Nova",
        role: "Content & Instagram",
        chat_system: "You are Nova, a social and content specialist. Provide content ideas, hooks, \
                      formats and a posting plan. Be concise. End with one question.",
        debate_role: "Creative: marketing, content, offer, CTA, funnel.",
    },
    AgentProfile {
        id: "atlas",
        name: "Atlas",
        role: "Sales & WhatsApp",
        chat_system: "You are Atlas, a sales and funnel specialist. Provide funnel steps, messaging \
                      and WhatsApp automation. Be concise. End with one question.",
        debate_role: "Sales/Ops: sales flow, CRM, WhatsApp and Instagram processes, scripts.",
    },
    AgentProfile {
        id: "echo",
        name: "Echo",
        role: "Analytics",
        chat_system: "You are Echo, an analytics specialist. Provide KPIs, a tracking plan and \
                      measurement. Be concise. End with one question.",
        debate_role: "Analyst: measurement, data, reporting, experiment design.",
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub role: &'static str,
}

pub fn list_agents() -> Vec<AgentSummary> {
    ROSTER
        .iter()
        .map(|a| AgentSummary {
            id: a.id,
            name: a.name,
            role: a.role,
        })
        .collect()
}

pub fn find(id: &str) -> Option<&'static AgentProfile> {
    let id = id.trim();
    ROSTER.iter().find(|a| a.id.eq_ignore_ascii_case(id))
}

/// Resolves a chat hint to a roster agent, falling back to the default.
pub fn resolve_chat_agent(hint: Option<&str>) -> &'static AgentProfile {
    hint.and_then(find)
        .or_else(|| find(DEFAULT_AGENT_ID))
        .unwrap_or(&ROSTER[0])
}

pub fn default_agent_ids() -> Vec<String> {
    ROSTER.iter().map(|a| a.id.to_string()).collect()
}

pub fn debate_role(agent_id: &str) -> &'static str {
    find(agent_id).map_or(GENERIC_DEBATE_ROLE, |a| a.debate_role)
}
