//! Structured proposal extraction.
//!
//! The model is asked for one JSON object. Its reply is cleaned (code fences,
//! surrounding prose), parsed into [`ProposalDraft`] and checked against a
//! [`ProposalSchema`]. A bad reply earns exactly one repair request; after
//! that a deterministic local proposal is built from the final answer.

use super::DebateSettings;
use crate::agents;
use crate::config::ProposalConfig;
use hq_llm::{ResponseRequest, ResponsesApi, truncate_chars, with_timeout};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

const FALLBACK_SUMMARY_CHARS: usize = 600;
const REPAIR_SOURCE_CHARS: usize = 6000;

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").ok());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProposalDraft {
    Plan(PlanDraft),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub title: String,
    pub payload: PlanPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPayload {
    pub summary: String,
    pub steps: Vec<DayStep>,
    pub kpis: Vec<String>,
    #[serde(rename = "ownerMap", alias = "owner_map")]
    pub owner_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayStep {
    /// Renumbered after parsing, so any model-supplied label is accepted.
    #[serde(default, deserialize_with = "lenient_day")]
    pub day: u32,
    pub title: String,
    pub tasks: Vec<String>,
}

fn lenient_day<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        serde_json::Value::String(s) => s
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0),
        _ => 0,
    })
}

impl ProposalDraft {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plan(_) => "plan",
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Plan(plan) => &plan.title,
        }
    }

    pub fn payload_json(&self) -> serde_json::Value {
        match self {
            Self::Plan(plan) => {
                serde_json::to_value(&plan.payload).unwrap_or_else(|_| serde_json::json!({}))
            }
        }
    }
}

/// Where the proposal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalSource {
    Model,
    Repaired,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalSchema {
    pub step_count: usize,
    pub min_tasks_per_step: usize,
    pub max_tasks_per_step: usize,
    pub min_kpis: usize,
    pub max_kpis: usize,
    /// Agent ids that must each own part of the plan.
    pub owners: Vec<String>,
}

impl Default for ProposalSchema {
    fn default() -> Self {
        Self::from_config(&ProposalConfig::default())
    }
}

impl ProposalSchema {
    pub fn from_config(cfg: &ProposalConfig) -> Self {
        Self {
            step_count: cfg.step_count,
            min_tasks_per_step: cfg.min_tasks_per_step,
            max_tasks_per_step: cfg.max_tasks_per_step,
            min_kpis: cfg.min_kpis,
            max_kpis: cfg.max_kpis,
            owners: agents::default_agent_ids(),
        }
    }

    /// Lists every violation; an empty list means the draft is acceptable.
    pub fn violations(&self, draft: &ProposalDraft) -> Vec<String> {
        let ProposalDraft::Plan(plan) = draft;
        let payload = &plan.payload;
        let mut out = Vec::new();

        if plan.title.trim().is_empty() {
            out.push("title is empty".to_string());
        }
        if payload.summary.trim().is_empty() {
            out.push("payload.summary is empty".to_string());
        }
        if payload.steps.len() != self.step_count {
            out.push(format!(
                "payload.steps has {} entries, expected exactly {}",
                payload.steps.len(),
                self.step_count
            ));
        }
        for (i, step) in payload.steps.iter().enumerate() {
            let tasks = step.tasks.iter().filter(|t| !t.trim().is_empty()).count();
            if tasks < self.min_tasks_per_step || tasks > self.max_tasks_per_step {
                out.push(format!(
                    "payload.steps[{i}] has {tasks} tasks, expected {}-{}",
                    self.min_tasks_per_step, self.max_tasks_per_step
                ));
            }
        }
        let kpis = payload.kpis.iter().filter(|k| !k.trim().is_empty()).count();
        if kpis < self.min_kpis || kpis > self.max_kpis {
            out.push(format!(
                "payload.kpis has {kpis} items, expected {}-{}",
                self.min_kpis, self.max_kpis
            ));
        }
        for owner in &self.owners {
            let owned = payload
                .owner_map
                .get(owner)
                .is_some_and(|v| !v.trim().is_empty());
            if !owned {
                out.push(format!("payload.ownerMap is missing \"{owner}\""));
            }
        }
        out
    }

    fn json_shape(&self) -> String {
        let owners = self
            .owners
            .iter()
            .map(|o| format!("\"{o}\":\"...\""))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{{\"type\":\"plan\",\"title\":\"...\",\"payload\":{{\"summary\":\"...\",\
             \"steps\":[{{\"day\":1,\"title\":\"...\",\"tasks\":[\"...\"]}}],\
             \"kpis\":[\"...\"],\"ownerMap\":{{{owners}}}}}}}"
        )
    }

    fn rules(&self) -> String {
        format!(
            "- payload.steps: exactly {} entries, days 1..{}, each with {}-{} tasks.\n\
             - payload.kpis: {}-{} items.\n\
             - payload.ownerMap: one entry for each of: {}.",
            self.step_count,
            self.step_count,
            self.min_tasks_per_step,
            self.max_tasks_per_step,
            self.min_kpis,
            self.max_kpis,
            self.owners.join(", "),
        )
    }
}

fn object_span(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

/// Removes Markdown code fences and any prose around the outermost object.
/// Fenced blocks are tried in order, then the whole reply; the first
/// candidate that parses as a JSON object wins.
pub fn isolate_json(text: &str) -> Option<&str> {
    let text = text.trim();
    let mut candidates: Vec<&str> = CODE_FENCE
        .as_ref()
        .map(|re| {
            re.captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .filter_map(|inner| object_span(inner.as_str()))
                .collect()
        })
        .unwrap_or_default();
    candidates.extend(object_span(text));
    candidates
        .iter()
        .copied()
        .find(|c| serde_json::from_str::<serde_json::Value>(c).is_ok_and(|v| v.is_object()))
        .or_else(|| candidates.first().copied())
}

/// Parses model output into a draft. Days are renumbered 1..N; a missing
/// `type` defaults to `plan`.
pub fn parse_draft(text: &str) -> Result<ProposalDraft, String> {
    let json = isolate_json(text).ok_or_else(|| "no JSON object found".to_string())?;
    let mut value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| "top-level JSON is not an object".to_string())?;
    obj.entry("type")
        .or_insert_with(|| serde_json::Value::String("plan".to_string()));

    let mut draft: ProposalDraft =
        serde_json::from_value(value).map_err(|e| format!("schema mismatch: {e}"))?;
    let ProposalDraft::Plan(plan) = &mut draft;
    for (i, step) in plan.payload.steps.iter_mut().enumerate() {
        step.day = (i + 1) as u32;
    }
    Ok(draft)
}

fn parse_valid(text: &str, schema: &ProposalSchema) -> Result<ProposalDraft, Vec<String>> {
    let draft = parse_draft(text).map_err(|e| vec![e])?;
    let violations = schema.violations(&draft);
    if violations.is_empty() {
        Ok(draft)
    } else {
        Err(violations)
    }
}

async fn request_text(
    llm: &dyn ResponsesApi,
    settings: &DebateSettings,
    system: String,
    user: String,
    label: &str,
) -> String {
    let request = ResponseRequest::new(settings.model.as_str())
        .system(system)
        .user(user)
        .max_output_tokens(settings.proposal_max_output_tokens);
    match with_timeout(llm.create(&request), settings.timeout, label).await {
        Ok(envelope) => envelope.text(),
        Err(e) => {
            tracing::warn!(error = %e, step = label, "proposal call failed");
            String::new()
        }
    }
}

/// Produces a schema-valid proposal. Never fails: model, one repair, then
/// the local fallback.
#[tracing::instrument(level = "info", skip_all)]
pub async fn extract_proposal(
    llm: &dyn ResponsesApi,
    settings: &DebateSettings,
    message: &str,
    final_answer: &str,
) -> (ProposalDraft, ProposalSource) {
    let schema = &settings.schema;
    let system = format!(
        "You convert an approved plan into one JSON object. Output ONLY the JSON object, \
         no prose and no code fences.\nShape: {}\nRules:\n{}",
        schema.json_shape(),
        schema.rules()
    );
    let user = format!("USER MESSAGE:\n{message}\n\nFINAL PLAN:\n{final_answer}");
    let first = request_text(llm, settings, system, user, "LLM timeout (proposal)").await;

    let problems = match parse_valid(&first, schema) {
        Ok(draft) => return (draft, ProposalSource::Model),
        Err(problems) => problems,
    };
    if first.trim().is_empty() {
        tracing::warn!("proposal call returned no text; using fallback proposal");
        return (fallback_proposal(message, final_answer, schema), ProposalSource::Fallback);
    }
    tracing::info!(problems = ?problems, "proposal draft rejected; requesting one repair");

    let repair_system = format!(
        "Fix the JSON below so it is one valid JSON object. Return ONLY corrected JSON.\n\
         Shape: {}\nRules:\n{}",
        schema.json_shape(),
        schema.rules()
    );
    let repair_user = format!(
        "PROBLEMS:\n- {}\n\nPREVIOUS OUTPUT:\n{}",
        problems.join("\n- "),
        truncate_chars(&first, REPAIR_SOURCE_CHARS)
    );
    let repaired = request_text(
        llm,
        settings,
        repair_system,
        repair_user,
        "LLM timeout (proposal repair)",
    )
    .await;

    match parse_valid(&repaired, schema) {
        Ok(draft) => (draft, ProposalSource::Repaired),
        Err(problems) => {
            tracing::warn!(problems = ?problems, "proposal repair failed; using fallback proposal");
            (fallback_proposal(message, final_answer, schema), ProposalSource::Fallback)
        }
    }
}

const DAY_THEMES: [(&str, [&str; 3]); 7] = [
    (
        "Goals and baseline",
        ["Confirm the goal and target audience", "Record baseline numbers", "Agree on owners"],
    ),
    (
        "Offer and messaging",
        ["Write the core offer", "Draft the main call to action", "Prepare message templates"],
    ),
    (
        "Content production",
        ["Produce the first content batch", "Schedule posts", "Prepare story and reel hooks"],
    ),
    (
        "Sales flow",
        ["Set up the lead capture flow", "Script first replies", "Define follow-up timing"],
    ),
    (
        "Launch",
        ["Publish the campaign", "Answer incoming leads", "Log every conversation"],
    ),
    (
        "Measure and adjust",
        ["Review KPI dashboard", "Fix the weakest funnel step", "Test one new variant"],
    ),
    (
        "Review and next week",
        ["Summarise results", "Decide what to keep or drop", "Plan next week"],
    ),
];

const EXTRA_TASKS: [&str; 3] = [
    "Share a progress update",
    "Capture open questions",
    "Note blockers for the owner",
];

const FALLBACK_KPIS: [&str; 10] = [
    "Leads captured per day",
    "Lead-to-customer conversion rate",
    "Revenue from the campaign",
    "Content reach and engagement rate",
    "Average first-response time",
    "Cost per acquired customer",
    "Repeat purchase rate",
    "Follow-up completion rate",
    "Cart or checkout abandonment rate",
    "Customer satisfaction score",
];
const FALLBACK_KPI_TARGET: usize = 6;

fn fallback_owner(agent_id: &str) -> &'static str {
    match agent_id {
        "orion" => "Strategy, priorities and KPI targets",
        "nova" => "Content, offer copy and posting plan",
        "atlas" => "Sales flow, scripts and follow-ups",
        "echo" => "Tracking, reporting and experiments",
        _ => "Supporting tasks",
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic proposal built from the final answer. Always satisfies
/// `schema`.
pub fn fallback_proposal(message: &str, final_answer: &str, schema: &ProposalSchema) -> ProposalDraft {
    let mut summary = truncate_chars(&collapse_whitespace(final_answer), FALLBACK_SUMMARY_CHARS);
    if summary.is_empty() {
        summary = "Plan derived from the agent debate.".to_string();
    }
    let topic = truncate_chars(&collapse_whitespace(message), 60);
    let title = if topic.is_empty() {
        format!("{}-day plan", schema.step_count)
    } else {
        format!("{}-day plan: {topic}", schema.step_count)
    };

    let task_count = 3usize.clamp(schema.min_tasks_per_step, schema.max_tasks_per_step);
    let steps = (0..schema.step_count)
        .map(|i| {
            let (theme, base) = DAY_THEMES[i % DAY_THEMES.len()];
            let tasks = base
                .iter()
                .chain(EXTRA_TASKS.iter())
                .map(|t| t.to_string())
                .chain((1..).map(|n| format!("Follow-up task {n}")))
                .take(task_count)
                .collect();
            DayStep {
                day: (i + 1) as u32,
                title: theme.to_string(),
                tasks,
            }
        })
        .collect();

    let kpi_count = FALLBACK_KPI_TARGET.clamp(schema.min_kpis, schema.max_kpis);
    let kpis = FALLBACK_KPIS
        .iter()
        .map(|k| k.to_string())
        .chain((1..).map(|n| format!("Custom KPI {n}")))
        .take(kpi_count)
        .collect();

    let owner_map = schema
        .owners
        .iter()
        .map(|o| (o.clone(), fallback_owner(o).to_string()))
        .collect();

    ProposalDraft::Plan(PlanDraft {
        title,
        payload: PlanPayload {
            summary,
            steps,
            kpis,
            owner_map,
        },
    })
}
