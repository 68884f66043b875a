//! Persisted entities shared by both store backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Logical audience for all operator-facing notifications.
pub const CEO_RECIPIENT: &str = "ceo";

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), " {:?}"),
                        other
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

string_enum!(MessageRole { User => "user", Assistant => "assistant" });

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub agent: Option<String>,
    pub content: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub agent: Option<String>,
    pub content: String,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

string_enum!(ProposalStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

impl ProposalStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A human verdict on a pending proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

string_enum!(Decision {
    Approved => "approved",
    Rejected => "rejected",
});

impl Decision {
    /// Accepts `approved`/`rejected` and the `approve`/`reject` synonyms.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Some(Self::Approved),
            "reject" | "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn status(&self) -> ProposalStatus {
        match self {
            Self::Approved => ProposalStatus::Approved,
            Self::Rejected => ProposalStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub agent: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ProposalStatus,
    pub title: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_by: Option<String>,
}

impl Proposal {
    /// Flips a pending proposal to its terminal status. Returns false, leaving
    /// the proposal untouched, when it was already decided.
    pub fn apply_decision(&mut self, record: &DecisionRecord) -> bool {
        if self.status.is_final() {
            return false;
        }
        self.status = record.decision.status();
        self.decided_at = Some(record.at);
        self.decision_by = Some(record.by.clone());
        if !self.payload.is_object() {
            self.payload = serde_json::json!({});
        }
        if let Some(obj) = self.payload.as_object_mut() {
            obj.insert("decision".to_string(), record.to_json());
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct NewProposal {
    pub thread_id: Uuid,
    pub agent: String,
    pub kind: String,
    pub title: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub by: String,
    /// Kept only for rejections.
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(decision: Decision, by: &str, reason: &str, at: DateTime<Utc>) -> Self {
        let reason = match decision {
            Decision::Rejected => reason.trim().to_string(),
            Decision::Approved => String::new(),
        };
        Self {
            decision,
            by: by.to_string(),
            reason,
            at,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "by": self.by,
            "decision": self.decision,
            "reason": self.reason,
            "at": self.at,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecideOutcome {
    Applied(Proposal),
    AlreadyDecided(Proposal),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

string_enum!(JobStatus {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

impl JobStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub proposal_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: JobStatus,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Merges a status report into the job. Status only moves forward;
    /// `result` keys are merged into `output`; timestamps are set once.
    pub fn apply_update(&mut self, update: &JobUpdate) {
        let was_terminal = self.status.is_terminal();
        if update.status.rank() > self.status.rank() {
            self.status = update.status;
        }
        // A running report that arrives after the job finished is stale.
        if update.status == JobStatus::Running && !was_terminal && self.started_at.is_none() {
            self.started_at = Some(update.at);
        }
        if self.status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(update.at);
        }

        if !self.output.is_object() {
            self.output = serde_json::json!({});
        }
        if let (Some(out), Some(result)) = (self.output.as_object_mut(), update.result.as_ref()) {
            for (k, v) in result {
                out.insert(k.clone(), v.clone());
            }
        }

        if let Some(error) = update.error.as_deref().filter(|e| !e.trim().is_empty()) {
            self.error = Some(error.to_string());
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub proposal_id: Option<Uuid>,
    pub kind: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub result: Option<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Danger,
}

string_enum!(NotificationKind {
    Info => "info",
    Success => "success",
    Warning => "warning",
    Danger => "danger",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

impl NewNotification {
    pub fn for_ceo(
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            recipient: CEO_RECIPIENT.to_string(),
            kind,
            title: title.into(),
            body: body.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationQuery {
    pub recipient: String,
    pub unread_only: bool,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub object_type: String,
    pub object_id: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor: String,
    pub action: String,
    pub object_type: String,
    pub object_id: Option<String>,
    pub meta: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(
        actor: &str,
        action: &str,
        object_type: &str,
        object_id: impl ToString,
        meta: serde_json::Value,
    ) -> Self {
        let actor = actor.trim();
        Self {
            actor: if actor.is_empty() { "system" } else { actor }.to_string(),
            action: action.to_string(),
            object_type: object_type.to_string(),
            object_id: Some(object_id.to_string()),
            meta,
        }
    }
}
