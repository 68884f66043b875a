use super::Store;
use crate::models::{
    AuditEntry, DecideOutcome, DecisionRecord, Job, JobStatus, JobUpdate, Message, NewAuditEntry,
    NewJob, NewMessage, NewNotification, NewProposal, Notification, NotificationQuery, Proposal,
    ProposalStatus, Thread,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Insertion sequence, used to break `created_at` ties when listing.
#[derive(Debug, Clone)]
struct Entry<T> {
    seq: u64,
    value: T,
}

/// In-process store with the same contract as the SQLite backend and no
/// durability. Each map entry is its own check-and-set unit.
#[derive(Default)]
pub struct MemoryStore {
    seq: AtomicU64,
    threads: DashMap<Uuid, Thread>,
    messages: DashMap<Uuid, Vec<Message>>,
    proposals: DashMap<Uuid, Entry<Proposal>>,
    jobs: DashMap<Uuid, Job>,
    notifications: DashMap<Uuid, Entry<Notification>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

fn newest_first<T: Clone>(
    entries: impl Iterator<Item = (DateTime<Utc>, u64, T)>,
    limit: usize,
) -> Vec<T> {
    let mut rows: Vec<_> = entries.collect();
    rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    rows.into_iter().take(limit).map(|(_, _, v)| v).collect()
}

#[async_trait]
impl Store for MemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_thread(&self, id: Option<Uuid>, title: &str) -> Result<Thread> {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let thread = self
            .threads
            .entry(id)
            .or_insert_with(|| Thread {
                id,
                title: title.to_string(),
                created_at: Utc::now(),
            })
            .clone();
        Ok(thread)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let row = Message {
            id: Uuid::new_v4(),
            thread_id: message.thread_id,
            role: message.role,
            agent: message.agent,
            content: message.content,
            meta: message.meta,
            created_at: Utc::now(),
        };
        self.messages
            .entry(row.thread_id)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn list_messages(&self, thread_id: Uuid) -> Result<Vec<Message>> {
        let mut rows = self
            .messages
            .get(&thread_id)
            .map(|m| m.clone())
            .unwrap_or_default();
        // Stable sort keeps append order for equal timestamps.
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn create_proposal(&self, proposal: NewProposal) -> Result<Proposal> {
        let row = Proposal {
            id: Uuid::new_v4(),
            thread_id: proposal.thread_id,
            agent: proposal.agent,
            kind: proposal.kind,
            status: ProposalStatus::Pending,
            title: proposal.title,
            payload: proposal.payload,
            created_at: Utc::now(),
            decided_at: None,
            decision_by: None,
        };
        self.proposals.insert(
            row.id,
            Entry {
                seq: self.next_seq(),
                value: row.clone(),
            },
        );
        Ok(row)
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>> {
        Ok(self.proposals.get(&id).map(|e| e.value.clone()))
    }

    async fn list_proposals(
        &self,
        status: ProposalStatus,
        limit: usize,
    ) -> Result<Vec<Proposal>> {
        Ok(newest_first(
            self.proposals
                .iter()
                .filter(|e| e.value.status == status)
                .map(|e| (e.value.created_at, e.seq, e.value.clone())),
            limit,
        ))
    }

    async fn decide_proposal(&self, id: Uuid, record: &DecisionRecord) -> Result<DecideOutcome> {
        // The shard write lock held by `get_mut` makes check-and-set atomic.
        let Some(mut entry) = self.proposals.get_mut(&id) else {
            return Ok(DecideOutcome::NotFound);
        };
        if entry.value.apply_decision(record) {
            Ok(DecideOutcome::Applied(entry.value.clone()))
        } else {
            Ok(DecideOutcome::AlreadyDecided(entry.value.clone()))
        }
    }

    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let row = Job {
            id: Uuid::new_v4(),
            proposal_id: job.proposal_id,
            kind: job.kind,
            status: JobStatus::Queued,
            input: job.input,
            output: serde_json::json!({}),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.jobs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn update_job(&self, id: Uuid, update: &JobUpdate) -> Result<Option<Job>> {
        let Some(mut job) = self.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.apply_update(update);
        Ok(Some(job.clone()))
    }

    async fn create_notification(&self, notification: NewNotification) -> Result<Notification> {
        let row = Notification {
            id: Uuid::new_v4(),
            recipient: notification.recipient,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            payload: notification.payload,
            read_at: None,
            created_at: Utc::now(),
        };
        self.notifications.insert(
            row.id,
            Entry {
                seq: self.next_seq(),
                value: row.clone(),
            },
        );
        Ok(row)
    }

    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>> {
        Ok(newest_first(
            self.notifications
                .iter()
                .filter(|e| e.value.recipient == query.recipient)
                .filter(|e| !query.unread_only || e.value.read_at.is_none())
                .map(|e| (e.value.created_at, e.seq, e.value.clone())),
            query.limit,
        ))
    }

    async fn mark_notification_read(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let Some(mut entry) = self.notifications.get_mut(&id) else {
            return Ok(None);
        };
        if entry.value.read_at.is_none() {
            entry.value.read_at = Some(at);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let row = AuditEntry {
            id: Uuid::new_v4(),
            actor: entry.actor,
            action: entry.action,
            object_type: entry.object_type,
            object_id: entry.object_id,
            meta: entry.meta,
            created_at: Utc::now(),
        };
        self.audit
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log lock poisoned"))?
            .push(row.clone());
        Ok(row)
    }

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let audit = self
            .audit
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log lock poisoned"))?;
        Ok(audit.iter().rev().take(limit).cloned().collect())
    }
}
