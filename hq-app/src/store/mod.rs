//! Storage for threads, proposals, jobs, notifications and the audit trail.
//!
//! Two backends share one contract: [`SqliteStore`] when a database path is
//! configured and opens cleanly, [`MemoryStore`] otherwise. Both guarantee the
//! pending-to-terminal proposal transition happens at most once per proposal.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::models::{
    AuditEntry, DecideOutcome, DecisionRecord, Job, JobUpdate, Message, NewAuditEntry, NewJob,
    NewMessage, NewNotification, NewProposal, Notification, NotificationQuery, Proposal,
    ProposalStatus, Thread,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_PROPOSAL_LIST_LIMIT: usize = 100;
pub const DEFAULT_NOTIFICATION_LIMIT: usize = 50;
pub const MAX_NOTIFICATION_LIMIT: usize = 200;

#[async_trait]
pub trait Store: Send + Sync {
    /// False for the in-process fallback.
    fn is_persistent(&self) -> bool;

    async fn ping(&self) -> Result<()>;

    /// Returns the thread with `id`, creating it when absent. A `None` id
    /// always creates a new thread.
    async fn ensure_thread(&self, id: Option<Uuid>, title: &str) -> Result<Thread>;
    async fn append_message(&self, message: NewMessage) -> Result<Message>;
    async fn list_messages(&self, thread_id: Uuid) -> Result<Vec<Message>>;

    async fn create_proposal(&self, proposal: NewProposal) -> Result<Proposal>;
    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>>;
    async fn list_proposals(&self, status: ProposalStatus, limit: usize)
    -> Result<Vec<Proposal>>;
    /// Conditional pending-to-terminal flip. Exactly one concurrent caller
    /// observes `Applied`.
    async fn decide_proposal(&self, id: Uuid, record: &DecisionRecord) -> Result<DecideOutcome>;

    async fn create_job(&self, job: NewJob) -> Result<Job>;
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;
    async fn update_job(&self, id: Uuid, update: &JobUpdate) -> Result<Option<Job>>;

    async fn create_notification(&self, notification: NewNotification) -> Result<Notification>;
    async fn list_notifications(&self, query: &NotificationQuery) -> Result<Vec<Notification>>;
    /// Sets `read_at` the first time; later calls return the row unchanged.
    async fn mark_notification_read(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Notification>>;

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry>;
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

pub fn clamp_notification_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_NOTIFICATION_LIMIT)
        .clamp(1, MAX_NOTIFICATION_LIMIT)
}

/// Opens the configured database, degrading to the in-process store when no
/// path is set or the open fails.
pub fn open_store(database_path: Option<&Path>) -> Arc<dyn Store> {
    let Some(path) = database_path else {
        tracing::warn!("no database configured; using in-process store (no durability)");
        return Arc::new(MemoryStore::new());
    };
    match SqliteStore::open(path) {
        Ok(store) => {
            tracing::info!(path = %path.display(), "sqlite store opened");
            Arc::new(store)
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "sqlite store unavailable; falling back to in-process store"
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share; each backend's test module runs
    //! these against its own constructor.

    use super::Store;
    use crate::models::{
        DecideOutcome, Decision, DecisionRecord, JobStatus, JobUpdate, MessageRole, NewJob,
        NewMessage, NewNotification, NewProposal, NotificationKind, NotificationQuery,
        ProposalStatus, CEO_RECIPIENT,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    pub async fn pending_proposal(store: &dyn Store) -> crate::models::Proposal {
        let thread = store.ensure_thread(None, "launch").await.expect("thread");
        store
            .create_proposal(NewProposal {
                thread_id: thread.id,
                agent: "kernel".to_string(),
                kind: "plan".to_string(),
                title: "7-day launch".to_string(),
                payload: json!({ "summary": "sell more" }),
            })
            .await
            .expect("proposal")
    }

    pub async fn threads_and_messages(store: Arc<dyn Store>) {
        let thread = store.ensure_thread(None, "hello").await.expect("thread");
        let again = store
            .ensure_thread(Some(thread.id), "ignored")
            .await
            .expect("thread");
        assert_eq!(again.id, thread.id);
        assert_eq!(again.title, "hello");

        let chosen = Uuid::new_v4();
        let created = store
            .ensure_thread(Some(chosen), "given id")
            .await
            .expect("thread");
        assert_eq!(created.id, chosen);

        for (i, role) in [MessageRole::User, MessageRole::Assistant, MessageRole::User]
            .into_iter()
            .enumerate()
        {
            store
                .append_message(NewMessage {
                    thread_id: thread.id,
                    role,
                    agent: (role == MessageRole::Assistant).then(|| "orion".to_string()),
                    content: format!("m{i}"),
                    meta: json!({ "kind": "chat" }),
                })
                .await
                .expect("message");
        }
        let messages = store.list_messages(thread.id).await.expect("list");
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m0", "m1", "m2"]);
        assert_eq!(messages[1].agent.as_deref(), Some("orion"));
        assert!(store.list_messages(chosen).await.expect("list").is_empty());
    }

    pub async fn decision_is_exactly_once(store: Arc<dyn Store>) {
        let proposal = pending_proposal(store.as_ref()).await;
        let listed = store
            .list_proposals(ProposalStatus::Pending, 100)
            .await
            .expect("list");
        assert!(listed.iter().any(|p| p.id == proposal.id));

        let first = DecisionRecord::new(Decision::Approved, "ceo", "", Utc::now());
        let applied = match store.decide_proposal(proposal.id, &first).await.expect("decide") {
            DecideOutcome::Applied(p) => p,
            other => panic!("expected applied, got {other:?}"),
        };
        assert_eq!(applied.status, ProposalStatus::Approved);
        assert_eq!(applied.decision_by.as_deref(), Some("ceo"));
        assert_eq!(applied.payload["summary"], "sell more");
        assert_eq!(applied.payload["decision"]["decision"], "approved");

        let second = DecisionRecord::new(Decision::Rejected, "cfo", "no", Utc::now());
        match store.decide_proposal(proposal.id, &second).await.expect("decide") {
            DecideOutcome::AlreadyDecided(current) => {
                assert_eq!(current.status, ProposalStatus::Approved);
                assert_eq!(current.decided_at, applied.decided_at);
                assert_eq!(current.decision_by, applied.decision_by);
                assert_eq!(current.payload, applied.payload);
            }
            other => panic!("expected already decided, got {other:?}"),
        }

        assert!(matches!(
            store.decide_proposal(Uuid::new_v4(), &second).await.expect("decide"),
            DecideOutcome::NotFound
        ));
        let approved = store
            .list_proposals(ProposalStatus::Approved, 100)
            .await
            .expect("list");
        assert!(approved.iter().any(|p| p.id == proposal.id));
    }

    pub async fn concurrent_decisions_apply_once(store: Arc<dyn Store>) {
        let proposal = pending_proposal(store.as_ref()).await;
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let record =
                    DecisionRecord::new(Decision::Approved, &format!("user{i}"), "", Utc::now());
                store.decide_proposal(proposal.id, &record).await
            }));
        }
        let mut applied = 0;
        for handle in handles {
            match handle.await.expect("join").expect("decide") {
                DecideOutcome::Applied(_) => applied += 1,
                DecideOutcome::AlreadyDecided(_) => {}
                DecideOutcome::NotFound => panic!("proposal vanished"),
            }
        }
        assert_eq!(applied, 1);
    }

    pub async fn job_updates_merge(store: Arc<dyn Store>) {
        let job = store
            .create_job(NewJob {
                proposal_id: None,
                kind: "plan".to_string(),
                input: json!({ "proposal": { "title": "x" } }),
            })
            .await
            .expect("job");
        assert_eq!(job.status, JobStatus::Queued);

        let running = store
            .update_job(
                job.id,
                &JobUpdate {
                    status: JobStatus::Running,
                    result: json!({ "a": 1 }).as_object().cloned(),
                    error: None,
                    at: Utc::now(),
                },
            )
            .await
            .expect("update")
            .expect("job exists");
        let started_at = running.started_at.expect("started");

        let done = store
            .update_job(
                job.id,
                &JobUpdate {
                    status: JobStatus::Completed,
                    result: json!({ "b": 2 }).as_object().cloned(),
                    error: None,
                    at: Utc::now(),
                },
            )
            .await
            .expect("update")
            .expect("job exists");
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.output, json!({ "a": 1, "b": 2 }));
        assert_eq!(done.started_at, Some(started_at));
        assert!(done.finished_at.is_some());
        assert_eq!(store.get_job(job.id).await.expect("get"), Some(done));

        let missing = store
            .update_job(
                Uuid::new_v4(),
                &JobUpdate {
                    status: JobStatus::Running,
                    result: None,
                    error: None,
                    at: Utc::now(),
                },
            )
            .await
            .expect("update");
        assert!(missing.is_none());
    }

    pub async fn notifications_and_audit(store: Arc<dyn Store>) {
        for i in 0..3 {
            store
                .create_notification(NewNotification::for_ceo(
                    NotificationKind::Info,
                    format!("n{i}"),
                    "body",
                    json!({ "i": i }),
                ))
                .await
                .expect("notification");
        }
        store
            .create_notification(NewNotification {
                recipient: "ops".to_string(),
                kind: NotificationKind::Danger,
                title: "other".to_string(),
                body: String::new(),
                payload: json!({}),
            })
            .await
            .expect("notification");

        let query = NotificationQuery {
            recipient: CEO_RECIPIENT.to_string(),
            unread_only: false,
            limit: 2,
        };
        let page = store.list_notifications(&query).await.expect("list");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].title, "n2");

        let first_read_at = Utc::now();
        let read = store
            .mark_notification_read(page[0].id, first_read_at)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(read.read_at, Some(first_read_at));
        let again = store
            .mark_notification_read(page[0].id, Utc::now())
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(again.read_at, Some(first_read_at));

        let unread = store
            .list_notifications(&NotificationQuery {
                recipient: CEO_RECIPIENT.to_string(),
                unread_only: true,
                limit: 50,
            })
            .await
            .expect("list");
        assert_eq!(unread.len(), 2);
        assert!(unread.iter().all(|n| n.recipient == CEO_RECIPIENT));
        assert!(
            store
                .mark_notification_read(Uuid::new_v4(), Utc::now())
                .await
                .expect("read")
                .is_none()
        );

        store
            .append_audit(crate::models::NewAuditEntry::new(
                "ceo",
                "proposal.decision",
                "proposal",
                "p1",
                json!({ "decision": "approved" }),
            ))
            .await
            .expect("audit");
        let audit = store.list_audit(10).await.expect("audit list");
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "proposal.decision");
        assert_eq!(audit[0].object_id.as_deref(), Some("p1"));
    }
}
