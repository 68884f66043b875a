//! Server events pushed to `/ws` subscribers.

use crate::models::{Job, Message, Notification, Proposal};
use hq_channels::EventHub;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum HqEvent<'a> {
    #[serde(rename = "thread.message")]
    ThreadMessage {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
        message: &'a Message,
    },
    #[serde(rename = "proposal.created")]
    ProposalCreated { proposal: &'a Proposal },
    #[serde(rename = "proposal.updated")]
    ProposalUpdated { proposal: &'a Proposal },
    #[serde(rename = "notification.created")]
    NotificationCreated { notification: &'a Notification },
    #[serde(rename = "notification.read")]
    NotificationRead { notification: &'a Notification },
    #[serde(rename = "job.updated")]
    JobUpdated { job: &'a Job },
}

impl HqEvent<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ThreadMessage { .. } => "thread.message",
            Self::ProposalCreated { .. } => "proposal.created",
            Self::ProposalUpdated { .. } => "proposal.updated",
            Self::NotificationCreated { .. } => "notification.created",
            Self::NotificationRead { .. } => "notification.read",
            Self::JobUpdated { .. } => "job.updated",
        }
    }
}

/// Best effort; having no subscribers is normal.
pub fn publish(hub: &EventHub, event: HqEvent<'_>) {
    let reached = hub.broadcast(&event);
    tracing::debug!(event = event.kind(), subscribers = reached, "event published");
}
