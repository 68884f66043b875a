//! CEO notifications and the audit trail.

use crate::error::{HqError, HqResult};
use crate::events::{HqEvent, publish};
use crate::models::{
    CEO_RECIPIENT, NewAuditEntry, NewNotification, Notification, NotificationQuery,
};
use crate::server::HqState;
use crate::store::clamp_notification_limit;
use chrono::Utc;
use uuid::Uuid;

/// Stores a notification and announces it on the event hub.
pub async fn raise(state: &HqState, notification: NewNotification) -> HqResult<Notification> {
    let created = state.store.create_notification(notification).await?;
    publish(
        &state.hub,
        HqEvent::NotificationCreated {
            notification: &created,
        },
    );
    Ok(created)
}

/// Appends an audit entry. A failed append is logged and otherwise ignored.
pub async fn audit(state: &HqState, entry: NewAuditEntry) {
    let action = entry.action.clone();
    if let Err(e) = state.store.append_audit(entry).await {
        tracing::warn!(error = %e, action = %action, "audit append failed");
    }
}

pub fn query_from_params(
    recipient: Option<&str>,
    unread: Option<&str>,
    limit: Option<usize>,
) -> NotificationQuery {
    let recipient = recipient
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(CEO_RECIPIENT);
    NotificationQuery {
        recipient: recipient.to_string(),
        unread_only: matches!(unread.map(str::trim), Some("1" | "true")),
        limit: clamp_notification_limit(limit),
    }
}

#[tracing::instrument(level = "info", skip(state))]
pub async fn mark_read(state: &HqState, raw_id: &str) -> HqResult<Notification> {
    let raw_id = raw_id.trim();
    if raw_id.is_empty() {
        return Err(HqError::invalid("notification id required"));
    }
    let id = Uuid::parse_str(raw_id).map_err(|_| HqError::not_found("not found"))?;
    let notification = state
        .store
        .mark_notification_read(id, Utc::now())
        .await?
        .ok_or_else(|| HqError::not_found("not found"))?;

    publish(
        &state.hub,
        HqEvent::NotificationRead {
            notification: &notification,
        },
    );
    audit(
        state,
        NewAuditEntry::new(
            CEO_RECIPIENT,
            "notification.read",
            "notification",
            notification.id,
            serde_json::json!({}),
        ),
    )
    .await;
    Ok(notification)
}
