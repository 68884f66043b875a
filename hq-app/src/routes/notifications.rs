use super::{error_response, ok_response};
use crate::error::HqError;
use crate::notifications::{mark_read, query_from_params};
use crate::server::HqState;
use axum::Extension;
use axum::extract::{Path, Query};
use axum::response::Response;
use axum::routing::{get, post};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    recipient: Option<String>,
    unread: Option<String>,
    limit: Option<usize>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(post_read))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_notifications(
    Extension(state): Extension<Arc<HqState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let query = query_from_params(
        query.recipient.as_deref(),
        query.unread.as_deref(),
        query.limit,
    );
    match state.store.list_notifications(&query).await {
        Ok(notifications) => ok_response(
            &state,
            serde_json::json!({
                "recipient": query.recipient,
                "unreadOnly": query.unread_only,
                "notifications": notifications,
            }),
        ),
        Err(e) => error_response(&state, &HqError::Store(e)),
    }
}

#[tracing::instrument(level = "info", skip_all, fields(notification_id = %id))]
async fn post_read(Extension(state): Extension<Arc<HqState>>, Path(id): Path<String>) -> Response {
    match mark_read(&state, &id).await {
        Ok(notification) => ok_response(&state, serde_json::json!({ "notification": notification })),
        Err(e) => error_response(&state, &e),
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{NewNotification, NotificationKind};
    use crate::routes::test_support::call;
    use crate::server::test_state;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn list_and_mark_read() {
        let state = test_state(None);
        for title in ["first", "second"] {
            state
                .store
                .create_notification(NewNotification::for_ceo(
                    NotificationKind::Info,
                    title,
                    title,
                    json!({}),
                ))
                .await
                .expect("notification");
        }

        let (_, body) = call(&state, "GET", "/api/notifications?unread=1&limit=1", None, &[]).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["recipient"], "ceo");
        assert_eq!(body["unreadOnly"], true);
        let listed = body["notifications"].as_array().expect("list");
        assert_eq!(listed.len(), 1);
        let id = listed[0]["id"].as_str().expect("id").to_string();

        let (_, body) = call(&state, "POST", &format!("/api/notifications/{id}/read"), None, &[]).await;
        assert_eq!(body["ok"], true);
        assert!(body["notification"]["read_at"].is_string());

        let (_, body) = call(&state, "GET", "/api/notifications?unread=true", None, &[]).await;
        assert_eq!(body["notifications"].as_array().expect("list").len(), 1);
        let (_, body) = call(&state, "GET", "/api/notifications", None, &[]).await;
        assert_eq!(body["unreadOnly"], false);
        assert_eq!(body["notifications"].as_array().expect("list").len(), 2);
    }

    #[tokio::test]
    async fn unknown_notification_is_not_found() {
        let state = test_state(None);
        for id in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let (_, body) = call(&state, "POST", &format!("/api/notifications/{id}/read"), None, &[]).await;
            assert_eq!(body["ok"], false);
            assert_eq!(body["code"], "not_found");
            assert_eq!(body["error"], "not found");
        }
    }
}
