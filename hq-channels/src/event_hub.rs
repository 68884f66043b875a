use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const HELLO_EVENT_TYPE: &str = "hello";

const DEFAULT_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const POLICY_VIOLATION: u16 = 1008;

#[derive(Clone)]
struct HubState {
    tx: broadcast::Sender<Arc<str>>,
    auth_token: Option<String>,
    connections: Arc<DashMap<String, DateTime<Utc>>>,
}

/// Fire-and-forget fan-out of JSON events to every connected `/ws` subscriber.
#[derive(Clone)]
pub struct EventHub {
    state: HubState,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            state: HubState {
                tx,
                auth_token: None,
                connections: Arc::new(DashMap::new()),
            },
        }
    }

    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.state.auth_token = auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);
        self
    }

    /// Serializes `event` and hands it to every live subscriber. Returns how
    /// many subscribers it reached; zero is not an error.
    pub fn broadcast<T: Serialize>(&self, event: &T) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "event hub dropped unserializable event");
                return 0;
            }
        };
        match self.state.tx.send(Arc::from(payload)) {
            Ok(n) => n,
            Err(_) => {
                tracing::debug!("event hub broadcast with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.state.tx.subscribe()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    fn token_accepted(&self, provided: Option<&str>) -> bool {
        match self.state.auth_token.as_deref() {
            None => true,
            Some(expected) => provided.map(str::trim) == Some(expected),
        }
    }

    /// Router that serves the subscriber WebSocket at `/ws`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route("/ws", get(ws_upgrade)).with_state(self)
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

async fn ws_upgrade(
    State(hub): State<Arc<EventHub>>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    let authorized = hub.token_accepted(query.token.as_deref());
    upgrade.on_upgrade(move |socket| async move {
        if authorized {
            handle_socket(hub, socket).await;
        } else {
            reject_socket(socket).await;
        }
    })
}

async fn reject_socket(mut socket: WebSocket) {
    tracing::warn!("event hub rejected subscriber with missing or invalid token");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: POLICY_VIOLATION,
            reason: "unauthorized".into(),
        })))
        .await;
}

#[tracing::instrument(level = "info", skip_all)]
async fn handle_socket(hub: Arc<EventHub>, socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut events = hub.subscribe();

    let hello = serde_json::json!({
        "type": HELLO_EVENT_TYPE,
        "ts": Utc::now().timestamp_millis(),
    });
    if ws_sender
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        return;
    }
    hub.state
        .connections
        .insert(connection_id.clone(), Utc::now());
    tracing::info!(
        connection_id = %connection_id,
        subscribers = hub.connection_count(),
        "event hub subscriber connected"
    );

    let connection_id_out = connection_id.clone();
    let outbound_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(payload) => {
                        if ws_sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(connection_id = %connection_id_out, skipped, "event hub subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    outbound_task.abort();
    hub.state.connections.remove(&connection_id);
    tracing::info!(connection_id = %connection_id, "event hub subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::EventHub;
    use serde_json::json;

    #[test]
    fn broadcast_without_subscribers_reaches_nobody() {
        let hub = EventHub::new();
        assert_eq!(hub.broadcast(&json!({ "type": "job.updated" })), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_serialized_events() {
        let hub = EventHub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        let reached = hub.broadcast(&json!({ "type": "proposal.created", "proposal": { "id": "p1" } }));
        assert_eq!(reached, 2);

        for rx in [&mut rx1, &mut rx2] {
            let payload = rx.recv().await.expect("event delivered");
            let v: serde_json::Value = serde_json::from_str(&payload).expect("json payload");
            assert_eq!(v["type"], "proposal.created");
            assert_eq!(v["proposal"]["id"], "p1");
        }
    }

    #[test]
    fn token_check_only_applies_when_configured() {
        let open = EventHub::new().with_auth_token(Some("  ".to_string()));
        assert!(open.token_accepted(None));

        let guarded = EventHub::new().with_auth_token(Some("secret".to_string()));
        assert!(!guarded.token_accepted(None));
        assert!(!guarded.token_accepted(Some("wrong")));
        assert!(guarded.token_accepted(Some("secret")));
    }
}
