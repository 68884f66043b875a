//! I/O adapters for AI HQ.
//!
//! `EventHub` fans server events out to WebSocket subscribers;
//! `WebhookNotifier` posts decision events to the external workflow system.

mod event_hub;
mod webhook;

pub use event_hub::{EventHub, HELLO_EVENT_TYPE};
pub use webhook::{NotifyOutcome, WEBHOOK_TOKEN_HEADER, WebhookNotifier};
