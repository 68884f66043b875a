//! Generative-text client for AI HQ.
//!
//! Pure HTTP client plus response-envelope helpers; knows nothing about agents
//! or storage.

mod client;
mod error;
mod extract;
mod types;

pub use client::{DEFAULT_BASE_URL, LlmClient, ResponsesApi, truncate_chars, with_timeout};
pub use error::{LlmError, Result};
pub use extract::extract_text;
pub use types::{InputTurn, ResponseEnvelope, ResponseRequest, Role};
