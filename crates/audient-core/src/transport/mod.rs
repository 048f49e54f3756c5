//! Agent transports: how a turn request becomes a stream of events.
//!
//! The engine is transport-agnostic. [`SseTransport`] streams from a real
//! agent endpoint over server-sent events; [`SimTransport`] fabricates
//! responses locally for demos and tests.

pub mod sim;
pub mod sse;

pub use sim::SimTransport;
pub use sse::SseTransport;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::{ActionKind, Role};
use crate::context::{AudienceState, AuthContext};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Agent error: {0}")]
    Agent(String),
}

/// Events the agent emits over one turn. `Done` and `Error` are terminal;
/// the stream ends after either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    Text { content: String },
    Action { action: ActionProposal },
    Done,
    Error { error: String },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// An action as proposed on the wire. The request id is allocated
/// client-side when the proposal is attached to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProposal {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// One prior message, replayed to the agent for context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// The request for one agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub message: String,
    pub auth: AuthContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_state: Option<AudienceState>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// A channel to the agent. `send` establishes one turn's event stream;
/// `disconnect` tears down any stream currently open.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TurnRequest) -> Result<EventStream, TransportError>;
    fn disconnect(&self);
}
