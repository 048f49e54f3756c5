//! Message types for the widget conversation.
//!
//! A conversation is an ordered sequence of [`ChatMessage`]s. Agent
//! messages may carry one [`PendingAction`] — a proposed host-state
//! mutation that waits for user confirmation and host execution.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

use crate::actions::plan::Plan;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifies one message. Assigned at creation, never reused.
    MessageId
);
id_type!(
    /// Correlates an action proposal with its confirmation and the host's
    /// command result.
    RequestId
);
id_type!(
    /// Identifies an archived conversation.
    SessionId
);

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

/// The kind of host-state mutation an action proposes, with exactly the
/// payload that kind needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ActionKind {
    /// Apply a multi-criterion selection plan to the audience builder.
    ApplyPlan(Plan),
    /// Select specific values inside one folder.
    #[serde(rename_all = "camelCase")]
    SelectFolderValues {
        folder_id: String,
        value_ids: Vec<String>,
    },
    /// Expand one folder in the builder tree.
    #[serde(rename_all = "camelCase")]
    OpenFolder { folder_id: String },
}

/// Lifecycle of a proposed action.
///
/// Transitions are monotonic: `Pending -> {Confirmed, Rejected}` and
/// `Confirmed -> {Applied, Error}`. Terminal states are never re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Confirmed,
    Rejected,
    Applied,
    Error,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Applied | Self::Error)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Rejected)
                | (Self::Confirmed, Self::Applied)
                | (Self::Confirmed, Self::Error)
        )
    }
}

/// A proposed host-state mutation attached to an agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub request_id: RequestId,
    pub label: String,
    pub description: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Unix epoch milliseconds; used for ordering and display only.
    pub timestamp: i64,
    /// True while the owning agent turn is still receiving chunks.
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PendingAction>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
            streaming: false,
            action: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::System,
            content: content.into(),
            timestamp: now_millis(),
            streaming: false,
            action: None,
        }
    }

    /// An agent message that has not received its first chunk yet.
    pub fn agent_streaming(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Agent,
            content: String::new(),
            timestamp: now_millis(),
            streaming: true,
            action: None,
        }
    }
}

/// An archived conversation, distinct from the active one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    pub preview: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Truncate to `max` characters, appending `...` when anything was cut.
pub(crate) fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(max).collect();
        truncated.push_str("...");
        truncated
    }
}
