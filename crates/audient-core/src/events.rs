//! The widget's outward event surface and the commands the host sends
//! back. Both sides are serializable so hosts can bridge them across a
//! process or frame boundary.

use serde::{Deserialize, Serialize};

use crate::actions::UiActionStatus;
use crate::chat::{ActionKind, RequestId};
use crate::connection::ConnectionStatus;
use crate::context::AudienceState;

/// An action crossing the host boundary, after the user decided on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub request_id: RequestId,
    pub confirmed: bool,
}

/// Asks the host to lock or unlock its UI while operations are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiLockEvent {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusEvent {
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}

/// Everything the widget tells its host.
///
/// Adjacently tagged: [`ActionEvent`] flattens its [`ActionKind`], whose
/// own tag would collide with an internal one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WidgetEvent {
    /// Emitted once after restore; the host may start pushing state.
    Ready,
    #[serde(rename_all = "camelCase")]
    MessageSent { content: String },
    Action(ActionEvent),
    UiLock(UiLockEvent),
    AgentStatus(AgentStatusEvent),
    Error(ErrorEvent),
}

/// Commands the host sends the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostCommand {
    /// The host finished (or failed) applying a confirmed action.
    #[serde(rename_all = "camelCase")]
    ActionResult {
        request_id: RequestId,
        status: UiActionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audience_count: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A fresh audience snapshot.
    #[serde(rename_all = "camelCase")]
    StateSync { state: AudienceState },
}
