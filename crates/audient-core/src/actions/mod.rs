//! Decomposition of confirmed action plans into atomic UI operations and
//! their sequential execution against the host.

pub mod executor;
pub mod plan;

pub use executor::{ActionDispatcher, UiActionExecutor};
pub use plan::{Plan, PlanCriterion, PlanValue, decompose_plan};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no ui action executor registered")]
    NoExecutor,
}

/// One indivisible step of a decomposed plan. Later steps may depend on
/// the side effects of earlier ones (a folder must be expanded before its
/// values can be selected), so execution order is part of the contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiAction {
    #[serde(rename_all = "camelCase")]
    ExpandFolder { folder_id: String },
    #[serde(rename_all = "camelCase")]
    SelectValues {
        folder_id: String,
        value_ids: Vec<String>,
        /// true = select, false = deselect
        selected: bool,
    },
    #[serde(rename_all = "camelCase")]
    SetDate {
        folder_id: String,
        field_id: String,
        /// ISO dates
        from: String,
        to: String,
    },
    #[serde(rename_all = "camelCase")]
    SetSearch {
        folder_id: String,
        field_id: String,
        query: String,
    },
    #[serde(rename_all = "camelCase")]
    SelectDemographic {
        folder_id: String,
        field_id: String,
        option_ids: Vec<String>,
    },
    ClearAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiActionStatus {
    Success,
    Error,
}

/// Outcome of one atomic operation, as reported by the host executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiActionResult {
    pub action: UiAction,
    pub status: UiActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UiActionResult {
    pub fn success(action: UiAction) -> Self {
        Self {
            action,
            status: UiActionStatus::Success,
            error: None,
        }
    }

    pub fn error(action: UiAction, message: impl Into<String>) -> Self {
        Self {
            action,
            status: UiActionStatus::Error,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UiActionStatus::Success
    }
}
