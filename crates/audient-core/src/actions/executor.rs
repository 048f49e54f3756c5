//! Sequential execution of decomposed operations against the host.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{UiAction, UiActionResult};

/// Host-supplied executor for atomic UI operations.
///
/// The widget awaits each operation's result before starting the next;
/// implementations never see two operations in flight at once.
#[async_trait]
pub trait UiActionExecutor: Send + Sync {
    async fn execute(&self, action: UiAction) -> UiActionResult;
}

/// Runs decomposed operations through the executor, strictly in order.
#[derive(Clone)]
pub struct ActionDispatcher {
    executor: Arc<dyn UiActionExecutor>,
}

impl ActionDispatcher {
    pub fn new(executor: Arc<dyn UiActionExecutor>) -> Self {
        Self { executor }
    }

    /// Execute every operation sequentially, collecting one result per
    /// operation. A failed operation does not abort the rest of the
    /// queue: later steps may still be meaningful, and the aggregate
    /// result reports each outcome.
    pub async fn execute_actions(&self, actions: Vec<UiAction>) -> Vec<UiActionResult> {
        let mut results = Vec::with_capacity(actions.len());

        for action in actions {
            debug!(?action, "executing ui action");
            let result = self.executor.execute(action).await;
            if !result.is_success() {
                warn!(
                    action = ?result.action,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "ui action failed"
                );
            }
            results.push(result);
        }

        results
    }

    /// One-line summary of an aggregate result, for the action card.
    pub fn summarize(results: &[UiActionResult]) -> String {
        let total = results.len();
        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed == 0 {
            format!("{total} operations applied")
        } else {
            format!("{} of {total} operations applied, {failed} failed", total - failed)
        }
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher").finish_non_exhaustive()
    }
}
