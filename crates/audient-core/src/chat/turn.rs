//! State machine for the single in-flight agent turn.
//!
//! The machine owns no message data. It tracks which turn is streaming
//! and which transport events are still acceptable for it; the
//! [`SessionStore`](crate::session::SessionStore) applies the actual
//! mutations. Events for an unknown or already-terminal turn id are
//! ignored, never an error: a cancelled transport may deliver late or
//! duplicate events and must not crash the widget.

use thiserror::Error;
use tracing::debug;

use super::message::{ActionStatus, MessageId};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("An agent turn is already in flight")]
    TurnInFlight,
    #[error("Invalid action status transition: {from} -> {to}")]
    InvalidActionTransition { from: ActionStatus, to: ActionStatus },
}

/// Phases of one streaming agent turn. A phase is "settled" when no
/// turn is in flight (Idle, Done, Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Starting,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl TurnPhase {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Done | Self::Failed)
    }
}

#[derive(Debug)]
pub struct TurnStateMachine {
    phase: TurnPhase,
    active_turn: Option<MessageId>,
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::Idle,
            active_turn: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn active_turn(&self) -> Option<MessageId> {
        self.active_turn
    }

    pub fn is_streaming(&self) -> bool {
        !self.phase.is_settled()
    }

    /// Begin a new agent turn, allocating its message id.
    ///
    /// Only valid when no turn is in flight; the caller (UI) is expected
    /// to disable sending while a turn streams.
    pub fn start(&mut self) -> Result<MessageId, TurnError> {
        if !self.phase.is_settled() {
            return Err(TurnError::TurnInFlight);
        }
        let id = MessageId::new();
        self.phase = TurnPhase::Starting;
        self.active_turn = Some(id);
        self.phase = TurnPhase::Streaming;
        Ok(id)
    }

    /// Whether a text chunk for `turn_id` should be applied.
    pub fn accept_chunk(&self, turn_id: MessageId) -> bool {
        if self.phase == TurnPhase::Streaming && self.active_turn == Some(turn_id) {
            true
        } else {
            debug!(%turn_id, phase = ?self.phase, "ignoring chunk for inactive turn");
            false
        }
    }

    /// Whether an action proposal for `turn_id` should be attached.
    pub fn accept_action(&self, turn_id: MessageId) -> bool {
        if self.phase == TurnPhase::Streaming && self.active_turn == Some(turn_id) {
            true
        } else {
            debug!(%turn_id, phase = ?self.phase, "ignoring action proposal for inactive turn");
            false
        }
    }

    /// Complete the turn. Returns false for late/duplicate completions.
    pub fn finish(&mut self, turn_id: MessageId) -> bool {
        if self.phase != TurnPhase::Streaming || self.active_turn != Some(turn_id) {
            debug!(%turn_id, phase = ?self.phase, "ignoring completion for inactive turn");
            return false;
        }
        self.phase = TurnPhase::Finalizing;
        self.phase = TurnPhase::Done;
        true
    }

    /// Fail the turn from any non-terminal phase. Partial content stays
    /// with the message; this only settles the machine.
    pub fn fail(&mut self, turn_id: MessageId) -> bool {
        if self.phase.is_settled() || self.active_turn != Some(turn_id) {
            debug!(%turn_id, phase = ?self.phase, "ignoring error for inactive turn");
            return false;
        }
        self.phase = TurnPhase::Failed;
        true
    }
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
