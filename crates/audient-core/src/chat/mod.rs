pub mod message;
pub mod turn;

pub use message::{
    ActionKind, ActionStatus, ChatMessage, ChatSession, MessageId, PendingAction, RequestId, Role,
    SessionId,
};
pub use turn::{TurnError, TurnPhase, TurnStateMachine};
