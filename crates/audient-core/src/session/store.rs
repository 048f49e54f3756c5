//! Active conversation state plus the session archive.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chat::message::{now_millis, truncate_with_ellipsis};
use crate::chat::{
    ActionKind, ActionStatus, ChatMessage, ChatSession, MessageId, PendingAction, RequestId, Role,
    SessionId, TurnError, TurnStateMachine,
};
use crate::error::{Error, Result};
use crate::session::persistence::PersistenceBackend;

const TITLE_MAX_CHARS: usize = 50;
const PREVIEW_MAX_CHARS: usize = 80;
const FALLBACK_TITLE: &str = "New conversation";

/// Owns the active message list, the archived sessions, and the turn
/// state machine. One store per widget instance; the engine serializes
/// access, so no interior locking is needed here.
///
/// Persistence is best-effort throughout: a failing backend is logged
/// and the conversation continues in memory.
pub struct SessionStore {
    messages: Vec<ChatMessage>,
    sessions: Vec<ChatSession>,
    active_session_id: Option<SessionId>,
    machine: TurnStateMachine,
    backend: Arc<dyn PersistenceBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            messages: Vec::new(),
            sessions: Vec::new(),
            active_session_id: None,
            machine: TurnStateMachine::new(),
            backend,
        }
    }

    /// Load the archived sessions from the backend. Failures leave the
    /// archive empty.
    pub async fn restore(&mut self) {
        match self.backend.load().await {
            Ok(sessions) => {
                debug!(count = sessions.len(), "restored session archive");
                self.sessions = sessions;
            }
            Err(err) => warn!(error = %err, "failed to load session archive"),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active_session_id
    }

    pub fn is_streaming(&self) -> bool {
        self.machine.is_streaming()
    }

    /// Whether the active conversation holds anything worth archiving.
    /// System-only conversations (greetings, error narration) do not.
    pub fn has_messages(&self) -> bool {
        self.messages.iter().any(|m| m.role != Role::System)
    }

    pub fn add_user_turn(&mut self, content: impl Into<String>) -> MessageId {
        let message = ChatMessage::user(content);
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn add_system_turn(&mut self, content: impl Into<String>) -> MessageId {
        let message = ChatMessage::system(content);
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Start a streaming agent turn, pushing its empty message.
    pub fn start_agent_turn(&mut self) -> Result<MessageId> {
        let id = self.machine.start().map_err(Error::Turn)?;
        self.messages.push(ChatMessage::agent_streaming(id));
        Ok(id)
    }

    /// Append a text chunk to the streaming turn. Chunks for an inactive
    /// turn are dropped.
    pub fn append_chunk(&mut self, turn_id: MessageId, chunk: &str) {
        if !self.machine.accept_chunk(turn_id) {
            return;
        }
        if let Some(message) = self.message_mut(turn_id) {
            message.content.push_str(chunk);
        }
    }

    /// Attach an action proposal to the streaming turn, allocating its
    /// request id. A later proposal on the same turn replaces the earlier
    /// one; only the newest is actionable.
    pub fn attach_action(
        &mut self,
        turn_id: MessageId,
        kind: ActionKind,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Option<RequestId> {
        if !self.machine.accept_action(turn_id) {
            return None;
        }
        let message = self.message_mut(turn_id)?;
        let request_id = RequestId::new();
        message.action = Some(PendingAction {
            kind,
            request_id,
            label: label.into(),
            description: description.into(),
            status: ActionStatus::Pending,
            result_summary: None,
        });
        Some(request_id)
    }

    /// Complete the streaming turn and checkpoint the archive.
    pub async fn finalize_turn(&mut self, turn_id: MessageId) {
        if !self.machine.finish(turn_id) {
            return;
        }
        if let Some(message) = self.message_mut(turn_id) {
            message.streaming = false;
        }
        self.checkpoint().await;
    }

    /// Fail the streaming turn, narrate the error, and checkpoint.
    /// Partial content already streamed stays visible.
    pub async fn fail_turn(&mut self, turn_id: MessageId, error: impl Into<String>) {
        if !self.machine.fail(turn_id) {
            return;
        }
        if let Some(message) = self.message_mut(turn_id) {
            message.streaming = false;
        }
        self.add_system_turn(error);
        self.checkpoint().await;
    }

    pub fn find_action(&self, request_id: RequestId) -> Option<&PendingAction> {
        self.messages
            .iter()
            .filter_map(|m| m.action.as_ref())
            .find(|a| a.request_id == request_id)
    }

    /// Advance an action's status, enforcing the transition table, and
    /// checkpoint. Unknown request ids are an error: the caller decides
    /// whether to surface or ignore.
    pub async fn update_action_status(
        &mut self,
        request_id: RequestId,
        next: ActionStatus,
        result_summary: Option<String>,
    ) -> Result<()> {
        let action = self
            .messages
            .iter_mut()
            .filter_map(|m| m.action.as_mut())
            .find(|a| a.request_id == request_id)
            .ok_or_else(|| Error::NotFound(format!("action request {request_id}")))?;

        if !action.status.can_transition_to(next) {
            return Err(Error::Turn(TurnError::InvalidActionTransition {
                from: action.status,
                to: next,
            }));
        }
        action.status = next;
        if result_summary.is_some() {
            action.result_summary = result_summary;
        }
        self.checkpoint().await;
        Ok(())
    }

    /// Snapshot the active conversation into the archive, replacing the
    /// existing entry for this session or prepending a new one. A
    /// conversation with no user or agent messages is not archived.
    pub fn archive_active(&mut self) {
        if !self.has_messages() {
            return;
        }

        let title = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| truncate_with_ellipsis(&m.content, TITLE_MAX_CHARS))
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        let preview = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role != Role::System)
            .map(|m| truncate_with_ellipsis(&m.content, PREVIEW_MAX_CHARS))
            .unwrap_or_default();
        let created_at = self
            .messages
            .iter()
            .find(|m| m.role != Role::System)
            .map(|m| m.timestamp)
            .unwrap_or_else(now_millis);

        let id = *self.active_session_id.get_or_insert_with(SessionId::new);
        let session = ChatSession {
            id,
            title,
            preview,
            messages: self.messages.clone(),
            created_at,
            updated_at: now_millis(),
        };

        if let Some(existing) = self.sessions.iter_mut().find(|s| s.id == id) {
            *existing = session;
        } else {
            self.sessions.insert(0, session);
        }
    }

    /// Write the archive to the backend. Failures are logged, never
    /// propagated.
    pub async fn save(&self) {
        if let Err(err) = self.backend.save(&self.sessions).await {
            warn!(error = %err, "failed to save session archive");
        }
    }

    async fn checkpoint(&mut self) {
        self.archive_active();
        self.save().await;
    }

    /// Archive the current conversation and start an empty one.
    pub async fn start_new_session(&mut self) -> SessionId {
        self.checkpoint().await;
        self.messages.clear();
        let id = SessionId::new();
        self.active_session_id = Some(id);
        id
    }

    /// Switch to an archived session. The current conversation is
    /// archived first. An unknown id is a no-op.
    pub async fn load_session(&mut self, id: SessionId) {
        self.checkpoint().await;
        let Some(session) = self.sessions.iter().find(|s| s.id == id) else {
            debug!(%id, "load requested for unknown session");
            return;
        };
        self.messages = session.messages.clone();
        self.active_session_id = Some(id);
    }

    /// Remove a session from the archive. Deleting the active session
    /// also clears the current conversation.
    pub async fn delete_session(&mut self, id: SessionId) {
        self.sessions.retain(|s| s.id != id);
        if self.active_session_id == Some(id) {
            self.messages.clear();
            self.active_session_id = None;
        }
        self.save().await;
    }

    fn message_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("messages", &self.messages.len())
            .field("sessions", &self.sessions.len())
            .field("active_session_id", &self.active_session_id)
            .finish_non_exhaustive()
    }
}
