//! The widget engine: wires the session store, the reconnection
//! controller, the transport, and the action dispatcher into one
//! host-facing surface.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::actions::{
    ActionDispatcher, ActionError, UiAction, UiActionExecutor, UiActionStatus, decompose_plan,
};
use crate::chat::{
    ActionKind, ActionStatus, ChatMessage, ChatSession, RequestId, Role, SessionId, TurnError,
};
use crate::connection::{ConnectionState, ReconnectConfig, ReconnectController};
use crate::context::{AudienceState, AuthContext, describe_state_diff};
use crate::error::{Error, Result};
use crate::events::{
    ActionEvent, AgentStatusEvent, ErrorEvent, HostCommand, UiLockEvent, WidgetEvent,
};
use crate::session::{MemoryBackend, PersistenceBackend, SessionStore};
use crate::transport::{AgentEvent, HistoryEntry, Transport, TurnRequest};

const GREETING: &str =
    "Hi! I can help you build and refine your audience selection. Ask me anything.";
const APPLYING_REASON: &str = "Applying agent plan...";

/// Builds a [`WidgetEngine`]. A transport and a UI action executor are
/// required; everything else has defaults.
#[derive(Default)]
pub struct EngineBuilder {
    transport: Option<Arc<dyn Transport>>,
    executor: Option<Arc<dyn UiActionExecutor>>,
    backend: Option<Arc<dyn PersistenceBackend>>,
    reconnect: ReconnectConfig,
    auth: AuthContext,
    event_capacity: Option<usize>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn UiActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    pub fn auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Fails fast on a missing transport or executor: an engine that can
    /// neither reach an agent nor apply operations is misconfigured, not
    /// degraded.
    pub fn build(self) -> Result<(WidgetEngine, mpsc::Receiver<WidgetEvent>)> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Configuration("no transport configured".to_string()))?;
        let executor = self.executor.ok_or(Error::Action(ActionError::NoExecutor))?;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let (events, receiver) = mpsc::channel(self.event_capacity.unwrap_or(64));

        let engine = WidgetEngine {
            store: SessionStore::new(backend),
            connection: ReconnectController::new(self.reconnect),
            transport,
            dispatcher: ActionDispatcher::new(executor),
            auth: self.auth,
            audience_state: None,
            events,
        };
        Ok((engine, receiver))
    }
}

/// One widget instance. The host drives it by calling methods and reads
/// back through the [`WidgetEvent`] receiver returned by the builder.
pub struct WidgetEngine {
    store: SessionStore,
    connection: ReconnectController,
    transport: Arc<dyn Transport>,
    dispatcher: ActionDispatcher,
    auth: AuthContext,
    audience_state: Option<AudienceState>,
    events: mpsc::Sender<WidgetEvent>,
}

impl WidgetEngine {
    /// Load the session archive and greet. Emits `Ready` when the widget
    /// is usable; the host should wait for it before pushing state.
    pub async fn restore(&mut self) {
        self.store.restore().await;
        if self.store.messages().is_empty() {
            self.store.add_system_turn(GREETING);
        }
        self.emit(WidgetEvent::AgentStatus(AgentStatusEvent {
            status: self.connection.state().status,
            message: None,
        }));
        self.emit(WidgetEvent::Ready);
    }

    /// Send a user message and drive the resulting agent turn to
    /// completion. Returns once the turn settles; streamed content lands
    /// in [`messages`](Self::messages) as it arrives.
    ///
    /// Connection failures settle the turn with a system narration and
    /// return `Ok`: the conversation survives them. The error return is
    /// reserved for caller mistakes, like sending during a turn.
    pub async fn send_message(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if self.store.is_streaming() {
            return Err(Error::Turn(TurnError::TurnInFlight));
        }

        let history = self.history();
        self.store.add_user_turn(text.clone());
        self.emit(WidgetEvent::MessageSent {
            content: text.clone(),
        });
        let turn = self.store.start_agent_turn()?;

        let request = TurnRequest {
            message: text,
            auth: self.auth.clone(),
            audience_state: self.audience_state.clone(),
            history,
        };
        let transport = Arc::clone(&self.transport);
        let stream = self
            .connection
            .run(move || {
                let transport = Arc::clone(&transport);
                let request = request.clone();
                async move { transport.send(request).await }
            })
            .await;

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "agent turn could not be established");
                let message = err.to_string();
                self.store.fail_turn(turn, message.clone()).await;
                self.emit(WidgetEvent::Error(ErrorEvent {
                    code: "CONNECTION_FAILED".to_string(),
                    message,
                }));
                return Ok(());
            }
        };

        let mut settled = false;
        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::Text { content } => self.store.append_chunk(turn, &content),
                AgentEvent::Action { action } => {
                    self.store
                        .attach_action(turn, action.kind, action.label, action.description);
                }
                AgentEvent::Done => {
                    self.store.finalize_turn(turn).await;
                    settled = true;
                    break;
                }
                AgentEvent::Error { error } => {
                    let message = format!("Agent error: {error}");
                    self.store.fail_turn(turn, message.clone()).await;
                    self.emit(WidgetEvent::Error(ErrorEvent {
                        code: "AGENT_ERROR".to_string(),
                        message,
                    }));
                    settled = true;
                    break;
                }
            }
        }
        if !settled {
            self.store
                .fail_turn(turn, "Agent stream ended unexpectedly.")
                .await;
        }
        Ok(())
    }

    /// Confirm a pending action: lock the host UI, notify the host, and
    /// execute the decomposed operations in order.
    ///
    /// On full success the action stays `Confirmed` until the host
    /// reports its result through
    /// [`handle_command`](Self::handle_command). Partial failure settles
    /// it as `Error` immediately and releases the lock.
    pub async fn confirm_action(&mut self, request_id: RequestId) -> Result<()> {
        let action = self
            .store
            .find_action(request_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("action request {request_id}")))?;
        self.store
            .update_action_status(request_id, ActionStatus::Confirmed, None)
            .await?;

        self.emit(WidgetEvent::UiLock(UiLockEvent {
            locked: true,
            reason: Some(APPLYING_REASON.to_string()),
        }));
        self.emit(WidgetEvent::Action(ActionEvent {
            kind: action.kind.clone(),
            request_id,
            confirmed: true,
        }));

        let operations = decompose_action(&action.kind);
        info!(%request_id, operations = operations.len(), "executing confirmed action");
        let results = self.dispatcher.execute_actions(operations).await;
        let summary = ActionDispatcher::summarize(&results);

        if results.iter().any(|r| !r.is_success()) {
            self.store
                .update_action_status(request_id, ActionStatus::Error, Some(summary.clone()))
                .await?;
            self.store
                .add_system_turn(format!("Some operations could not be applied: {summary}"));
            self.emit(WidgetEvent::UiLock(UiLockEvent {
                locked: false,
                reason: None,
            }));
        }
        Ok(())
    }

    /// Reject a pending action. The proposal card stays in the history,
    /// settled as rejected.
    pub async fn reject_action(&mut self, request_id: RequestId) -> Result<()> {
        let action = self
            .store
            .find_action(request_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("action request {request_id}")))?;
        self.store
            .update_action_status(request_id, ActionStatus::Rejected, None)
            .await?;
        self.store.add_system_turn("Action dismissed.");
        self.emit(WidgetEvent::Action(ActionEvent {
            kind: action.kind,
            request_id,
            confirmed: false,
        }));
        Ok(())
    }

    /// Apply a command from the host. Commands referencing unknown or
    /// already-settled actions are logged and dropped, never surfaced:
    /// the host may race a session switch.
    pub async fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::ActionResult {
                request_id,
                status,
                audience_count,
                message,
            } => {
                // the host is done applying either way; never leave its
                // ui locked behind a stale request id
                self.emit(WidgetEvent::UiLock(UiLockEvent {
                    locked: false,
                    reason: None,
                }));
                if self.store.find_action(request_id).is_none() {
                    warn!(%request_id, "action result for unknown request");
                    return;
                }
                let (next, summary) = match status {
                    UiActionStatus::Success => {
                        let mut summary = "Applied successfully.".to_string();
                        if let Some(count) = audience_count {
                            summary.push_str(&format!(" New audience: {count} records."));
                        }
                        (ActionStatus::Applied, summary)
                    }
                    UiActionStatus::Error => {
                        let detail = message.unwrap_or_else(|| "unknown error".to_string());
                        (ActionStatus::Error, format!("Failed: {detail}"))
                    }
                };
                match self
                    .store
                    .update_action_status(request_id, next, Some(summary.clone()))
                    .await
                {
                    Ok(()) => {
                        self.store.add_system_turn(summary);
                    }
                    Err(err) => warn!(%request_id, error = %err, "dropping stale action result"),
                }
            }
            HostCommand::StateSync { state } => self.set_audience_state(state),
        }
    }

    /// Take a fresh audience snapshot from the host, narrating the diff
    /// against the previous one. The first snapshot is silent. Snapshots
    /// older than the current one are dropped.
    pub fn set_audience_state(&mut self, state: AudienceState) {
        if let Some(prev) = &self.audience_state {
            if state.timestamp < prev.timestamp {
                debug!(
                    incoming = state.timestamp,
                    current = prev.timestamp,
                    "dropping stale audience snapshot"
                );
                return;
            }
            if let Some(diff) = describe_state_diff(prev, &state) {
                self.store
                    .add_system_turn(format!("Audience updated: {diff}"));
            }
        }
        self.audience_state = Some(state);
    }

    pub fn set_auth(&mut self, auth: AuthContext) {
        self.auth = auth;
    }

    /// Archive the current conversation and start a fresh one.
    pub async fn start_new_chat(&mut self) -> SessionId {
        let id = self.store.start_new_session().await;
        self.store.add_system_turn(GREETING);
        id
    }

    pub async fn load_session(&mut self, id: SessionId) {
        self.store.load_session(id).await;
    }

    pub async fn delete_session(&mut self, id: SessionId) {
        self.store.delete_session(id).await;
    }

    /// Tear down any open agent stream and stop retrying.
    pub fn disconnect(&self) {
        self.transport.disconnect();
        self.connection.mark_disconnected();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.store.messages()
    }

    pub fn sessions(&self) -> &[ChatSession] {
        self.store.sessions()
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.store.active_session_id()
    }

    pub fn is_streaming(&self) -> bool {
        self.store.is_streaming()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn audience_state(&self) -> Option<&AudienceState> {
        self.audience_state.as_ref()
    }

    fn emit(&self, event: WidgetEvent) {
        if let Err(err) = self.events.try_send(event) {
            warn!(error = %err, "widget event dropped");
        }
    }

    /// Prior settled user and agent turns, oldest first, for agent
    /// context. System narration stays local.
    fn history(&self) -> Vec<HistoryEntry> {
        self.store
            .messages()
            .iter()
            .filter(|m| m.role != Role::System && !m.streaming)
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for WidgetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetEngine")
            .field("store", &self.store)
            .field("connection", &self.connection.state())
            .finish_non_exhaustive()
    }
}

/// Expand a confirmed action into its atomic operations.
fn decompose_action(kind: &ActionKind) -> Vec<UiAction> {
    match kind {
        ActionKind::ApplyPlan(plan) => decompose_plan(plan),
        ActionKind::SelectFolderValues {
            folder_id,
            value_ids,
        } => vec![
            UiAction::ExpandFolder {
                folder_id: folder_id.clone(),
            },
            UiAction::SelectValues {
                folder_id: folder_id.clone(),
                value_ids: value_ids.clone(),
                selected: true,
            },
        ],
        ActionKind::OpenFolder { folder_id } => vec![UiAction::ExpandFolder {
            folder_id: folder_id.clone(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimTransport;

    use crate::actions::UiActionResult;
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl UiActionExecutor for NoopExecutor {
        async fn execute(&self, action: UiAction) -> UiActionResult {
            UiActionResult::success(action)
        }
    }

    #[test]
    fn build_requires_a_transport() {
        let result = EngineBuilder::new().executor(Arc::new(NoopExecutor)).build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn build_requires_an_executor() {
        let result = EngineBuilder::new()
            .transport(Arc::new(SimTransport::new()))
            .build();
        assert!(matches!(result, Err(Error::Action(ActionError::NoExecutor))));
    }

    #[tokio::test]
    async fn restore_greets_and_signals_ready() {
        let (mut engine, mut events) = EngineBuilder::new()
            .transport(Arc::new(SimTransport::new()))
            .executor(Arc::new(NoopExecutor))
            .build()
            .unwrap();
        engine.restore().await;

        assert_eq!(engine.messages().len(), 1);
        assert_eq!(engine.messages()[0].role, Role::System);

        assert!(matches!(
            events.recv().await,
            Some(WidgetEvent::AgentStatus(_))
        ));
        assert!(matches!(events.recv().await, Some(WidgetEvent::Ready)));
    }

    #[tokio::test]
    async fn sending_while_streaming_is_rejected() {
        let (mut engine, _events) = EngineBuilder::new()
            .transport(Arc::new(SimTransport::new()))
            .executor(Arc::new(NoopExecutor))
            .build()
            .unwrap();

        // open a turn by hand so the machine is mid-stream
        engine.store.add_user_turn("first");
        engine.store.start_agent_turn().unwrap();
        assert!(engine.is_streaming());

        let err = engine.send_message("second").await.unwrap_err();
        assert!(matches!(err, Error::Turn(TurnError::TurnInFlight)));
    }

    #[test]
    fn decompose_action_expands_each_kind() {
        let open = decompose_action(&ActionKind::OpenFolder {
            folder_id: "f1".to_string(),
        });
        assert_eq!(open.len(), 1);

        let select = decompose_action(&ActionKind::SelectFolderValues {
            folder_id: "f1".to_string(),
            value_ids: vec!["v1".to_string()],
        });
        assert_eq!(
            select,
            vec![
                UiAction::ExpandFolder {
                    folder_id: "f1".to_string()
                },
                UiAction::SelectValues {
                    folder_id: "f1".to_string(),
                    value_ids: vec!["v1".to_string()],
                    selected: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn unknown_action_result_still_releases_the_ui_lock() {
        let (mut engine, mut events) = EngineBuilder::new()
            .transport(Arc::new(SimTransport::new()))
            .executor(Arc::new(NoopExecutor))
            .build()
            .unwrap();

        // a result whose action is gone, e.g. after a session switch
        engine
            .handle_command(HostCommand::ActionResult {
                request_id: RequestId::new(),
                status: UiActionStatus::Success,
                audience_count: None,
                message: None,
            })
            .await;

        let mut unlocked = false;
        while let Ok(event) = events.try_recv() {
            if let WidgetEvent::UiLock(lock) = event {
                unlocked = !lock.locked;
            }
        }
        assert!(unlocked);
    }

    #[tokio::test]
    async fn first_snapshot_is_silent_later_diffs_narrate() {
        let (mut engine, _events) = EngineBuilder::new()
            .transport(Arc::new(SimTransport::new()))
            .executor(Arc::new(NoopExecutor))
            .build()
            .unwrap();

        let first = AudienceState {
            folders: Vec::new(),
            total_audience_count: 100,
            timestamp: 1,
        };
        engine.set_audience_state(first.clone());
        assert!(engine.messages().is_empty());

        let second = AudienceState {
            total_audience_count: 300,
            timestamp: 2,
            ..first.clone()
        };
        engine.set_audience_state(second);
        assert_eq!(engine.messages().len(), 1);
        assert!(engine.messages()[0].content.contains("up 200"));

        // stale snapshots are dropped
        engine.set_audience_state(first);
        assert_eq!(engine.messages().len(), 1);
        assert_eq!(engine.audience_state().unwrap().total_audience_count, 300);
    }
}
