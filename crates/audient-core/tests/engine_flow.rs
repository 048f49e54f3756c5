//! End-to-end flows through the engine with a simulated agent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use audient_core::actions::{UiAction, UiActionExecutor, UiActionResult, UiActionStatus};
use audient_core::chat::{ActionStatus, Role};
use audient_core::connection::ReconnectConfig;
use audient_core::context::{AudienceFolder, AudienceState, FolderOperator, FolderValue};
use audient_core::engine::EngineBuilder;
use audient_core::events::{HostCommand, WidgetEvent};
use audient_core::transport::{EventStream, SimTransport, Transport, TransportError, TurnRequest};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct RecordingExecutor {
    seen: Mutex<Vec<UiAction>>,
}

impl RecordingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl UiActionExecutor for RecordingExecutor {
    async fn execute(&self, action: UiAction) -> UiActionResult {
        self.seen.lock().unwrap().push(action.clone());
        UiActionResult::success(action)
    }
}

struct DownTransport;

#[async_trait]
impl Transport for DownTransport {
    async fn send(&self, _request: TurnRequest) -> Result<EventStream, TransportError> {
        Err(TransportError::Stream("connection refused".to_string()))
    }

    fn disconnect(&self) {}
}

fn audience_state() -> AudienceState {
    AudienceState {
        folders: vec![AudienceFolder {
            id: "f1".to_string(),
            name: "Industry".to_string(),
            operator: FolderOperator::Or,
            selected_values: vec![FolderValue {
                id: "v1".to_string(),
                label: "Tech".to_string(),
            }],
        }],
        total_audience_count: 1200,
        timestamp: 1,
    }
}

#[tokio::test]
async fn turn_streams_and_settles_with_a_proposal() {
    init_tracing();
    let executor = RecordingExecutor::new();
    let (mut engine, _events) = EngineBuilder::new()
        .transport(Arc::new(SimTransport::new()))
        .executor(executor)
        .build()
        .unwrap();
    engine.set_audience_state(audience_state());

    engine.send_message("build me an audience plan").await.unwrap();

    assert!(!engine.is_streaming());
    let messages = engine.messages();
    assert_eq!(messages[0].role, Role::User);
    let agent = &messages[1];
    assert_eq!(agent.role, Role::Agent);
    assert!(!agent.streaming);
    assert!(!agent.content.is_empty());

    let action = agent.action.as_ref().expect("proposal attached");
    assert_eq!(action.status, ActionStatus::Pending);

    // the finished turn was archived
    assert_eq!(engine.sessions().len(), 1);
}

#[tokio::test]
async fn confirmed_action_executes_and_host_result_applies_it() {
    init_tracing();
    let executor = RecordingExecutor::new();
    let (mut engine, mut events) = EngineBuilder::new()
        .transport(Arc::new(SimTransport::new()))
        .executor(executor.clone())
        .build()
        .unwrap();
    engine.set_audience_state(audience_state());
    engine.send_message("apply a plan").await.unwrap();

    let request_id = engine
        .messages()
        .iter()
        .find_map(|m| m.action.as_ref())
        .unwrap()
        .request_id;

    engine.confirm_action(request_id).await.unwrap();

    // the host saw the lock request and the confirmed action
    let mut saw_lock = false;
    let mut saw_action = false;
    while let Ok(event) = events.try_recv() {
        match event {
            WidgetEvent::UiLock(lock) if lock.locked => saw_lock = true,
            WidgetEvent::Action(action) => {
                assert!(action.confirmed);
                assert_eq!(action.request_id, request_id);
                saw_action = true;
            }
            _ => {}
        }
    }
    assert!(saw_lock);
    assert!(saw_action);

    // operations ran, starting with the folder expansion
    let seen = executor.seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(matches!(seen[0], UiAction::ExpandFolder { .. }));

    // still awaiting the host's verdict
    let action = engine
        .messages()
        .iter()
        .find_map(|m| m.action.as_ref())
        .unwrap();
    assert_eq!(action.status, ActionStatus::Confirmed);

    engine
        .handle_command(HostCommand::ActionResult {
            request_id,
            status: UiActionStatus::Success,
            audience_count: Some(950),
            message: None,
        })
        .await;

    let action = engine
        .messages()
        .iter()
        .find_map(|m| m.action.as_ref())
        .unwrap();
    assert_eq!(action.status, ActionStatus::Applied);
    assert!(
        action
            .result_summary
            .as_deref()
            .unwrap()
            .contains("950 records")
    );

    // the result was narrated and the lock released
    let last = engine.messages().last().unwrap();
    assert_eq!(last.role, Role::System);
    assert!(last.content.contains("950 records"));
    let mut unlocked = false;
    while let Ok(event) = events.try_recv() {
        if let WidgetEvent::UiLock(lock) = event {
            unlocked = !lock.locked;
        }
    }
    assert!(unlocked);
}

#[tokio::test]
async fn rejected_action_settles_without_executing() {
    init_tracing();
    let executor = RecordingExecutor::new();
    let (mut engine, _events) = EngineBuilder::new()
        .transport(Arc::new(SimTransport::new()))
        .executor(executor.clone())
        .build()
        .unwrap();
    engine.set_audience_state(audience_state());
    engine.send_message("build a plan for me").await.unwrap();

    let request_id = engine
        .messages()
        .iter()
        .find_map(|m| m.action.as_ref())
        .unwrap()
        .request_id;
    engine.reject_action(request_id).await.unwrap();

    let action = engine
        .messages()
        .iter()
        .find_map(|m| m.action.as_ref())
        .unwrap();
    assert_eq!(action.status, ActionStatus::Rejected);
    assert!(executor.seen.lock().unwrap().is_empty());
    assert_eq!(
        engine.messages().last().unwrap().content,
        "Action dismissed."
    );
}

#[tokio::test]
async fn exhausted_retries_narrate_and_leave_the_conversation_usable() {
    init_tracing();
    let (mut engine, mut events) = EngineBuilder::new()
        .transport(Arc::new(DownTransport))
        .executor(RecordingExecutor::new())
        .reconnect(
            ReconnectConfig::default()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1)),
        )
        .build()
        .unwrap();

    engine.send_message("hello").await.unwrap();

    assert!(!engine.is_streaming());
    let narration = engine.messages().last().unwrap();
    assert_eq!(narration.role, Role::System);
    assert!(narration.content.contains("Connection failed after 2 attempts"));

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let WidgetEvent::Error(err) = event {
            assert_eq!(err.code, "CONNECTION_FAILED");
            saw_error = true;
        }
    }
    assert!(saw_error);

    // a later send is accepted; the failed turn did not wedge the machine
    engine.send_message("still there?").await.unwrap();
    assert!(!engine.is_streaming());
}
