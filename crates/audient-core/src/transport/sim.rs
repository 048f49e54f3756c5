//! Local simulated agent, for demos and tests. Routes on keywords in the
//! user message and streams its reply word by word.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;

use super::{ActionProposal, AgentEvent, EventStream, Transport, TransportError, TurnRequest};
use crate::actions::{Plan, PlanCriterion, PlanValue};
use crate::chat::ActionKind;
use crate::context::AudienceState;

const ACTION_KEYWORDS: &[&str] = &["build", "apply", "select", "create", "audience", "plan"];
const QUERY_KEYWORDS: &[&str] = &["what", "show", "current", "state", "count"];

/// Fabricates agent turns locally. Streams each reply word by word,
/// optionally pausing between chunks to mimic network pacing.
#[derive(Debug, Clone)]
pub struct SimTransport {
    chunk_delay: Duration,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn route(request: &TurnRequest) -> SimReply {
        let lower = request.message.to_lowercase();
        let wants_action = ACTION_KEYWORDS.iter().any(|k| lower.contains(k));
        let wants_state = QUERY_KEYWORDS.iter().any(|k| lower.contains(k));

        if wants_action && let Some(state) = &request.audience_state {
            return SimReply {
                text: "Here is a selection plan based on your current audience setup. \
                       Review it and confirm to apply."
                    .to_string(),
                proposal: Some(suggest_plan(state)),
            };
        }
        if wants_state {
            let text = match &request.audience_state {
                Some(state) => describe_state(state),
                None => "I have not received an audience snapshot from the host yet.".to_string(),
            };
            return SimReply {
                text,
                proposal: None,
            };
        }
        if lower.contains("hello") || lower.contains("hi") {
            return SimReply {
                text: "Hello! I can help you build and refine your audience selection. \
                       Ask me to build a plan or to describe the current state."
                    .to_string(),
                proposal: None,
            };
        }
        if lower.contains("help") {
            return SimReply {
                text: "Try asking me to build an audience plan, or ask what the current \
                       selection looks like."
                    .to_string(),
                proposal: None,
            };
        }
        SimReply {
            text: "I did not quite follow that. Ask me to build an audience plan or to \
                   describe the current selection."
                .to_string(),
            proposal: None,
        }
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct SimReply {
    text: String,
    proposal: Option<ActionProposal>,
}

/// Propose one value per folder, mirroring how the real agent suggests
/// incremental refinements.
fn suggest_plan(state: &AudienceState) -> ActionProposal {
    let criteria: Vec<PlanCriterion> = state
        .folders
        .iter()
        .map(|folder| PlanCriterion {
            folder_id: folder.id.clone(),
            folder_name: Some(folder.name.clone()),
            values: folder
                .selected_values
                .iter()
                .take(1)
                .map(|v| PlanValue {
                    id: v.id.clone(),
                    label: v.label.clone(),
                    selected: true,
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    ActionProposal {
        kind: ActionKind::ApplyPlan(Plan { criteria }),
        label: "Apply suggested plan".to_string(),
        description: format!(
            "Applies one suggested value in each of the {} folders.",
            state.folders.len()
        ),
    }
}

fn describe_state(state: &AudienceState) -> String {
    if state.folders.is_empty() {
        return format!(
            "Your audience currently matches {} records, with no folders selected.",
            state.total_audience_count
        );
    }
    let folders: Vec<String> = state
        .folders
        .iter()
        .map(|f| format!("{} ({} values)", f.name, f.selected_values.len()))
        .collect();
    format!(
        "Your audience currently matches {} records across {} folders: {}.",
        state.total_audience_count,
        state.folders.len(),
        folders.join(", ")
    )
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&self, request: TurnRequest) -> Result<EventStream, TransportError> {
        let reply = Self::route(&request);
        let delay = self.chunk_delay;

        Ok(Box::pin(stream! {
            let words: Vec<String> = reply
                .text
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let last = words.len().saturating_sub(1);
            for (i, word) in words.into_iter().enumerate() {
                let content = if i == last { word } else { format!("{word} ") };
                yield AgentEvent::Text { content };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            if let Some(proposal) = reply.proposal {
                yield AgentEvent::Action { action: proposal };
            }
            yield AgentEvent::Done;
        }))
    }

    fn disconnect(&self) {}
}
