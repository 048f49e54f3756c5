//! Server-sent events transport to a real agent endpoint.

use std::sync::Mutex;

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AgentEvent, EventStream, Transport, TransportError, TurnRequest};

/// Streams agent turns from an HTTP endpoint. Each turn is one POST whose
/// response body is an SSE stream of [`AgentEvent`] frames.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    cancel: Mutex<CancellationToken>,
}

impl SseTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut guard = match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.cancel();
        *guard = token.clone();
        token
    }
}

/// Decode one SSE data payload into an event. Malformed frames become a
/// terminal error event rather than being skipped: a frame we cannot read
/// means we can no longer trust the stream's framing.
fn decode_frame(data: &str) -> AgentEvent {
    match serde_json::from_str::<AgentEvent>(data) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "malformed agent event frame");
            AgentEvent::Error {
                error: format!("malformed agent event: {err}"),
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, request: TurnRequest) -> Result<EventStream, TransportError> {
        let token = self.fresh_token();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        debug!(endpoint = %self.endpoint, "agent stream established");

        let mut frames = response.bytes_stream().eventsource();
        Ok(Box::pin(stream! {
            loop {
                let frame = tokio::select! {
                    () = token.cancelled() => {
                        debug!("agent stream cancelled");
                        break;
                    }
                    frame = frames.next() => frame,
                };
                match frame {
                    Some(Ok(frame)) => {
                        let event = decode_frame(&frame.data);
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        yield AgentEvent::Error {
                            error: format!("stream error: {err}"),
                        };
                        break;
                    }
                    None => break,
                }
            }
        }))
    }

    fn disconnect(&self) {
        self.fresh_token();
    }
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
