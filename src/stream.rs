// Chat stream transport: orchestrator events framed as Server-Sent Events

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::tools::ToolResult;

/// The orchestrator waits until the transport has taken the previous event, so at most
/// one event is in flight between them.
pub const EVENT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model answered without asking for more tools.
    Stop,
    /// The round-trip cap was hit while the model still wanted tools.
    RoundTripLimit,
}

/// Everything a client sees of one turn, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    TurnStart { message_id: String },
    TextDelta { delta: String },
    #[serde(rename_all = "camelCase")]
    ToolCallRequested {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolCallResolved {
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
    },
    #[serde(rename_all = "camelCase")]
    TurnComplete {
        round_trips: usize,
        finish_reason: FinishReason,
    },
    TurnError { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::TurnComplete { .. } | StreamEvent::TurnError { .. })
    }
}

pub fn event_channel() -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Decode one SSE `data:` payload.
pub fn decode_frame(payload: &str) -> Result<StreamEvent, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Relay events from the channel as an SSE response, one `data:` frame per event.
pub fn sse_response(
    rx: mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            match Event::default().json_data(&event) {
                Ok(frame) => {
                    debug!(terminal = event.is_terminal(), "Relaying stream event");
                    yield Ok(frame);
                }
                Err(e) => error!("Failed to serialize stream event: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
