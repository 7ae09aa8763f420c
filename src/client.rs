// HTTP client for the chat endpoint, feeding a ChatSession from the event stream

use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::reducer::{ChatSession, TurnToken};
use crate::stream::{decode_frame, StreamEvent};
use crate::Message;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("stream ended before the turn completed")]
    Incomplete,
    #[error("undecodable stream frame: {0}")]
    Decode(String),
    #[error("turn failed: {0}")]
    Turn(String),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [Message],
}

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:9900`.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
        }
    }

    /// Send `text` as the next user message and apply the streamed reply to `session`.
    /// `on_event` sees every event that was applied, in order.
    #[instrument(skip(self, session, on_event))]
    pub async fn send(
        &self,
        session: &mut ChatSession,
        text: &str,
        mut on_event: impl FnMut(&StreamEvent),
    ) -> Result<(), ClientError> {
        let token = session.begin_turn(text);
        let body = ChatRequest {
            messages: session.messages(),
        };

        let response = match self.http.post(&self.endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Chat request failed: {}", e);
                session.fail(token, e.to_string());
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Chat request rejected");
            session.fail(token, format!("HTTP {}", status.as_u16()));
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let mut frames = response.bytes_stream().eventsource();
        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Chat stream failed: {}", e);
                    session.fail(token, e.to_string());
                    return Err(match e {
                        EventStreamError::Transport(e) => ClientError::Network(e),
                        other => ClientError::Decode(other.to_string()),
                    });
                }
            };
            if frame.data.is_empty() {
                continue;
            }
            if let Some(outcome) = self.handle_frame(session, token, &frame.data, &mut on_event) {
                return outcome;
            }
        }

        warn!("Chat stream closed without a terminal event");
        session.fail(token, ClientError::Incomplete.to_string());
        Err(ClientError::Incomplete)
    }

    // Some(outcome) once the turn is over.
    fn handle_frame(
        &self,
        session: &mut ChatSession,
        token: TurnToken,
        payload: &str,
        on_event: &mut impl FnMut(&StreamEvent),
    ) -> Option<Result<(), ClientError>> {
        let event = match decode_frame(payload) {
            Ok(event) => event,
            Err(e) => {
                error!("Undecodable frame {}: {}", payload, e);
                let err = ClientError::Decode(e.to_string());
                session.fail(token, err.to_string());
                return Some(Err(err));
            }
        };
        debug!(?event, "Stream event");
        if !session.apply(token, &event) {
            return Some(Ok(()));
        }
        on_event(&event);
        match event {
            StreamEvent::TurnComplete { .. } => Some(Ok(())),
            StreamEvent::TurnError { message } => Some(Err(ClientError::Turn(message))),
            _ => None,
        }
    }
}
