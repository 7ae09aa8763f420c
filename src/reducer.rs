//! Client-side conversation state, rebuilt from stream events.
//!
//! [`reduce`] is a pure transition `(state, event) -> state`. It only ever touches the
//! last message, so replaying a prefix of a stream never rewrites earlier messages.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::stream::StreamEvent;
use crate::{Message, Role, ToolInvocation};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    #[default]
    Idle,
    Streaming,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub status: TurnStatus,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the user's message and mark a turn as in flight.
    pub fn with_user_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self.status = TurnStatus::Streaming;
        self
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.role == Role::Assistant)
    }

    pub fn is_streaming(&self) -> bool {
        self.status == TurnStatus::Streaming
    }

    // The assistant message this turn writes into, created if the turn has none yet.
    fn current_assistant(&mut self, message_id: Option<&str>) -> &mut Message {
        let needs_new = match self.messages.last() {
            Some(last) if last.role == Role::Assistant => {
                message_id.is_some_and(|id| !last.id.is_empty() && last.id != id)
            }
            _ => true,
        };
        if needs_new {
            self.messages.push(Message::assistant(message_id.unwrap_or_default()));
        }
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }
}

pub fn reduce(mut state: ChatState, event: &StreamEvent) -> ChatState {
    match event {
        StreamEvent::TurnStart { message_id } => {
            let message = state.current_assistant(Some(message_id));
            if message.id.is_empty() {
                message.id = message_id.clone();
            }
            state.status = TurnStatus::Streaming;
        }
        StreamEvent::TextDelta { delta } => {
            state.current_assistant(None).content.push_str(delta);
        }
        StreamEvent::ToolCallRequested {
            tool_call_id,
            tool_name,
            args,
        } => {
            let message = state.current_assistant(None);
            if message.invocation(tool_call_id).is_some() {
                debug!(%tool_call_id, "Duplicate tool call ignored");
            } else {
                message
                    .tool_invocations
                    .push(ToolInvocation::pending(tool_call_id.clone(), tool_name.clone(), args.clone()));
            }
        }
        StreamEvent::ToolCallResolved {
            tool_call_id, result, ..
        } => {
            let resolved = state
                .messages
                .last_mut()
                .filter(|m| m.role == Role::Assistant)
                .and_then(|m| m.invocation_mut(tool_call_id))
                .map(|inv| inv.resolve(result.clone()));
            match resolved {
                Some(true) => {}
                Some(false) => debug!(%tool_call_id, "Tool call already resolved"),
                None => warn!(%tool_call_id, "Result for unknown tool call ignored"),
            }
        }
        StreamEvent::TurnComplete { .. } => {
            state.status = TurnStatus::Idle;
        }
        StreamEvent::TurnError { message } => {
            state.status = TurnStatus::Failed {
                message: message.clone(),
            };
        }
    }
    state
}

/// Fold a whole event sequence into a state.
pub fn replay<'a>(state: ChatState, events: impl IntoIterator<Item = &'a StreamEvent>) -> ChatState {
    events.into_iter().fold(state, reduce)
}

/// Identifies the stream a batch of events belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnToken(u64);

/// Owns the conversation on the client side.
///
/// Each turn gets a fresh token; events applied with an older token are dropped, so a
/// cancelled or superseded stream can never write into the conversation. Every change
/// is published on a watch channel for whatever renders the chat.
pub struct ChatSession {
    state: ChatState,
    current: Option<TurnToken>,
    next_token: u64,
    publisher: watch::Sender<ChatState>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(ChatState::new());
        Self {
            state: ChatState::new(),
            current: None,
            next_token: 0,
            publisher,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.publisher.subscribe()
    }

    /// Append the user's message and open a new turn. Any previous turn is abandoned.
    pub fn begin_turn(&mut self, text: impl Into<String>) -> TurnToken {
        self.next_token += 1;
        let token = TurnToken(self.next_token);
        self.current = Some(token);
        let state = std::mem::take(&mut self.state);
        self.set(state.with_user_message(Message::user(text)));
        token
    }

    /// Apply one event. Returns false when the token is stale and the event was dropped.
    pub fn apply(&mut self, token: TurnToken, event: &StreamEvent) -> bool {
        if self.current != Some(token) {
            debug!(?token, "Dropping event from abandoned turn");
            return false;
        }
        let state = std::mem::take(&mut self.state);
        self.set(reduce(state, event));
        if event.is_terminal() {
            self.current = None;
        }
        true
    }

    /// Stop listening to the current turn. Messages received so far stay.
    pub fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            info!(?token, "Turn cancelled");
            let mut state = self.state.clone();
            state.status = TurnStatus::Idle;
            self.set(state);
        }
    }

    /// Mark the current turn failed without a `turn-error` event, e.g. on a rejected
    /// request or a broken connection.
    pub fn fail(&mut self, token: TurnToken, message: impl Into<String>) {
        if self.current != Some(token) {
            return;
        }
        self.current = None;
        let mut state = self.state.clone();
        state.status = TurnStatus::Failed {
            message: message.into(),
        };
        self.set(state);
    }

    fn set(&mut self, state: ChatState) {
        self.state = state;
        self.publisher.send_replace(self.state.clone());
    }
}
