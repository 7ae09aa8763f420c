//! One chat turn: model → tools → model, until the model stops asking for tools or the
//! round-trip cap is reached.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::dao_data::SubgraphClient;
use crate::llm_interaction::{
    generate_call_id, MistralProvider, ModelMessage, ModelProvider, ModelRequest, ProviderError,
    ProviderEvent, ToolCallRequest,
};
use crate::stream::{event_channel, FinishReason, StreamEvent};
use crate::tools::{ToolRegistry, ToolResult};
use crate::{InvocationState, Message, Role, ToolInvocation};

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_round_trips: usize,
}

impl TurnSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            model: config.model.clone(),
            system_prompt: config.system_prompt(),
            temperature: config.temperature,
            max_round_trips: config.max_round_trips,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingModel,
    ExecutingTools,
    Done,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("client disconnected before the turn finished")]
    Disconnected,
}

/// What a finished turn produced, as streamed.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub message_id: String,
    pub text: String,
    pub round_trips: usize,
    pub finish_reason: FinishReason,
    pub invocations: Vec<ToolInvocation>,
}

pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    settings: TurnSettings,
}

async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), TurnError> {
    tx.send(event).await.map_err(|_| TurnError::Disconnected)
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, registry: Arc<ToolRegistry>, settings: TurnSettings) -> Self {
        Self {
            provider,
            registry,
            settings,
        }
    }

    /// Wire the production stack: Mistral for the model, the subgraph for DAO data.
    pub fn from_config(config: &ChatConfig) -> Self {
        let provider = MistralProvider::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.provider_timeout,
        );
        let data = SubgraphClient::new(config.subgraph_url.clone());
        let registry = ToolRegistry::new(Arc::new(data), config.dao.clone(), config.tool_timeout);
        Self::new(Arc::new(provider), Arc::new(registry), TurnSettings::from_config(config))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the turn on its own task and hand back the event receiver.
    pub fn spawn_turn(self: Arc<Self>, history: Vec<Message>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = event_channel();
        tokio::spawn(async move {
            match self.run_turn(&history, &tx).await {
                Ok(summary) => info!(
                    message_id = %summary.message_id,
                    round_trips = summary.round_trips,
                    tools = summary.invocations.len(),
                    "Turn complete"
                ),
                Err(TurnError::Disconnected) => warn!("Client went away, turn abandoned"),
                Err(e) => error!("Turn failed: {}", e),
            }
        });
        rx
    }

    /// Drive one turn, sending every event to `tx`. Provider failures end the turn with
    /// a `turn-error` event; tool failures never do.
    #[instrument(skip_all, fields(history = history.len()))]
    pub async fn run_turn(
        &self,
        history: &[Message],
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<TurnSummary, TurnError> {
        let message_id = Uuid::new_v4().to_string();
        emit(tx, StreamEvent::TurnStart { message_id: message_id.clone() }).await?;

        let mut context = history_to_model_messages(history);
        let mut seen_ids: HashSet<String> = history
            .iter()
            .flat_map(|m| m.tool_invocations.iter().map(|inv| inv.tool_call_id.clone()))
            .collect();

        let mut state = TurnState::AwaitingModel;
        let mut round_trips = 0;
        let mut text = String::new();
        let mut invocations = Vec::new();
        let mut finish_reason = FinishReason::Stop;
        let mut requested: Vec<ToolCallRequest> = Vec::new();

        loop {
            debug!(?state, round_trips, "Turn state");
            match state {
                TurnState::AwaitingModel => {
                    let (step_text, calls) = match self.model_step(&context, tx).await {
                        Ok(step) => step,
                        Err(TurnError::Provider(e)) => {
                            // Fails only once the receiver is dropped, and then nobody is left to tell
                            let _ = tx.send(StreamEvent::TurnError { message: e.to_string() }).await;
                            return Err(TurnError::Provider(e));
                        }
                        Err(e) => return Err(e),
                    };
                    text.push_str(&step_text);

                    if calls.is_empty() {
                        state = TurnState::Done;
                    } else if round_trips >= self.settings.max_round_trips {
                        warn!(
                            dropped = calls.len(),
                            max = self.settings.max_round_trips,
                            "Round-trip limit reached, ignoring further tool calls"
                        );
                        finish_reason = FinishReason::RoundTripLimit;
                        state = TurnState::Done;
                    } else {
                        requested = calls
                            .into_iter()
                            .map(|mut call| {
                                if !seen_ids.insert(call.call_id.clone()) {
                                    call.call_id = generate_call_id();
                                    seen_ids.insert(call.call_id.clone());
                                }
                                call
                            })
                            .collect();
                        context.push(ModelMessage::Assistant {
                            content: step_text,
                            tool_calls: requested.clone(),
                        });
                        state = TurnState::ExecutingTools;
                    }
                }
                TurnState::ExecutingTools => {
                    let calls = std::mem::take(&mut requested);
                    let results = self.execute_tools(&calls, tx).await?;
                    for (call, result) in calls.into_iter().zip(results) {
                        context.push(ModelMessage::Tool {
                            call_id: call.call_id.clone(),
                            tool_name: call.tool_name.clone(),
                            content: result.to_model_content(),
                        });
                        invocations.push(ToolInvocation {
                            tool_call_id: call.call_id,
                            tool_name: call.tool_name,
                            args: call.args,
                            state: InvocationState::Resolved { result },
                        });
                    }
                    round_trips += 1;
                    state = TurnState::AwaitingModel;
                }
                TurnState::Done => break,
            }
        }

        emit(
            tx,
            StreamEvent::TurnComplete {
                round_trips,
                finish_reason,
            },
        )
        .await?;

        Ok(TurnSummary {
            message_id,
            text,
            round_trips,
            finish_reason,
            invocations,
        })
    }

    /// Stream one model response, forwarding text as it arrives.
    async fn model_step(
        &self,
        context: &[ModelMessage],
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(String, Vec<ToolCallRequest>), TurnError> {
        let request = ModelRequest {
            model: self.settings.model.clone(),
            system_prompt: self.settings.system_prompt.clone(),
            messages: context.to_vec(),
            tools: self.registry.descriptors().to_vec(),
            temperature: self.settings.temperature,
        };
        let mut stream = self.provider.open_stream(&request).await?;

        let mut text = String::new();
        let mut calls = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                ProviderEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    emit(tx, StreamEvent::TextDelta { delta }).await?;
                }
                ProviderEvent::ToolCall(call) => {
                    debug!(tool = %call.tool_name, call_id = %call.call_id, "Model requested tool");
                    calls.push(call);
                }
            }
        }
        Ok((text, calls))
    }

    /// Run every call of one step concurrently. Results are reported as they complete
    /// and returned in request order once all have resolved.
    async fn execute_tools(
        &self,
        calls: &[ToolCallRequest],
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Vec<ToolResult>, TurnError> {
        for call in calls {
            emit(
                tx,
                StreamEvent::ToolCallRequested {
                    tool_call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    args: call.args.clone(),
                },
            )
            .await?;
        }

        let registry = &self.registry;
        let mut pending: FuturesUnordered<_> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| async move { (index, registry.invoke(&call.tool_name, &call.args).await) })
            .collect();

        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
        while let Some((index, result)) = pending.next().await {
            let call = &calls[index];
            emit(
                tx,
                StreamEvent::ToolCallResolved {
                    tool_call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    result: result.clone(),
                },
            )
            .await?;
            results[index] = Some(result);
        }
        Ok(results.into_iter().flatten().collect())
    }
}

/// Rebuild the model-visible context from the client's conversation. Resolved tool
/// invocations become a tool-call message plus one tool message each; pending ones are
/// dropped.
pub fn history_to_model_messages(history: &[Message]) -> Vec<ModelMessage> {
    let mut messages = Vec::new();
    for message in history {
        match message.role {
            Role::User => messages.push(ModelMessage::User {
                content: message.content.clone(),
            }),
            Role::Assistant => {
                let resolved: Vec<(&ToolInvocation, &ToolResult)> = message
                    .tool_invocations
                    .iter()
                    .filter_map(|inv| inv.result().map(|result| (inv, result)))
                    .collect();
                if !resolved.is_empty() {
                    messages.push(ModelMessage::Assistant {
                        content: String::new(),
                        tool_calls: resolved
                            .iter()
                            .map(|(inv, _)| ToolCallRequest {
                                call_id: inv.tool_call_id.clone(),
                                tool_name: inv.tool_name.clone(),
                                args: inv.args.clone(),
                            })
                            .collect(),
                    });
                    for (inv, result) in &resolved {
                        messages.push(ModelMessage::Tool {
                            call_id: inv.tool_call_id.clone(),
                            tool_name: inv.tool_name.clone(),
                            content: result.to_model_content(),
                        });
                    }
                }
                if !message.content.is_empty() {
                    messages.push(ModelMessage::Assistant {
                        content: message.content.clone(),
                        tool_calls: Vec::new(),
                    });
                }
            }
        }
    }
    messages
}
