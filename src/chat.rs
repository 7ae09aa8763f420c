// Terminal chat against a running dao-chat server.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::client::{ChatClient, ClientError};
use crate::config::DaoConfig;
use crate::constants::QUICK_QUESTIONS;
use crate::reducer::ChatSession;
use crate::stream::{FinishReason, StreamEvent};
use crate::ui_components::render_tool_invocation;
use crate::{InvocationState, ToolInvocation};

/// Prints one turn's events as they arrive.
pub struct TerminalRenderer<W: Write> {
    out: W,
    dao: DaoConfig,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, dao: DaoConfig) -> Self {
        Self { out, dao }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn on_event(&mut self, event: &StreamEvent) {
        // Terminal write failures are not worth aborting a turn over
        let _ = self.write_event(event);
    }

    fn write_event(&mut self, event: &StreamEvent) -> io::Result<()> {
        match event {
            StreamEvent::TurnStart { .. } => {}
            StreamEvent::TextDelta { delta } => {
                write!(self.out, "{}", delta)?;
                self.out.flush()?;
            }
            StreamEvent::ToolCallRequested { tool_name, .. } => {
                writeln!(self.out, "\n[Calling {}...]", tool_name)?;
            }
            StreamEvent::ToolCallResolved {
                tool_call_id,
                tool_name,
                result,
            } => {
                let invocation = ToolInvocation {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    args: serde_json::Value::Null,
                    state: InvocationState::Resolved { result: result.clone() },
                };
                let card = render_tool_invocation(&invocation, &self.dao, Utc::now().timestamp());
                writeln!(self.out, "{}\n", card.to_text())?;
            }
            StreamEvent::TurnComplete { finish_reason, .. } => {
                if *finish_reason == FinishReason::RoundTripLimit {
                    writeln!(self.out, "\n(stopped after too many tool calls)")?;
                }
                writeln!(self.out)?;
            }
            StreamEvent::TurnError { message } => {
                writeln!(self.out, "\nError: {}", message)?;
            }
        }
        Ok(())
    }
}

/// Ask one question, print the streamed answer and return.
pub async fn ask(server: &str, dao: DaoConfig, question: &str) -> Result<()> {
    let client = ChatClient::new(server);
    let mut session = ChatSession::new();
    let mut renderer = TerminalRenderer::new(io::stdout(), dao);
    client
        .send(&mut session, question, |event| renderer.on_event(event))
        .await
        .context("Chat request failed")?;
    Ok(())
}

/// Read questions from stdin until EOF or `/quit`. Failed turns are reported and the
/// conversation carries on, so the user can simply retry.
pub async fn run_interactive_chat(server: &str, dao: DaoConfig) -> Result<()> {
    let client = ChatClient::new(server);
    let mut session = ChatSession::new();
    let mut renderer = TerminalRenderer::new(io::stdout(), dao.clone());

    println!("Chatting with the {} DAO assistant. Type /quit to leave.", dao.name);
    println!("Try one of:");
    for (i, question) in QUICK_QUESTIONS.iter().enumerate() {
        println!("  {}. {}", i + 1, question);
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("Failed to read input")? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        let question = quick_question(line).unwrap_or(line);

        match client.send(&mut session, question, |event| renderer.on_event(event)).await {
            Ok(()) => {}
            Err(ClientError::Turn(message)) => warn!("Turn failed: {}", message),
            Err(e) => {
                warn!("Chat request failed: {}", e);
                println!("Error: {}", e);
            }
        }
    }
    info!(messages = session.messages().len(), "Chat session finished");
    Ok(())
}

// "2" picks the second quick question.
fn quick_question(input: &str) -> Option<&'static str> {
    let index: usize = input.parse().ok()?;
    QUICK_QUESTIONS.get(index.checked_sub(1)?).copied()
}
