pub mod chat;
pub mod client;
pub mod config;
pub mod constants;
pub mod dao_data;
pub mod llm_interaction;
pub mod orchestrator;
pub mod reducer;
pub mod stream;
pub mod tools;
pub mod ui_components;
pub mod web_server;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tools::ToolResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            tool_invocations: Vec::new(),
        }
    }

    pub fn assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            tool_invocations: Vec::new(),
        }
    }

    pub fn invocation(&self, tool_call_id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations.iter().find(|inv| inv.tool_call_id == tool_call_id)
    }

    pub fn invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.tool_invocations.iter_mut().find(|inv| inv.tool_call_id == tool_call_id)
    }

    pub fn has_pending_invocations(&self) -> bool {
        self.tool_invocations.iter().any(|inv| !inv.is_resolved())
    }
}

/// One tool call inside an assistant message. Pending until its result arrives, then
/// resolved for good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(flatten)]
    pub state: InvocationState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InvocationState {
    Pending,
    Resolved { result: ToolResult },
}

impl ToolInvocation {
    pub fn pending(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            state: InvocationState::Pending,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, InvocationState::Resolved { .. })
    }

    pub fn result(&self) -> Option<&ToolResult> {
        match &self.state {
            InvocationState::Resolved { result } => Some(result),
            InvocationState::Pending => None,
        }
    }

    /// Returns false if the invocation was already resolved; the first result wins.
    pub fn resolve(&mut self, result: ToolResult) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.state = InvocationState::Resolved { result };
        true
    }
}
