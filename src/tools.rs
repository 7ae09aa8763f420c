//! The fixed set of read-only DAO tools the model may call.
//!
//! Tool names are a closed enum, so adding a tool means extending [`ToolName`] and
//! [`DaoToolCall`] and every `match` over them. Parameters are typed structs: the JSON
//! schema the model sees is generated from them and incoming arguments are validated by
//! deserializing into them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::DaoConfig;
use crate::dao_data::{DaoDataProvider, DataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolName {
    #[serde(rename = "getDaoInfo")]
    GetDaoInfo,
    #[serde(rename = "getCurrentAuction")]
    GetCurrentAuction,
    #[serde(rename = "getAuction")]
    GetAuction,
    #[serde(rename = "getProposal")]
    GetProposal,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::GetDaoInfo,
        ToolName::GetCurrentAuction,
        ToolName::GetAuction,
        ToolName::GetProposal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetDaoInfo => "getDaoInfo",
            ToolName::GetCurrentAuction => "getCurrentAuction",
            ToolName::GetAuction => "getAuction",
            ToolName::GetProposal => "getProposal",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    fn description(self, dao_name: &str) -> String {
        match self {
            ToolName::GetDaoInfo => format!("Get current stats and information about {} DAO", dao_name),
            ToolName::GetCurrentAuction => "Get information about the current ongoing auction".to_string(),
            ToolName::GetAuction => "Get details about a specific auction by number".to_string(),
            ToolName::GetProposal => "Get details of a specific proposal by number".to_string(),
        }
    }

    fn parameters(self) -> Value {
        match self {
            ToolName::GetDaoInfo | ToolName::GetCurrentAuction => parameter_schema::<NoParams>(),
            ToolName::GetAuction => parameter_schema::<AuctionParams>(),
            ToolName::GetProposal => parameter_schema::<ProposalParams>(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AuctionParams {
    /// The token ID of the auction
    pub token_id: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProposalParams {
    /// The proposal number to fetch
    pub proposal_number: u64,
}

fn parameter_schema<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| json!({ "type": "object" }));
    if let Some(object) = value.as_object_mut() {
        // Model APIs want a bare object schema
        object.remove("$schema");
        object.remove("title");
        object.entry("properties").or_insert_with(|| json!({}));
    }
    value
}

/// What the model is told about one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaoToolCall {
    GetDaoInfo,
    GetCurrentAuction,
    GetAuction { token_id: u64 },
    GetProposal { proposal_number: u64 },
}

impl DaoToolCall {
    /// Resolve a tool name and raw model arguments into a typed call.
    pub fn parse(tool_name: &str, args: &Value) -> Result<Self, ToolResult> {
        let tool = ToolName::parse(tool_name).ok_or_else(|| {
            ToolResult::failure(FailureKind::UnknownTool, format!("no tool named '{}'", tool_name))
        })?;
        // Models send null or nothing for parameterless tools
        let args = if args.is_null() { json!({}) } else { args.clone() };

        let call = match tool {
            ToolName::GetDaoInfo => {
                validate::<NoParams>(tool, args)?;
                DaoToolCall::GetDaoInfo
            }
            ToolName::GetCurrentAuction => {
                validate::<NoParams>(tool, args)?;
                DaoToolCall::GetCurrentAuction
            }
            ToolName::GetAuction => {
                let params: AuctionParams = validate(tool, args)?;
                DaoToolCall::GetAuction { token_id: params.token_id }
            }
            ToolName::GetProposal => {
                let params: ProposalParams = validate(tool, args)?;
                DaoToolCall::GetProposal { proposal_number: params.proposal_number }
            }
        };
        Ok(call)
    }

    pub fn tool_name(&self) -> ToolName {
        match self {
            DaoToolCall::GetDaoInfo => ToolName::GetDaoInfo,
            DaoToolCall::GetCurrentAuction => ToolName::GetCurrentAuction,
            DaoToolCall::GetAuction { .. } => ToolName::GetAuction,
            DaoToolCall::GetProposal { .. } => ToolName::GetProposal,
        }
    }
}

fn validate<T: DeserializeOwned>(tool: ToolName, args: Value) -> Result<T, ToolResult> {
    serde_json::from_value(args).map_err(|e| {
        ToolResult::failure(
            FailureKind::Validation,
            format!("invalid arguments for {}: {}", tool, e),
        )
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    NotFound,
    Unavailable,
    Timeout,
    UnknownTool,
}

/// Outcome of a tool invocation. Failures are values, never errors: they are shown to
/// the model so it can explain the limitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    #[serde(rename = "ok")]
    Success { data: Value },
    #[serde(rename = "error")]
    Failure { kind: FailureKind, message: String },
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        ToolResult::Success { data }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ToolResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ToolResult::Success { data } => Some(data),
            ToolResult::Failure { .. } => None,
        }
    }

    /// Text placed in the model context for this result.
    pub fn to_model_content(&self) -> String {
        match self {
            ToolResult::Success { data } => data.to_string(),
            ToolResult::Failure { kind, message } => json!({ "error": kind, "message": message }).to_string(),
        }
    }
}

impl From<DataError> for ToolResult {
    fn from(err: DataError) -> Self {
        let kind = match err {
            DataError::NotFound(_) => FailureKind::NotFound,
            DataError::Unavailable(_) => FailureKind::Unavailable,
        };
        ToolResult::failure(kind, err.to_string())
    }
}

/// Registry of the DAO tools, bound to one DAO and one data provider.
pub struct ToolRegistry {
    provider: Arc<dyn DaoDataProvider>,
    dao: DaoConfig,
    tool_timeout: Duration,
    descriptors: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new(provider: Arc<dyn DaoDataProvider>, dao: DaoConfig, tool_timeout: Duration) -> Self {
        let descriptors = ToolName::ALL
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.as_str().to_string(),
                description: tool.description(&dao.name),
                parameters: tool.parameters(),
            })
            .collect();
        Self {
            provider,
            dao,
            tool_timeout,
            descriptors,
        }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn dao(&self) -> &DaoConfig {
        &self.dao
    }

    /// Validate and run one tool call. Always resolves to a result.
    #[instrument(skip(self, args), fields(tool = %tool_name))]
    pub async fn invoke(&self, tool_name: &str, args: &Value) -> ToolResult {
        let call = match DaoToolCall::parse(tool_name, args) {
            Ok(call) => call,
            Err(failure) => {
                warn!(?failure, "Rejected tool call");
                return failure;
            }
        };

        match timeout(self.tool_timeout, self.execute(&call)).await {
            Ok(Ok(data)) => {
                info!("Tool call succeeded");
                ToolResult::success(data)
            }
            Ok(Err(err)) => {
                warn!(%err, "Tool call failed");
                ToolResult::from(err)
            }
            Err(_) => {
                warn!(timeout = ?self.tool_timeout, "Tool call timed out");
                ToolResult::failure(
                    FailureKind::Timeout,
                    format!("{} timed out after {}s", call.tool_name(), self.tool_timeout.as_secs()),
                )
            }
        }
    }

    async fn execute(&self, call: &DaoToolCall) -> Result<Value, DataError> {
        let dao_id = self.dao.contract_address.as_str();
        match call {
            DaoToolCall::GetDaoInfo => to_json(self.provider.get_dao(dao_id).await?),
            DaoToolCall::GetCurrentAuction => to_json(self.provider.get_current_auction(dao_id).await?),
            DaoToolCall::GetAuction { token_id } => {
                let key = self.dao.auction_key(*token_id);
                debug!(%key, "Looking up auction");
                to_json(self.provider.get_auction(&key).await?)
            }
            DaoToolCall::GetProposal { proposal_number } => {
                to_json(self.provider.get_proposal(dao_id, *proposal_number).await?)
            }
        }
    }
}

fn to_json<T: Serialize>(record: T) -> Result<Value, DataError> {
    serde_json::to_value(record).map_err(|e| DataError::Unavailable(format!("failed to encode record: {}", e)))
}
