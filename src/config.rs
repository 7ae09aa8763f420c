use std::path::PathBuf;
use std::time::Duration;

use crate::constants;

/// The DAO this deployment answers questions about.
#[derive(Debug, Clone, PartialEq)]
pub struct DaoConfig {
    pub name: String,
    /// Token contract address; doubles as the subgraph DAO identifier.
    pub contract_address: String,
    pub chain: String,
}

impl DaoConfig {
    pub fn new(
        name: impl Into<String>,
        contract_address: impl Into<String>,
        chain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            // The subgraph stores addresses lowercased
            contract_address: contract_address.into().to_lowercase(),
            chain: chain.into(),
        }
    }

    /// Subgraph id of a single auction: `{contract}:{tokenId}`.
    pub fn auction_key(&self, token_id: u64) -> String {
        format!("{}:{}", self.contract_address, token_id)
    }
}

/// Everything a chat turn needs, resolved once at start-up and shared read-only.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub dao: DaoConfig,
    pub model: String,
    pub api_url: String,
    pub api_key: String,
    pub subgraph_url: String,
    pub temperature: f32,
    pub max_round_trips: usize,
    pub tool_timeout: Duration,
    pub provider_timeout: Duration,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl ChatConfig {
    /// Build from the environment-backed constants.
    pub fn from_env() -> Self {
        Self {
            dao: DaoConfig::new(
                constants::DAO_NAME.as_str(),
                constants::DAO_CONTRACT_ADDRESS.as_str(),
                constants::DAO_CHAIN.as_str(),
            ),
            model: constants::DAO_CHAT_MODEL.clone(),
            api_url: constants::MISTRAL_API_URL.clone(),
            api_key: constants::MISTRAL_API_KEY.clone(),
            subgraph_url: constants::DAO_SUBGRAPH_URL.clone(),
            temperature: constants::DEFAULT_TEMPERATURE,
            max_round_trips: constants::DEFAULT_MAX_ROUND_TRIPS,
            tool_timeout: Duration::from_secs(constants::DEFAULT_TOOL_TIMEOUT_SECS),
            provider_timeout: Duration::from_secs(constants::DEFAULT_PROVIDER_TIMEOUT_SECS),
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
        }
    }

    pub fn system_prompt(&self) -> String {
        system_prompt(&self.dao.name)
    }
}

pub fn system_prompt(dao_name: &str) -> String {
    format!(
        "You are a warm, helpful assistant for the {dao} DAO. Make the user feel welcome.\n\
        Use the available tools whenever the user asks about the DAO, its auctions or its proposals, \
        so that your answers rely on live data rather than memory.\n\
        Summarize tool results conversationally instead of repeating raw JSON. \
        Always translate epoch timestamps into human-readable dates and wei amounts into ETH.\n\
        If a tool reports an error or that something was not found, say so plainly and suggest what the user could ask instead.\n\
        Keep answers informative, accurate and easy to read.",
        dao = dao_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auction_key_uses_lowercased_contract() {
        let dao = DaoConfig::new("Yellow", "0xABCDEF", "base");
        assert_eq!(dao.auction_key(350), "0xabcdef:350");
        assert_eq!(dao.auction_key(351), "0xabcdef:351");
    }

    #[test]
    fn test_system_prompt_names_the_dao() {
        let prompt = system_prompt("Purple");
        assert!(prompt.contains("Purple DAO"));
        assert!(prompt.contains("wei"));
    }
}
