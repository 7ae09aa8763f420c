// Environment-backed defaults. Only `main` reads these; everything else receives a
// `ChatConfig` built from them.

use std::env;

// Use lazy_static to initialize static variables safely.
lazy_static::lazy_static! {
    pub static ref MISTRAL_API_URL: String = env::var("MISTRAL_API_URL").unwrap_or_else(|_| "https://api.mistral.ai/v1/chat/completions".to_string());
    pub static ref MISTRAL_API_KEY: String = env::var("MISTRAL_API_KEY").unwrap_or_default();
    pub static ref DAO_CHAT_MODEL: String = env::var("DAO_CHAT_MODEL").unwrap_or_else(|_| "mistral-large-latest".to_string());
    // Builder DAO subgraph on Base, hosted by Goldsky
    pub static ref DAO_SUBGRAPH_URL: String = env::var("DAO_SUBGRAPH_URL").unwrap_or_else(|_| "https://api.goldsky.com/api/public/project_clkk1ucdyf6ak38svcatie9tf/subgraphs/nouns-builder-base-mainnet/stable/gn".to_string());
    pub static ref DAO_CONTRACT_ADDRESS: String = env::var("DAO_CONTRACT_ADDRESS").unwrap_or_else(|_| "0x220e41499cf4d93a3629a5509410cbf9e6e0b109".to_string());
    pub static ref DAO_NAME: String = env::var("DAO_NAME").unwrap_or_else(|_| "Yellow".to_string());
    pub static ref DAO_CHAIN: String = env::var("DAO_CHAIN").unwrap_or_else(|_| "base".to_string());
}

pub const DEFAULT_PORT: u16 = 9900;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_ROUND_TRIPS: usize = 5;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;

pub const QUICK_QUESTIONS: [&str; 4] = [
    "What is proposal 1 in Yellow ?",
    "How much is the current bid auction now?",
    "How long until the auction ends?",
    "Who won auction 350?",
];
