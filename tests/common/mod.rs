// Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dao_chat::config::DaoConfig;
use dao_chat::dao_data::{AuctionRecord, AuctionToken, Bid, DaoDataProvider, DaoRecord, DataError, ProposalRecord};
use dao_chat::llm_interaction::{
    ModelProvider, ModelRequest, ProviderError, ProviderEvent, ProviderStream, ToolCallRequest,
};
use dao_chat::orchestrator::{Orchestrator, TurnSettings};
use dao_chat::tools::ToolRegistry;
use futures::StreamExt;
use serde_json::{json, Value};

pub const YELLOW_CONTRACT: &str = "0x220e41499cf4d93a3629a5509410cbf9e6e0b109";

pub fn yellow() -> DaoConfig {
    DaoConfig::new("Yellow", YELLOW_CONTRACT, "base")
}

pub fn dao_record() -> DaoRecord {
    DaoRecord {
        name: "Yellow Collective".to_string(),
        symbol: "YELLOW".to_string(),
        project_uri: "https://yellowcollective.xyz".to_string(),
        description: "A DAO for the Yellow community".to_string(),
        contract_image: "ipfs://bafylogo".to_string(),
        total_supply: 420,
        owner_count: 180,
        proposal_count: 64,
        total_auction_sales: "12345000000000000000".to_string(),
    }
}

pub fn auction_record(token_id: u64, highest_bid: Option<Bid>) -> AuctionRecord {
    AuctionRecord {
        id: format!("{}:{}", YELLOW_CONTRACT, token_id),
        start_time: "1700000000".to_string(),
        end_time: "1700086400".to_string(),
        bid_count: if highest_bid.is_some() { 1 } else { 0 },
        first_bid_time: None,
        winning_bid: highest_bid.clone(),
        highest_bid,
        token: AuctionToken {
            name: format!("Yellow #{}", token_id),
            image: String::new(),
        },
    }
}

pub fn proposal_record(number: u64) -> ProposalRecord {
    ProposalRecord {
        proposal_number: number,
        title: "Fund the Yellow zine".to_string(),
        description: "## Summary\nPrint 500 zines.".to_string(),
        proposer: "0xabcdef0123456789abcdef0123456789abcdef01".to_string(),
        time_created: "1690000000".to_string(),
        vote_start: "1690086400".to_string(),
        vote_end: "1690345600".to_string(),
        for_votes: 25,
        against_votes: 3,
        abstain_votes: 1,
    }
}

/// In-memory data provider that records every lookup.
#[derive(Default)]
pub struct FakeDataProvider {
    pub calls: AtomicUsize,
    pub auction_keys: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
    pub current_auction: Option<AuctionRecord>,
    pub unavailable: bool,
}

impl FakeDataProvider {
    pub fn with_current_auction(auction: AuctionRecord) -> Self {
        Self {
            current_auction: Some(auction),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable {
            return Err(DataError::Unavailable("subgraph returned 503".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DaoDataProvider for FakeDataProvider {
    async fn get_dao(&self, _dao_id: &str) -> Result<DaoRecord, DataError> {
        self.enter().await?;
        Ok(dao_record())
    }

    async fn get_current_auction(&self, _dao_id: &str) -> Result<AuctionRecord, DataError> {
        self.enter().await?;
        self.current_auction
            .clone()
            .ok_or_else(|| DataError::NotFound("current auction".to_string()))
    }

    async fn get_auction(&self, auction_key: &str) -> Result<AuctionRecord, DataError> {
        self.enter().await?;
        self.auction_keys.lock().unwrap().push(auction_key.to_string());
        let token_id: u64 = auction_key
            .rsplit_once(':')
            .and_then(|(_, id)| id.parse().ok())
            .ok_or_else(|| DataError::NotFound(format!("auction {}", auction_key)))?;
        if token_id > 1000 {
            return Err(DataError::NotFound(format!("auction {}", auction_key)));
        }
        Ok(auction_record(
            token_id,
            Some(Bid {
                amount: "250000000000000000".to_string(),
                bidder: "0xabcdef0123456789abcdef0123456789abcdef01".to_string(),
                bid_time: None,
                id: None,
            }),
        ))
    }

    async fn get_proposal(&self, _dao_id: &str, number: u64) -> Result<ProposalRecord, DataError> {
        self.enter().await?;
        if number == 0 || number > 64 {
            return Err(DataError::NotFound(format!("proposal {}", number)));
        }
        Ok(proposal_record(number))
    }
}

/// One scripted model step.
pub enum Step {
    Events(Vec<ProviderEvent>),
    /// Some events, then a mid-stream failure.
    FailAfter(Vec<ProviderEvent>, ProviderError),
    /// The request itself fails.
    Reject(ProviderError),
}

pub fn text(delta: &str) -> ProviderEvent {
    ProviderEvent::TextDelta(delta.to_string())
}

pub fn tool_call(call_id: &str, tool_name: &str, args: Value) -> ProviderEvent {
    ProviderEvent::ToolCall(ToolCallRequest {
        call_id: call_id.to_string(),
        tool_name: tool_name.to_string(),
        args,
    })
}

/// Model provider that replays scripted steps and records each request. When the
/// script runs out, `fallback` is used for every further step.
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Box<dyn Fn(usize) -> Vec<ProviderEvent> + Send + Sync>>,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model that asks for a tool on every step, forever.
    pub fn always_calling(tool_name: &'static str) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Some(Box::new(move |step| {
                vec![tool_call(&format!("call{}", step), tool_name, json!({}))]
            })),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn open_stream(&self, request: &ModelRequest) -> Result<ProviderStream, ProviderError> {
        let step_index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let step = self.steps.lock().unwrap().pop_front();
        let items: Vec<Result<ProviderEvent, ProviderError>> = match step {
            Some(Step::Events(events)) => events.into_iter().map(Ok).collect(),
            Some(Step::FailAfter(events, err)) => events.into_iter().map(Ok).chain([Err(err)]).collect(),
            Some(Step::Reject(err)) => return Err(err),
            None => match &self.fallback {
                Some(fallback) => fallback(step_index).into_iter().map(Ok).collect(),
                None => vec![Ok(text("Done."))],
            },
        };
        Ok(futures::stream::iter(items).boxed())
    }
}

pub fn settings(max_round_trips: usize) -> TurnSettings {
    TurnSettings {
        model: "mistral-large-latest".to_string(),
        system_prompt: dao_chat::config::system_prompt("Yellow"),
        temperature: 0.2,
        max_round_trips,
    }
}

pub fn orchestrator(
    model: Arc<ScriptedModel>,
    data: Arc<FakeDataProvider>,
    max_round_trips: usize,
) -> Arc<Orchestrator> {
    let registry = ToolRegistry::new(data, yellow(), Duration::from_secs(2));
    Arc::new(Orchestrator::new(model, Arc::new(registry), settings(max_round_trips)))
}
