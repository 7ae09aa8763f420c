use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, instrument};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("data provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaoRecord {
    pub name: String,
    pub symbol: String,
    #[serde(rename = "projectURI", default)]
    pub project_uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contract_image: String,
    pub total_supply: u64,
    pub owner_count: u64,
    pub proposal_count: u64,
    /// Wei, as the decimal string the subgraph returns for BigInt.
    pub total_auction_sales: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub amount: String,
    pub bidder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionToken {
    pub name: String,
    #[serde(default)]
    pub image: String,
}

/// Both the live auction and settled auctions; the subgraph fills `highestBid` for the
/// former and `winningBid` for the latter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRecord {
    /// `{contract}:{tokenId}`
    pub id: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub bid_count: u64,
    #[serde(default)]
    pub first_bid_time: Option<String>,
    #[serde(default)]
    pub highest_bid: Option<Bid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_bid: Option<Bid>,
    pub token: AuctionToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    pub proposal_number: u64,
    pub title: String,
    pub description: String,
    pub proposer: String,
    pub time_created: String,
    pub vote_start: String,
    pub vote_end: String,
    pub for_votes: u64,
    pub against_votes: u64,
    pub abstain_votes: u64,
}

/// Read-only access to DAO data. Implementations make one outbound request per call.
#[async_trait]
pub trait DaoDataProvider: Send + Sync {
    async fn get_dao(&self, dao_id: &str) -> Result<DaoRecord, DataError>;
    async fn get_current_auction(&self, dao_id: &str) -> Result<AuctionRecord, DataError>;
    async fn get_auction(&self, auction_key: &str) -> Result<AuctionRecord, DataError>;
    async fn get_proposal(&self, dao_id: &str, number: u64) -> Result<ProposalRecord, DataError>;
}

const DAO_QUERY: &str = r#"query Dao($id: ID!) {
  dao(id: $id) {
    name symbol projectURI description contractImage
    totalSupply ownerCount proposalCount totalAuctionSales
  }
}"#;

const CURRENT_AUCTION_QUERY: &str = r#"query CurrentAuction($id: ID!) {
  dao(id: $id) {
    currentAuction {
      id startTime endTime bidCount firstBidTime
      highestBid { id amount bidTime bidder }
      token { name image }
    }
  }
}"#;

const AUCTION_QUERY: &str = r#"query Auction($id: ID!) {
  auction(id: $id) {
    id startTime endTime bidCount firstBidTime
    highestBid { id amount bidTime bidder }
    winningBid { amount bidder }
    token { name image }
  }
}"#;

const PROPOSAL_QUERY: &str = r#"query Proposal($dao: String!, $number: Int!) {
  proposals(where: { dao: $dao, proposalNumber: $number }, first: 1) {
    proposalNumber title description proposer timeCreated
    voteStart voteEnd forVotes againstVotes abstainVotes
  }
}"#;

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// GraphQL client for the Builder DAO subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: Client,
    endpoint: String,
}

impl SubgraphClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    #[instrument(skip(self, query), fields(endpoint = %self.endpoint))]
    async fn query(&self, query: &str, variables: Value) -> Result<Value, DataError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| DataError::Unavailable(format!("request to subgraph failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Subgraph request failed");
            return Err(DataError::Unavailable(format!("subgraph returned {}", status)));
        }

        let body = response
            .json::<GraphQlResponse>()
            .await
            .map_err(|e| DataError::Unavailable(format!("invalid subgraph response: {}", e)))?;

        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            error!(?messages, "Subgraph reported errors");
            return Err(DataError::Unavailable(messages.join("; ")));
        }

        debug!("Subgraph query succeeded");
        body.data
            .ok_or_else(|| DataError::Unavailable("subgraph response had no data".to_string()))
    }
}

/// Pull `data[field]` out and decode it; a JSON null means the entity does not exist.
fn decode_entity<T: DeserializeOwned>(value: Option<&Value>, what: &str) -> Result<T, DataError> {
    match value {
        None | Some(Value::Null) => Err(DataError::NotFound(what.to_string())),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| DataError::Unavailable(format!("unexpected {} shape: {}", what, e))),
    }
}

#[async_trait]
impl DaoDataProvider for SubgraphClient {
    async fn get_dao(&self, dao_id: &str) -> Result<DaoRecord, DataError> {
        let data = self.query(DAO_QUERY, json!({ "id": dao_id })).await?;
        decode_entity(data.get("dao"), &format!("DAO {}", dao_id))
    }

    async fn get_current_auction(&self, dao_id: &str) -> Result<AuctionRecord, DataError> {
        let data = self.query(CURRENT_AUCTION_QUERY, json!({ "id": dao_id })).await?;
        let dao = data
            .get("dao")
            .filter(|d| !d.is_null())
            .ok_or_else(|| DataError::NotFound(format!("DAO {}", dao_id)))?;
        decode_entity(dao.get("currentAuction"), "current auction")
    }

    async fn get_auction(&self, auction_key: &str) -> Result<AuctionRecord, DataError> {
        let data = self.query(AUCTION_QUERY, json!({ "id": auction_key })).await?;
        decode_entity(data.get("auction"), &format!("auction {}", auction_key))
    }

    async fn get_proposal(&self, dao_id: &str, number: u64) -> Result<ProposalRecord, DataError> {
        let data = self
            .query(PROPOSAL_QUERY, json!({ "dao": dao_id, "number": number }))
            .await?;
        let first = data
            .get("proposals")
            .and_then(|p| p.as_array())
            .and_then(|p| p.first());
        decode_entity(first, &format!("proposal {}", number))
    }
}
