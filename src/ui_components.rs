//! Presentation of tool invocations as cards.
//!
//! A [`Card`] is plain data: the web UI renders it through `card.html`, the terminal
//! client through [`Card::to_text`]. All formatting (wei, timestamps, addresses) happens
//! here so both surfaces agree.

use chrono::DateTime;
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use serde::Serialize;
use serde_json::Value;

use crate::config::DaoConfig;
use crate::dao_data::{AuctionRecord, DaoRecord, ProposalRecord};
use crate::tools::{ToolName, ToolResult};
use crate::{InvocationState, ToolInvocation};

pub const IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";
pub const INVALID_DATE: &str = "Invalid Date";

const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Exact wei → ETH conversion with trailing zeros trimmed. `None` if `wei` is not a
/// non-negative integer that fits in 128 bits.
pub fn wei_to_eth(wei: &str) -> Option<String> {
    let wei: u128 = wei.trim().parse().ok()?;
    let whole = wei / WEI_PER_ETH;
    let frac = wei % WEI_PER_ETH;
    if frac == 0 {
        return Some(whole.to_string());
    }
    let frac = format!("{:018}", frac);
    Some(format!("{}.{}", whole, frac.trim_end_matches('0')))
}

/// ETH rounded half-up to two decimals.
pub fn wei_to_eth_fixed(wei: &str) -> Option<String> {
    let wei: u128 = wei.trim().parse().ok()?;
    let cents = wei.checked_add(WEI_PER_ETH / 200)? / (WEI_PER_ETH / 100);
    Some(format!("{}.{:02}", cents / 100, cents % 100))
}

pub fn format_eth(wei: &str) -> String {
    match wei_to_eth(wei) {
        Some(eth) => format!("{} ETH", eth),
        None => format!("{} wei", wei),
    }
}

pub fn format_eth_fixed(wei: &str) -> String {
    match wei_to_eth_fixed(wei) {
        Some(eth) => format!("{} ETH", eth),
        None => format!("{} wei", wei),
    }
}

/// Epoch seconds to e.g. `Jan 1, 1970, 12:00 AM` (UTC).
pub fn format_timestamp(epoch_secs: &str) -> String {
    epoch_secs
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%b %-d, %Y, %-I:%M %p").to_string())
        .unwrap_or_else(|| INVALID_DATE.to_string())
}

pub fn time_remaining(end_time: &str, now: i64) -> String {
    let Ok(end) = end_time.trim().parse::<i64>() else {
        return INVALID_DATE.to_string();
    };
    let Some(left) = end.checked_sub(now) else {
        return INVALID_DATE.to_string();
    };
    if left <= 0 {
        return "Auction ended".to_string();
    }
    format!("{}h {}m remaining", left / 3600, (left % 3600) / 60)
}

/// Render markdown to HTML for the chat page.
///
/// Raw HTML in the source is shown as text and `javascript:`-style link targets are
/// dropped, so model replies and proposal descriptions can be inserted as-is.
pub fn markdown_to_html(text: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let events = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        other => other,
    });
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    let scheme = url.split_once(':').map(|(scheme, _)| scheme.to_ascii_lowercase());
    match scheme.as_deref() {
        None | Some("http") | Some("https") | Some("mailto") | Some("ipfs") => url,
        // Relative paths and fragments with a colon later on
        Some(s) if s.contains(['/', '?', '#']) => url,
        Some(_) => CowStr::Borrowed("#"),
    }
}

/// `0x1234...abcd`
pub fn truncate_address(address: &str) -> String {
    if !address.is_ascii() || address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

pub fn ipfs_to_http(uri: &str) -> String {
    match uri.strip_prefix("ipfs://") {
        Some(cid) => format!("{}{}", IPFS_GATEWAY, cid),
        None => uri.to_string(),
    }
}

pub fn address_url(address: &str) -> String {
    format!("https://blockscan.com/address/{}", address)
}

/// Link to a token's auction page. `auction_id` is the subgraph id `{contract}:{tokenId}`.
pub fn auction_url(dao: &DaoConfig, auction_id: &str) -> String {
    let token_id = auction_id.rsplit_once(':').map_or(auction_id, |(_, id)| id);
    format!("https://nouns.build/dao/{}/{}/{}", dao.chain, dao.contract_address, token_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaoCard {
    pub name: String,
    pub symbol: String,
    pub image_url: String,
    pub description: String,
    pub total_supply: u64,
    pub owner_count: u64,
    pub proposal_count: u64,
    pub total_auction_sales: String,
    pub project_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentAuctionCard {
    pub token_name: String,
    pub image_url: String,
    pub auction_url: String,
    /// Formatted amount, or "No bids yet".
    pub highest_bid: String,
    pub highest_bidder: Option<String>,
    pub bid_count: u64,
    pub start_time: String,
    pub end_time: String,
    pub time_remaining: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionCard {
    pub token_name: String,
    pub image_url: String,
    pub auction_url: String,
    pub winning_bid: String,
    pub winner: Option<String>,
    pub winner_url: Option<String>,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalCard {
    pub number: u64,
    pub title: String,
    pub created: String,
    pub proposer: String,
    pub proposer_url: String,
    pub voting_period: String,
    pub for_votes: u64,
    pub against_votes: u64,
    pub abstain_votes: u64,
    /// Markdown, as written by the proposer.
    pub description: String,
    pub description_html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Card {
    Pending { tool_name: String },
    Dao(DaoCard),
    CurrentAuction(CurrentAuctionCard),
    Auction(AuctionCard),
    Proposal(ProposalCard),
    Failure { tool_name: String, message: String },
    /// Results of tools without a dedicated card, shown as JSON.
    Raw { tool_name: String, json: String },
}

pub fn dao_card(dao: &DaoRecord) -> DaoCard {
    DaoCard {
        name: dao.name.clone(),
        symbol: dao.symbol.clone(),
        image_url: ipfs_to_http(&dao.contract_image),
        description: dao.description.clone(),
        total_supply: dao.total_supply,
        owner_count: dao.owner_count,
        proposal_count: dao.proposal_count,
        total_auction_sales: format_eth_fixed(&dao.total_auction_sales),
        project_url: dao.project_uri.clone(),
    }
}

pub fn current_auction_card(dao: &DaoConfig, auction: &AuctionRecord, now: i64) -> CurrentAuctionCard {
    let (highest_bid, highest_bidder) = match &auction.highest_bid {
        Some(bid) => (format_eth(&bid.amount), Some(truncate_address(&bid.bidder))),
        None => ("No bids yet".to_string(), None),
    };
    CurrentAuctionCard {
        token_name: auction.token.name.clone(),
        image_url: ipfs_to_http(&auction.token.image),
        auction_url: auction_url(dao, &auction.id),
        highest_bid,
        highest_bidder,
        bid_count: auction.bid_count,
        start_time: format_timestamp(&auction.start_time),
        end_time: format_timestamp(&auction.end_time),
        time_remaining: time_remaining(&auction.end_time, now),
    }
}

pub fn auction_card(dao: &DaoConfig, auction: &AuctionRecord) -> AuctionCard {
    let (winning_bid, winner, winner_url) = match &auction.winning_bid {
        Some(bid) => (
            format_eth(&bid.amount),
            Some(truncate_address(&bid.bidder)),
            Some(address_url(&bid.bidder)),
        ),
        None => ("No winning bid".to_string(), None, None),
    };
    AuctionCard {
        token_name: auction.token.name.clone(),
        image_url: ipfs_to_http(&auction.token.image),
        auction_url: auction_url(dao, &auction.id),
        winning_bid,
        winner,
        winner_url,
        start_time: format_timestamp(&auction.start_time),
        end_time: format_timestamp(&auction.end_time),
    }
}

pub fn proposal_card(proposal: &ProposalRecord) -> ProposalCard {
    ProposalCard {
        number: proposal.proposal_number,
        title: proposal.title.clone(),
        created: format_timestamp(&proposal.time_created),
        proposer: truncate_address(&proposal.proposer),
        proposer_url: address_url(&proposal.proposer),
        voting_period: format!(
            "{} - {}",
            format_timestamp(&proposal.vote_start),
            format_timestamp(&proposal.vote_end)
        ),
        for_votes: proposal.for_votes,
        against_votes: proposal.against_votes,
        abstain_votes: proposal.abstain_votes,
        description: proposal.description.clone(),
        description_html: markdown_to_html(&proposal.description),
    }
}

/// Pick the card for an invocation. `now` is the current epoch time in seconds.
pub fn render_tool_invocation(invocation: &ToolInvocation, dao: &DaoConfig, now: i64) -> Card {
    let tool_name = invocation.tool_name.clone();
    let result = match &invocation.state {
        InvocationState::Pending => return Card::Pending { tool_name },
        InvocationState::Resolved { result } => result,
    };
    let data = match result {
        ToolResult::Success { data } => data,
        ToolResult::Failure { message, .. } => {
            return Card::Failure {
                tool_name,
                message: message.clone(),
            }
        }
    };

    let card = match ToolName::parse(&tool_name) {
        Some(ToolName::GetDaoInfo) => decode::<DaoRecord>(data).map(|dao| Card::Dao(dao_card(&dao))),
        Some(ToolName::GetCurrentAuction) => decode::<AuctionRecord>(data)
            .map(|auction| Card::CurrentAuction(current_auction_card(dao, &auction, now))),
        Some(ToolName::GetAuction) => {
            decode::<AuctionRecord>(data).map(|auction| Card::Auction(auction_card(dao, &auction)))
        }
        Some(ToolName::GetProposal) => {
            decode::<ProposalRecord>(data).map(|proposal| Card::Proposal(proposal_card(&proposal)))
        }
        None => None,
    };
    card.unwrap_or_else(|| Card::Raw {
        json: serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()),
        tool_name,
    })
}

fn decode<T: serde::de::DeserializeOwned>(data: &Value) -> Option<T> {
    serde_json::from_value(data.clone()).ok()
}

impl Card {
    /// Plain-text rendering for the terminal client.
    pub fn to_text(&self) -> String {
        match self {
            Card::Pending { tool_name } => format!("Calling {}...", tool_name),
            Card::Dao(card) => {
                let mut lines = vec![
                    format!("== {} ({}) ==", card.name, card.symbol),
                    format!("Total supply: {}", card.total_supply),
                    format!("Owners: {}", card.owner_count),
                    format!("Proposals: {}", card.proposal_count),
                    format!("Total auction sales: {}", card.total_auction_sales),
                ];
                if !card.project_url.is_empty() {
                    lines.push(format!("Project: {}", card.project_url));
                }
                lines.join("\n")
            }
            Card::CurrentAuction(card) => {
                let mut lines = vec![
                    format!("== {} ==", card.token_name),
                    format!("Highest bid: {}", card.highest_bid),
                ];
                if let Some(bidder) = &card.highest_bidder {
                    lines.push(format!("Bidder: {}", bidder));
                }
                lines.extend([
                    format!("Bids: {}", card.bid_count),
                    format!("Started: {}", card.start_time),
                    format!("Ends: {}", card.end_time),
                    card.time_remaining.clone(),
                    card.auction_url.clone(),
                ]);
                lines.join("\n")
            }
            Card::Auction(card) => {
                let mut lines = vec![
                    format!("== {} ==", card.token_name),
                    format!("Winning bid: {}", card.winning_bid),
                ];
                if let Some(winner) = &card.winner {
                    lines.push(format!("Winner: {}", winner));
                }
                lines.extend([
                    format!("Started: {}", card.start_time),
                    format!("Ended: {}", card.end_time),
                    card.auction_url.clone(),
                ]);
                lines.join("\n")
            }
            Card::Proposal(card) => [
                format!("== Proposal {}: {} ==", card.number, card.title),
                format!("Created: {}", card.created),
                format!("Proposer: {}", card.proposer),
                format!("Voting: {}", card.voting_period),
                format!(
                    "For: {}  Against: {}  Abstain: {}",
                    card.for_votes, card.against_votes, card.abstain_votes
                ),
                String::new(),
                card.description.clone(),
            ]
            .join("\n"),
            Card::Failure { tool_name, message } => format!("{} failed: {}", tool_name, message),
            Card::Raw { tool_name, json } => format!("{}:\n{}", tool_name, json),
        }
    }
}
