//! Transport Port - Typed Message Boundary
//!
//! Defines the typed messages that cross the server boundary and the
//! trait an outbound transport must implement. The core never touches
//! raw bytes: adapters decode frames into `Inbound` and encode
//! `Outbound` on the way back out.

use std::net::SocketAddr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::account::Account;
use crate::domain::bid::BidBundle;
use crate::domain::rules::AuctionAnnouncement;
use crate::domain::trading::TradeRequest;
use crate::domain::value::{
  AgentId, AuctionId, FullType, Outcome, PublicId, SecurityId, Tradeable,
};
use crate::domain::Side;

/// Transport-level connection handle.
pub type ConnectionId = u64;

/// Network origin of a connection; registration pins an agent id to it.
pub type Origin = SocketAddr;

/// An inbound message together with where it came from.
#[derive(Debug, Clone)]
pub struct Envelope {
  pub connection: ConnectionId,
  pub origin: Origin,
  pub message: Inbound,
}

/// Every message a client may send. Dispatch matches exhaustively;
/// anything that fails to decode never reaches the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Inbound {
  /// Connect as a new agent, or reconnect with a previously assigned id.
  Register { reconnect: Option<AgentId> },
  /// Bid into a one-sided auction. The agent id is NEVER taken from the
  /// payload; the server stamps the sender's authenticated id.
  Bid { auction: AuctionId, bundle: BidBundle },
  /// Buy/sell against a market-maker instrument.
  Purchase {
    security: SecurityId,
    buy: Decimal,
    sell: Decimal,
  },
  /// Submit a limit order to a double-auction book.
  Order {
    security: SecurityId,
    side: Side,
    price: Decimal,
    quantity: Decimal,
  },
  /// Propose a bilateral trade to one agent or to everyone.
  TradeRequest {
    to: Option<PublicId>,
    cash_offered: Decimal,
    goods_offered: Vec<Tradeable>,
    cash_requested: Decimal,
    goods_requested: Vec<Tradeable>,
  },
  /// Accept or reject a pending trade request.
  TradeDecision { request: Uuid, accept: bool },
}

/// Public market state pushed to all agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketSnapshot {
  Prediction {
    security: SecurityId,
    kind: FullType,
    price_yes: Decimal,
    price_no: Decimal,
    depth: Decimal,
  },
  Book {
    security: SecurityId,
    kind: FullType,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
    last: Option<Decimal>,
  },
}

/// Every message the server may push to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outbound {
  /// Registration succeeded: the private id authorizes future requests,
  /// the public id is what other agents see.
  Registered { agent: AgentId, public: PublicId },
  /// A request was refused; references the offending message verbatim.
  Rejection {
    reason: String,
    request: Box<Inbound>,
  },
  /// Per-recipient auction state announcement.
  BidRequest(AuctionAnnouncement),
  /// Public market state.
  MarketUpdate(MarketSnapshot),
  /// Account snapshot before/after a settlement touching the recipient.
  BankUpdate {
    old: Option<Account>,
    new: Account,
  },
  /// A pending trade request forwarded for consideration.
  TradeRequested(TradeRequest),
  /// An instrument resolved; holdings of `security` were converted.
  Settlement {
    security: FullType,
    outcome: Outcome,
    realized: Decimal,
  },
}

/// Outbound delivery: push to one connection or to every connection.
///
/// Adapters own framing and serialization; delivery failures to a single
/// connection are the adapter's problem and must not poison the others.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  async fn send(&self, connection: ConnectionId, message: Outbound) -> anyhow::Result<()>;

  async fn broadcast(&self, message: Outbound) -> anyhow::Result<()>;
}
