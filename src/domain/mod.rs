//! Domain layer - Core market logic and value objects.
//!
//! Pure mechanism and bookkeeping logic for the auction server.
//! No I/O or transport dependencies here (hexagonal architecture inner
//! ring); everything is a value, serializable and testable in isolation.

pub mod account;
pub mod auction;
pub mod bid;
pub mod double_auction;
pub mod error;
pub mod ledger;
pub mod lmsr;
pub mod rules;
pub mod trading;
pub mod value;

// Re-export core types for convenience
pub use account::Account;
pub use auction::{AuctionOutcome, AuctionState, OneSidedAuction};
pub use bid::{Bid, BidBundle, MarketState};
pub use double_auction::{DoubleAuction, Fill, Side};
pub use error::MarketError;
pub use ledger::{Ledger, Transaction};
pub use lmsr::{LiquiditySensitive, LmsrBackend, MarketMaker};
pub use rules::{
    Allocation, AllocationRule, AuctionAnnouncement, FirstPriceRule, Mechanism, OpenOutcryRule,
    Payment, PaymentRule, SealedBidRule, SecondPriceRule, TieBreak,
};
pub use trading::TradeRequest;
pub use value::{
    AgentId, AuctionId, FullType, GoodKind, Outcome, PublicId, SecurityId, Tradeable,
    TradeableForm, WorldState,
};
