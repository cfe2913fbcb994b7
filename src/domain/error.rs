//! Domain error taxonomy.
//!
//! Three families: validation rejections (returned to the sender, state
//! unchanged), registration refusals (surfaced only to the connecting
//! client), and registry misses (unknown auction/instrument/agent). The
//! dispatch layer converts these into `Rejection` messages; nothing here
//! ever aborts the server.

use rust_decimal::Decimal;
use thiserror::Error;

use super::value::{AgentId, AuctionId, FullType, SecurityId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("insufficient holdings of {kind}: need {needed}, have {available}")]
    InsufficientHoldings {
        kind: FullType,
        needed: Decimal,
        available: Decimal,
    },

    #[error("bid of {offered} on {kind} is below the reserve floor {floor}")]
    BidBelowReserve {
        kind: FullType,
        floor: Decimal,
        offered: Decimal,
    },

    #[error("bid must improve the prior bid by at least {required}, offered {offered}")]
    IncrementNotMet { required: Decimal, offered: Decimal },

    #[error("bundle shape does not match the auctioned goods")]
    MalformedBundle,

    #[error("quantity {0} is not a positive amount")]
    InvalidQuantity(Decimal),

    #[error("auction {0} is closed")]
    AuctionClosed(AuctionId),

    #[error("auction {0} does not exist")]
    AuctionNotFound(AuctionId),

    #[error("auction id {0} is already registered")]
    DuplicateAuction(AuctionId),

    #[error("instrument id {0} is already registered")]
    DuplicateInstrument(SecurityId),

    #[error("instrument {0} does not exist")]
    InstrumentNotFound(SecurityId),

    #[error("instrument {0} does not support this operation")]
    UnsupportedOperation(SecurityId),

    #[error("an agent cannot trade with itself")]
    SelfTrade,

    #[error("trade request {0} is not pending")]
    RequestNotPending(uuid::Uuid),

    #[error("request may only be accepted by its addressed counterparty")]
    WrongCounterparty,

    #[error("agent {0} has no account")]
    UnknownAgent(AgentId),

    #[error("registration refused: {0}")]
    RegistrationRefused(String),
}
