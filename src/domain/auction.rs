//! One-sided auction state machine.
//!
//! Lifecycle: created Open, accumulates valid bids (each resets the
//! inactivity tick counter), `tick` advances the clock, and once the
//! allocation rule reports the auction over it closes exactly once. The
//! final allocation and payments are computed at close and are stable on
//! every subsequent read; a closed auction never reopens and rejects all
//! further bids.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::bid::{Bid, BidBundle};
use super::error::MarketError;
use super::rules::{
    Allocation, AllocationRule, AuctionAnnouncement, AuctionContext, Payment, PaymentRule,
};
use super::value::{AgentId, AuctionId, Tradeable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionState {
    Open,
    Closed,
}

/// Result of a closed auction, read-only after close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionOutcome {
    pub allocation: Allocation,
    pub payments: Vec<Payment>,
}

pub struct OneSidedAuction {
    id: AuctionId,
    items: Vec<Tradeable>,
    bids: Vec<Bid>,
    reserve: BidBundle,
    ticks: u32,
    state: AuctionState,
    outcome: Option<AuctionOutcome>,
    allocation_rule: Box<dyn AllocationRule>,
    payment_rule: Box<dyn PaymentRule>,
    increment: Decimal,
    maximizing_revenue: bool,
}

impl std::fmt::Debug for OneSidedAuction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneSidedAuction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("bids", &self.bids.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl OneSidedAuction {
    pub fn new(
        id: AuctionId,
        items: Vec<Tradeable>,
        reserve: BidBundle,
        allocation_rule: Box<dyn AllocationRule>,
        payment_rule: Box<dyn PaymentRule>,
        increment: Decimal,
    ) -> Self {
        Self {
            id,
            items,
            bids: Vec::new(),
            reserve,
            ticks: 0,
            state: AuctionState::Open,
            outcome: None,
            allocation_rule,
            payment_rule,
            increment,
            maximizing_revenue: false,
        }
    }

    pub fn id(&self) -> AuctionId {
        self.id
    }

    pub fn state(&self) -> AuctionState {
        self.state
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    /// Number of reserve entries carrying an agent claim.
    pub fn eligibility(&self) -> usize {
        self.reserve.eligibility()
    }

    pub fn set_maximizing_revenue(&mut self, maximizing: bool) {
        self.maximizing_revenue = maximizing;
    }

    fn context(&self) -> AuctionContext<'_> {
        AuctionContext {
            auction: self.id,
            bids: &self.bids,
            items: &self.items,
            reserve: &self.reserve,
            ticks: self.ticks,
            increment: self.increment,
            maximizing_revenue: self.maximizing_revenue,
        }
    }

    /// Submit a bid on behalf of an authenticated agent.
    ///
    /// The bundle is re-stamped with `agent` regardless of what the client
    /// claimed. A valid bid resets the inactivity counter; an invalid one
    /// changes nothing and surfaces its reason.
    pub fn add_bid(&mut self, agent: AgentId, bundle: BidBundle) -> Result<(), MarketError> {
        if self.state == AuctionState::Closed {
            return Err(MarketError::AuctionClosed(self.id));
        }
        let bid = Bid::new(self.id, agent, bundle);
        self.allocation_rule.validate(&bid, &self.context())?;
        self.bids.push(bid);
        self.ticks = 0;
        Ok(())
    }

    /// Advance the auction clock by one tick. No effect once closed.
    pub fn tick(&mut self) {
        if self.state == AuctionState::Open {
            self.ticks += 1;
        }
    }

    /// Whether the auction has reached a terminal state.
    pub fn is_over(&self) -> bool {
        self.state == AuctionState::Closed || self.allocation_rule.is_over(&self.context())
    }

    /// Close the auction, computing the final allocation and payments.
    ///
    /// Idempotent: the first call fixes the outcome, later calls return
    /// the same value.
    pub fn close(&mut self) -> &AuctionOutcome {
        if self.outcome.is_none() {
            let (allocation, payments) = {
                let ctx = self.context();
                let allocation = self.allocation_rule.allocate(&ctx);
                let payments = self.payment_rule.payments(&allocation, &ctx);
                (allocation, payments)
            };
            self.outcome = Some(AuctionOutcome {
                allocation,
                payments,
            });
            self.state = AuctionState::Closed;
        }
        self.outcome.as_ref().expect("outcome fixed above")
    }

    /// The final outcome; None until the auction has closed.
    pub fn outcome(&self) -> Option<&AuctionOutcome> {
        self.outcome.as_ref()
    }

    /// Mechanism-specific public announcement for one recipient.
    pub fn announcement(&self, recipient: AgentId) -> AuctionAnnouncement {
        self.allocation_rule.announce(&self.context(), recipient)
    }
}
