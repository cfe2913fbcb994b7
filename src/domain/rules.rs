//! Pluggable auction policies.
//!
//! An `AllocationRule` decides validity, winners, closing, and what each
//! recipient may see; a `PaymentRule` independently decides what winners
//! owe. The reserve bundle enters ranking as a synthetic opposing bid, so
//! the price floor is enforced by ordinary comparison rather than a
//! special case: when the reserve "wins" a good, the good stays unsold.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::bid::{Bid, BidBundle, MarketState};
use super::error::MarketError;
use super::value::{AgentId, AuctionId, FullType, Tradeable};

/// Mechanism label carried in announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mechanism {
    SealedBid,
    OpenOutcry,
}

/// How equal-price bids are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// Earliest bid wins.
    Arrival,
    /// Lowest agent id wins.
    AgentId,
}

/// Read-only view of auction state handed to the rules.
#[derive(Debug)]
pub struct AuctionContext<'a> {
    pub auction: AuctionId,
    pub bids: &'a [Bid],
    pub items: &'a [Tradeable],
    pub reserve: &'a BidBundle,
    pub ticks: u32,
    pub increment: Decimal,
    pub maximizing_revenue: bool,
}

/// Winner set: the best claim per good, plus the concrete awards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Best claim per good; `agent: None` means the reserve won (unsold).
    pub winning: BTreeMap<FullType, MarketState>,
    /// Items reassigned to their winners.
    pub awards: Vec<(AgentId, Tradeable)>,
}

/// Amount one winner owes at settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub agent: AgentId,
    pub amount: Decimal,
}

/// Per-recipient public announcement of auction state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionAnnouncement {
    pub auction: AuctionId,
    pub mechanism: Mechanism,
    pub ticks_remaining: u32,
    pub increment: Decimal,
    /// Best visible price per good; empty for private mechanisms.
    pub best: BTreeMap<FullType, Decimal>,
    /// Goods on which the recipient currently holds the best bid.
    pub leading: Vec<FullType>,
}

/// Policy deciding bid validity, winners, and closing.
pub trait AllocationRule: Send + std::fmt::Debug {
    fn mechanism(&self) -> Mechanism;

    /// Whether other agents' bids are visible in announcements.
    fn is_public(&self) -> bool;

    /// Accept or reject a bid against the current state. Rejection leaves
    /// the auction untouched.
    fn validate(&self, bid: &Bid, ctx: &AuctionContext<'_>) -> Result<(), MarketError>;

    /// Whether the auction should close at the current tick count.
    fn is_over(&self, ctx: &AuctionContext<'_>) -> bool;

    /// Compute the winner set from bids and the reserve.
    fn allocate(&self, ctx: &AuctionContext<'_>) -> Allocation;

    /// Build the announcement for one recipient.
    fn announce(&self, ctx: &AuctionContext<'_>, recipient: AgentId) -> AuctionAnnouncement;
}

/// Policy computing what winners owe, independent of allocation logic.
pub trait PaymentRule: Send + std::fmt::Debug {
    fn payments(&self, allocation: &Allocation, ctx: &AuctionContext<'_>) -> Vec<Payment>;
}

// ────────────────────────────────────────────
// Shared ranking over bids + reserve
// ────────────────────────────────────────────

/// Best claim per auctioned good, the reserve merged in as a bid that
/// loses every tie against a real agent.
fn best_per_good(ctx: &AuctionContext<'_>, tie: TieBreak) -> BTreeMap<FullType, MarketState> {
    let mut winning = BTreeMap::new();
    for (kind, floor) in ctx.reserve.demand() {
        let mut best = MarketState::new(None, floor.price);
        for bid in ctx.bids {
            let Some(offer) = bid.bundle.get(kind) else {
                continue;
            };
            let replaces = if offer.price > best.price {
                true
            } else if offer.price == best.price {
                match (best.agent, tie) {
                    // A real bid at the floor clears the reserve.
                    (None, _) => true,
                    (Some(_), TieBreak::Arrival) => false,
                    (Some(current), TieBreak::AgentId) => bid.agent < current,
                }
            } else {
                false
            };
            if replaces {
                best = MarketState::new(Some(bid.agent), offer.price);
            }
        }
        winning.insert(*kind, best);
    }
    winning
}

fn award_items(
    winning: &BTreeMap<FullType, MarketState>,
    items: &[Tradeable],
) -> Vec<(AgentId, Tradeable)> {
    items
        .iter()
        .filter_map(|item| {
            let state = winning.get(&item.kind)?;
            let agent = state.agent?;
            Some((agent, item.with_owner(agent)))
        })
        .collect()
}

fn check_shape_and_reserve(bid: &Bid, ctx: &AuctionContext<'_>) -> Result<(), MarketError> {
    if !bid.bundle.shape_matches(ctx.reserve) {
        return Err(MarketError::MalformedBundle);
    }
    for (kind, offer) in bid.bundle.demand() {
        let floor = ctx
            .reserve
            .get(kind)
            .map(|s| s.price)
            .unwrap_or(Decimal::ZERO);
        if offer.price < floor {
            return Err(MarketError::BidBelowReserve {
                kind: *kind,
                floor,
                offered: offer.price,
            });
        }
    }
    Ok(())
}

fn leading_goods(ctx: &AuctionContext<'_>, recipient: AgentId, tie: TieBreak) -> Vec<FullType> {
    best_per_good(ctx, tie)
        .into_iter()
        .filter(|(_, state)| state.agent == Some(recipient))
        .map(|(kind, _)| kind)
        .collect()
}

// ────────────────────────────────────────────
// Sealed-bid rule
// ────────────────────────────────────────────

/// One-shot sealed auction: bids are private, the auction closes after a
/// fixed tick budget regardless of activity.
#[derive(Debug, Clone)]
pub struct SealedBidRule {
    tick_budget: u32,
    tie: TieBreak,
}

impl SealedBidRule {
    pub fn new(tick_budget: u32, tie: TieBreak) -> Self {
        Self { tick_budget, tie }
    }
}

impl AllocationRule for SealedBidRule {
    fn mechanism(&self) -> Mechanism {
        Mechanism::SealedBid
    }

    fn is_public(&self) -> bool {
        false
    }

    fn validate(&self, bid: &Bid, ctx: &AuctionContext<'_>) -> Result<(), MarketError> {
        check_shape_and_reserve(bid, ctx)
    }

    fn is_over(&self, ctx: &AuctionContext<'_>) -> bool {
        ctx.ticks >= self.tick_budget
    }

    fn allocate(&self, ctx: &AuctionContext<'_>) -> Allocation {
        let winning = best_per_good(ctx, self.tie);
        let awards = award_items(&winning, ctx.items);
        Allocation { winning, awards }
    }

    fn announce(&self, ctx: &AuctionContext<'_>, _recipient: AgentId) -> AuctionAnnouncement {
        // Sealed: time remaining only, no other agent's bid is revealed.
        AuctionAnnouncement {
            auction: ctx.auction,
            mechanism: Mechanism::SealedBid,
            ticks_remaining: self.tick_budget.saturating_sub(ctx.ticks),
            increment: ctx.increment,
            best: BTreeMap::new(),
            leading: Vec::new(),
        }
    }
}

// ────────────────────────────────────────────
// Open-outcry rule
// ────────────────────────────────────────────

/// Iterative English auction: the best standing bid is public, each agent
/// must raise their own prior bid by the increment, and the auction closes
/// after a run of ticks with no valid bid.
#[derive(Debug, Clone)]
pub struct OpenOutcryRule {
    idle_ticks: u32,
    tie: TieBreak,
}

impl OpenOutcryRule {
    pub fn new(idle_ticks: u32, tie: TieBreak) -> Self {
        Self { idle_ticks, tie }
    }
}

impl AllocationRule for OpenOutcryRule {
    fn mechanism(&self) -> Mechanism {
        Mechanism::OpenOutcry
    }

    fn is_public(&self) -> bool {
        true
    }

    fn validate(&self, bid: &Bid, ctx: &AuctionContext<'_>) -> Result<(), MarketError> {
        check_shape_and_reserve(bid, ctx)?;
        for (kind, offer) in bid.bundle.demand() {
            let own_best = ctx
                .bids
                .iter()
                .filter(|prior| prior.agent == bid.agent)
                .filter_map(|prior| prior.bundle.get(kind))
                .map(|s| s.price)
                .max();
            if let Some(prior) = own_best {
                let required = prior + ctx.increment;
                if offer.price < required {
                    return Err(MarketError::IncrementNotMet {
                        required,
                        offered: offer.price,
                    });
                }
            }
        }
        Ok(())
    }

    fn is_over(&self, ctx: &AuctionContext<'_>) -> bool {
        ctx.ticks >= self.idle_ticks
    }

    fn allocate(&self, ctx: &AuctionContext<'_>) -> Allocation {
        let winning = best_per_good(ctx, self.tie);
        let awards = award_items(&winning, ctx.items);
        Allocation { winning, awards }
    }

    fn announce(&self, ctx: &AuctionContext<'_>, recipient: AgentId) -> AuctionAnnouncement {
        let best = best_per_good(ctx, self.tie)
            .into_iter()
            .map(|(kind, state)| (kind, state.price))
            .collect();
        AuctionAnnouncement {
            auction: ctx.auction,
            mechanism: Mechanism::OpenOutcry,
            ticks_remaining: self.idle_ticks.saturating_sub(ctx.ticks),
            increment: ctx.increment,
            best,
            leading: leading_goods(ctx, recipient, self.tie),
        }
    }
}

// ────────────────────────────────────────────
// Payment rules
// ────────────────────────────────────────────

/// Winners pay their own winning bid.
#[derive(Debug, Clone, Copy)]
pub struct FirstPriceRule;

impl PaymentRule for FirstPriceRule {
    fn payments(&self, allocation: &Allocation, _ctx: &AuctionContext<'_>) -> Vec<Payment> {
        let mut owed: BTreeMap<AgentId, Decimal> = BTreeMap::new();
        for state in allocation.winning.values() {
            if let Some(agent) = state.agent {
                *owed.entry(agent).or_insert(Decimal::ZERO) += state.price;
            }
        }
        owed.into_iter()
            .map(|(agent, amount)| Payment { agent, amount })
            .collect()
    }
}

/// Vickrey: winners pay the highest rejected opposing price — the best
/// bid from any other agent, floored by the reserve.
#[derive(Debug, Clone, Copy)]
pub struct SecondPriceRule;

impl PaymentRule for SecondPriceRule {
    fn payments(&self, allocation: &Allocation, ctx: &AuctionContext<'_>) -> Vec<Payment> {
        let mut owed: BTreeMap<AgentId, Decimal> = BTreeMap::new();
        for (kind, state) in &allocation.winning {
            let Some(winner) = state.agent else {
                continue;
            };
            let floor = ctx
                .reserve
                .get(kind)
                .map(|s| s.price)
                .unwrap_or(Decimal::ZERO);
            let second = ctx
                .bids
                .iter()
                .filter(|bid| bid.agent != winner)
                .filter_map(|bid| bid.bundle.get(kind))
                .map(|s| s.price)
                .max()
                .map_or(floor, |best_other| best_other.max(floor));
            *owed.entry(winner).or_insert(Decimal::ZERO) += second;
        }
        owed.into_iter()
            .map(|(agent, amount)| Payment { agent, amount })
            .collect()
    }
}
