//! Bids and bid bundles.
//!
//! A `BidBundle` prices a (possibly multi-good) demand set; the same shape
//! doubles as the reserve: a bundle of per-good price floors with no owner.
//! The agent id on a `Bid` is always stamped by the server after the sender
//! is authenticated — a client-supplied id is never trusted.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value::{AgentId, AuctionId, FullType};

/// Priced claim on one good inside a bundle. `agent` is None for reserve
/// entries and for goods that ended unsold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub agent: Option<AgentId>,
    pub price: Decimal,
}

impl MarketState {
    pub const fn new(agent: Option<AgentId>, price: Decimal) -> Self {
        Self { agent, price }
    }
}

/// A priced, possibly multi-good offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidBundle {
    demand: BTreeMap<FullType, MarketState>,
}

impl BidBundle {
    pub fn new(demand: BTreeMap<FullType, MarketState>) -> Self {
        Self { demand }
    }

    /// Single-good bundle.
    pub fn single(kind: FullType, agent: Option<AgentId>, price: Decimal) -> Self {
        let mut demand = BTreeMap::new();
        demand.insert(kind, MarketState::new(agent, price));
        Self { demand }
    }

    /// Reserve bundle: one zero floor per good, no owner.
    pub fn zero_reserve(kinds: impl IntoIterator<Item = FullType>) -> Self {
        let demand = kinds
            .into_iter()
            .map(|k| (k, MarketState::new(None, Decimal::ZERO)))
            .collect();
        Self { demand }
    }

    pub fn demand(&self) -> &BTreeMap<FullType, MarketState> {
        &self.demand
    }

    pub fn get(&self, kind: &FullType) -> Option<&MarketState> {
        self.demand.get(kind)
    }

    /// Total price across the demand set.
    pub fn cost(&self) -> Decimal {
        self.demand.values().map(|s| s.price).sum()
    }

    /// The bidding agent, if any entry names one.
    pub fn agent(&self) -> Option<AgentId> {
        self.demand.values().find_map(|s| s.agent)
    }

    /// Whether this bundle prices exactly the same goods as `other`.
    pub fn shape_matches(&self, other: &Self) -> bool {
        self.demand.len() == other.demand.len()
            && self.demand.keys().all(|k| other.demand.contains_key(k))
    }

    /// Re-stamp every entry with the authenticated agent id.
    pub fn stamped(&self, agent: AgentId) -> Self {
        let demand = self
            .demand
            .iter()
            .map(|(k, s)| (*k, MarketState::new(Some(agent), s.price)))
            .collect();
        Self { demand }
    }

    /// Number of reserve entries carrying an agent (auction eligibility).
    pub fn eligibility(&self) -> usize {
        self.demand.values().filter(|s| s.agent.is_some()).count()
    }
}

/// A bundle bound to an auction by an authenticated agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub auction: AuctionId,
    pub agent: AgentId,
    pub bundle: BidBundle,
}

impl Bid {
    pub fn new(auction: AuctionId, agent: AgentId, bundle: BidBundle) -> Self {
        let bundle = bundle.stamped(agent);
        Self {
            auction,
            agent,
            bundle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::GoodKind;
    use rust_decimal_macros::dec;

    fn good(id: u64) -> FullType {
        FullType::new(GoodKind::Commodity, id)
    }

    #[test]
    fn test_bundle_cost_sums_demand() {
        let mut demand = BTreeMap::new();
        demand.insert(good(0), MarketState::new(Some(1), dec!(30)));
        demand.insert(good(1), MarketState::new(Some(1), dec!(12)));
        assert_eq!(BidBundle::new(demand).cost(), dec!(42));
    }

    #[test]
    fn test_stamp_overrides_client_supplied_agent() {
        let bundle = BidBundle::single(good(0), Some(999), dec!(10));
        let bid = Bid::new(0, 7, bundle);
        assert_eq!(bid.bundle.agent(), Some(7));
    }

    #[test]
    fn test_shape_match() {
        let a = BidBundle::single(good(0), None, dec!(1));
        let b = BidBundle::single(good(0), Some(2), dec!(9));
        let c = BidBundle::single(good(1), Some(2), dec!(9));
        assert!(a.shape_matches(&b));
        assert!(!a.shape_matches(&c));
    }

    #[test]
    fn test_zero_reserve_has_no_eligibility() {
        let r = BidBundle::zero_reserve([good(0), good(1)]);
        assert_eq!(r.eligibility(), 0);
        assert_eq!(r.cost(), dec!(0));
    }
}
