//! Core asset identity and tradeable value objects.
//!
//! A `FullType` names one concrete good or security instance; a `Tradeable`
//! is a claim on it held in some account (or by the market itself). All
//! types here are immutable values: mutation is expressed by constructing
//! new instances, which is what keeps concurrent bookkeeping auditable.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-assigned private agent identifier. Never leaves the server.
pub type AgentId = u64;

/// Sequential public agent identifier, safe to broadcast.
pub type PublicId = u64;

/// Identifier of an exchange instrument.
pub type SecurityId = u64;

/// Identifier of a one-sided auction.
pub type AuctionId = u64;

/// Category of a tradeable good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GoodKind {
    /// A plain auctionable good (lab commodities, licenses, ...).
    Commodity,
    /// The YES outcome share of a binary prediction market.
    PredictionYes,
    /// The NO outcome share of a binary prediction market.
    PredictionNo,
}

impl std::fmt::Display for GoodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commodity => write!(f, "COMMODITY"),
            Self::PredictionYes => write!(f, "YES"),
            Self::PredictionNo => write!(f, "NO"),
        }
    }
}

/// Immutable identity of one good/security instance. Value equality.
///
/// Serializes as the compact string `KIND:id` so it can key JSON maps
/// in wire messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullType {
    pub kind: GoodKind,
    pub id: SecurityId,
}

impl FullType {
    pub const fn new(kind: GoodKind, id: SecurityId) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for FullType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl std::str::FromStr for FullType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid security type: {s}"))?;
        let kind = match kind {
            "COMMODITY" => GoodKind::Commodity,
            "YES" => GoodKind::PredictionYes,
            "NO" => GoodKind::PredictionNo,
            other => return Err(format!("unknown good kind: {other}")),
        };
        let id = id
            .parse()
            .map_err(|e| format!("invalid security id in {s}: {e}"))?;
        Ok(Self { kind, id })
    }
}

impl Serialize for FullType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FullType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Resolved outcome of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The complementary outcome.
    pub const fn other(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

/// Terminal state of the world a market resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    pub outcome: Outcome,
}

impl WorldState {
    pub const fn resolved(outcome: Outcome) -> Self {
        Self { outcome }
    }
}

/// How a tradeable claim is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeableForm {
    /// An owned security; pays 1 per share when its outcome wins.
    Security,
    /// A short position; pays as the complementary outcome's security.
    Short,
    /// A realized claim kept as an audit record. Never pays again.
    Settled,
}

/// Cash realized by converting a tradeable against a resolved world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub owner: Option<AgentId>,
    pub cash: Decimal,
}

/// A claim on a good: owner (None = market-held), signed quantity, type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tradeable {
    pub owner: Option<AgentId>,
    pub quantity: Decimal,
    pub kind: FullType,
    pub form: TradeableForm,
}

impl Tradeable {
    pub fn security(owner: Option<AgentId>, quantity: Decimal, kind: FullType) -> Self {
        Self {
            owner,
            quantity,
            kind,
            form: TradeableForm::Security,
        }
    }

    pub fn short(quantity: Decimal, kind: FullType) -> Self {
        Self {
            owner: None,
            quantity,
            kind,
            form: TradeableForm::Short,
        }
    }

    pub fn settled(owner: Option<AgentId>, quantity: Decimal, kind: FullType) -> Self {
        Self {
            owner,
            quantity,
            kind,
            form: TradeableForm::Settled,
        }
    }

    /// Reassign ownership, e.g. when an auctioned good is awarded.
    pub fn with_owner(&self, owner: AgentId) -> Self {
        Self {
            owner: Some(owner),
            ..self.clone()
        }
    }

    /// Partial-quantity clone. None if the requested quantity is not a
    /// positive amount covered by this claim.
    pub fn split(&self, quantity: Decimal) -> Option<Self> {
        if quantity <= Decimal::ZERO || quantity > self.quantity {
            return None;
        }
        Some(Self {
            quantity,
            ..self.clone()
        })
    }

    /// Realize this claim's payoff from a resolved world state.
    ///
    /// Securities pay 1 unit of cash per share when their outcome wins.
    /// Shorts pay as the complementary outcome. Commodities and settled
    /// records have no payoff.
    pub fn close(&self, world: &WorldState) -> Option<Payout> {
        if self.form == TradeableForm::Settled {
            return None;
        }
        let paying_outcome = match self.kind.kind {
            GoodKind::Commodity => return None,
            GoodKind::PredictionYes => Outcome::Yes,
            GoodKind::PredictionNo => Outcome::No,
        };
        let wins = match self.form {
            TradeableForm::Security => world.outcome == paying_outcome,
            TradeableForm::Short => world.outcome == paying_outcome.other(),
            TradeableForm::Settled => unreachable!(),
        };
        let cash = if wins { self.quantity } else { Decimal::ZERO };
        Some(Payout {
            owner: self.owner,
            cash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_full_type_value_equality() {
        let a = FullType::new(GoodKind::PredictionYes, 7);
        let b = FullType::new(GoodKind::PredictionYes, 7);
        let c = FullType::new(GoodKind::PredictionNo, 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_full_type_string_round_trip() {
        let t = FullType::new(GoodKind::PredictionNo, 42);
        assert_eq!(t.to_string(), "NO:42");
        assert_eq!("NO:42".parse::<FullType>().unwrap(), t);
        assert!("BOGUS:1".parse::<FullType>().is_err());
        assert!("YES".parse::<FullType>().is_err());
    }

    #[test]
    fn test_split_partial_quantity() {
        let t = Tradeable::security(Some(3), dec!(10), FullType::new(GoodKind::Commodity, 0));
        let part = t.split(dec!(4)).unwrap();
        assert_eq!(part.quantity, dec!(4));
        assert_eq!(part.owner, Some(3));
        assert!(t.split(dec!(11)).is_none());
        assert!(t.split(dec!(0)).is_none());
    }

    #[test]
    fn test_close_winning_security_pays_one_per_share() {
        let yes = FullType::new(GoodKind::PredictionYes, 1);
        let t = Tradeable::security(Some(9), dec!(25), yes);
        let paid = t.close(&WorldState::resolved(Outcome::Yes)).unwrap();
        assert_eq!(paid.cash, dec!(25));
        let unpaid = t.close(&WorldState::resolved(Outcome::No)).unwrap();
        assert_eq!(unpaid.cash, dec!(0));
    }

    #[test]
    fn test_close_short_pays_opposite_outcome() {
        let yes = FullType::new(GoodKind::PredictionYes, 1);
        let t = Tradeable::short(dec!(5), yes);
        let paid = t.close(&WorldState::resolved(Outcome::No)).unwrap();
        assert_eq!(paid.cash, dec!(5));
    }

    #[test]
    fn test_settled_record_never_pays_again() {
        let yes = FullType::new(GoodKind::PredictionYes, 1);
        let t = Tradeable::settled(Some(2), dec!(5), yes);
        assert!(t.close(&WorldState::resolved(Outcome::Yes)).is_none());
    }
}
