//! Immutable per-agent accounts.
//!
//! An `Account` is cash plus a collection of held tradeables. Every mutator
//! is pure: it returns a NEW account instead of editing in place. A caller
//! reads the current value, computes a replacement, and atomically swaps it
//! back in under the owning lock — lost updates are impossible by
//! construction, and every intermediate state is a complete, valid account.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::MarketError;
use super::value::{AgentId, FullType, Payout, Tradeable, TradeableForm, WorldState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner: AgentId,
    pub cash: Decimal,
    pub holdings: Vec<Tradeable>,
}

impl Account {
    /// An empty account for a newly registered agent.
    pub fn new(owner: AgentId) -> Self {
        Self {
            owner,
            cash: Decimal::ZERO,
            holdings: Vec::new(),
        }
    }

    /// An account opened with a cash endowment.
    pub fn with_endowment(owner: AgentId, cash: Decimal) -> Self {
        Self {
            owner,
            cash,
            holdings: Vec::new(),
        }
    }

    /// Total quantity held of one good type, settled records excluded.
    pub fn quantity_of(&self, kind: &FullType) -> Decimal {
        self.holdings
            .iter()
            .filter(|t| t.kind == *kind && t.form != TradeableForm::Settled)
            .map(|t| t.quantity)
            .sum()
    }

    /// New account with cash and an optional good added.
    pub fn add(&self, cash: Decimal, good: Option<Tradeable>) -> Self {
        self.add_all(cash, good.into_iter().collect())
    }

    /// New account with cash and a batch of goods added.
    ///
    /// Live security positions of the same type merge into one entry;
    /// settled records are appended untouched so the audit trail survives.
    pub fn add_all(&self, cash: Decimal, goods: Vec<Tradeable>) -> Self {
        let mut next = self.clone();
        next.cash += cash;
        for good in goods {
            let merged = next.holdings.iter_mut().find(|h| {
                h.kind == good.kind && h.form == good.form && h.form == TradeableForm::Security
            });
            match merged {
                Some(existing) => existing.quantity += good.quantity,
                None => next.holdings.push(good),
            }
        }
        next
    }

    /// New account with cash and goods removed.
    ///
    /// Fails without side effects when the account cannot cover the cash or
    /// any requested good quantity; the caller keeps the original value.
    pub fn remove(&self, cash: Decimal, goods: &[Tradeable]) -> Result<Self, MarketError> {
        if self.cash < cash {
            return Err(MarketError::InsufficientFunds {
                needed: cash,
                available: self.cash,
            });
        }

        // Aggregate the requested quantities per type before touching state.
        let mut wanted: BTreeMap<FullType, Decimal> = BTreeMap::new();
        for good in goods {
            if good.quantity <= Decimal::ZERO {
                return Err(MarketError::InvalidQuantity(good.quantity));
            }
            *wanted.entry(good.kind).or_insert(Decimal::ZERO) += good.quantity;
        }
        for (kind, needed) in &wanted {
            let available = self.quantity_of(kind);
            if available < *needed {
                return Err(MarketError::InsufficientHoldings {
                    kind: *kind,
                    needed: *needed,
                    available,
                });
            }
        }

        let mut next = self.clone();
        next.cash -= cash;
        for (kind, mut needed) in wanted {
            for holding in &mut next.holdings {
                if holding.kind != kind || holding.form == TradeableForm::Settled {
                    continue;
                }
                let taken = holding.quantity.min(needed);
                holding.quantity -= taken;
                needed -= taken;
                if needed == Decimal::ZERO {
                    break;
                }
            }
        }
        next.holdings
            .retain(|h| h.quantity > Decimal::ZERO || h.form == TradeableForm::Settled);
        Ok(next)
    }

    /// Whether this account can cover a cash amount plus goods.
    pub fn can_cover(&self, cash: Decimal, goods: &[Tradeable]) -> bool {
        self.remove(cash, goods).is_ok()
    }

    /// Convert all live claims of one type against a resolved world.
    ///
    /// Returns the replacement account and the cash realized. Converted
    /// claims are replaced by settled records of the same quantity.
    pub fn convert(&self, kind: &FullType, world: &WorldState) -> (Self, Decimal) {
        let mut next = self.clone();
        let mut realized = Decimal::ZERO;
        let mut records = Vec::new();
        next.holdings.retain(|h| {
            if h.kind == *kind && h.form != TradeableForm::Settled {
                if let Some(Payout { cash, .. }) = h.close(world) {
                    realized += cash;
                }
                records.push(Tradeable::settled(h.owner, h.quantity, h.kind));
                false
            } else {
                true
            }
        });
        next.cash += realized;
        next.holdings.extend(records);
        (next, realized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::{GoodKind, Outcome};
    use rust_decimal_macros::dec;

    fn commodity() -> FullType {
        FullType::new(GoodKind::Commodity, 0)
    }

    #[test]
    fn test_add_returns_new_account() {
        let a = Account::with_endowment(1, dec!(100));
        let b = a.add(dec!(25), None);
        assert_eq!(a.cash, dec!(100));
        assert_eq!(b.cash, dec!(125));
    }

    #[test]
    fn test_add_merges_same_security() {
        let a = Account::new(1)
            .add(dec!(0), Some(Tradeable::security(Some(1), dec!(3), commodity())))
            .add(dec!(0), Some(Tradeable::security(Some(1), dec!(2), commodity())));
        assert_eq!(a.holdings.len(), 1);
        assert_eq!(a.quantity_of(&commodity()), dec!(5));
    }

    #[test]
    fn test_remove_insufficient_funds_rejected() {
        let a = Account::with_endowment(1, dec!(10));
        let err = a.remove(dec!(11), &[]).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientFunds { .. }));
        assert_eq!(a.cash, dec!(10));
    }

    #[test]
    fn test_remove_insufficient_holdings_rejected() {
        let a = Account::with_endowment(1, dec!(10))
            .add(dec!(0), Some(Tradeable::security(Some(1), dec!(2), commodity())));
        let want = Tradeable::security(Some(1), dec!(3), commodity());
        let err = a.remove(dec!(0), &[want]).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientHoldings { .. }));
    }

    #[test]
    fn test_remove_spans_multiple_entries() {
        let short = Tradeable::short(dec!(2), commodity());
        let a = Account::with_endowment(1, dec!(10))
            .add(dec!(0), Some(Tradeable::security(Some(1), dec!(2), commodity())))
            .add(dec!(0), Some(short));
        let want = Tradeable::security(Some(1), dec!(3), commodity());
        let b = a.remove(dec!(5), &[want]).unwrap();
        assert_eq!(b.cash, dec!(5));
        assert_eq!(b.quantity_of(&commodity()), dec!(1));
    }

    #[test]
    fn test_convert_realizes_payoff_and_keeps_record() {
        let yes = FullType::new(GoodKind::PredictionYes, 4);
        let a = Account::with_endowment(1, dec!(0))
            .add(dec!(0), Some(Tradeable::security(Some(1), dec!(7), yes)));
        let (b, realized) = a.convert(&yes, &WorldState::resolved(Outcome::Yes));
        assert_eq!(realized, dec!(7));
        assert_eq!(b.cash, dec!(7));
        assert_eq!(b.quantity_of(&yes), dec!(0));
        assert!(b.holdings.iter().any(|h| h.form == TradeableForm::Settled));

        // Converting again is a no-op: the record never pays twice.
        let (c, realized_again) = b.convert(&yes, &WorldState::resolved(Outcome::Yes));
        assert_eq!(realized_again, dec!(0));
        assert_eq!(c.cash, dec!(7));
    }
}
