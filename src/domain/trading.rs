//! Bilateral trade requests.
//!
//! A trade request is an open offer: the initiator names what they give
//! (offered) and what they want back (requested), addressed to one public
//! id or to anyone. Settlement happens only on an explicit acceptance from
//! the correct counterparty while the request is still pending.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::Account;
use super::value::{PublicId, Tradeable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub id: Uuid,
    /// Public id of the initiator (stamped by the server).
    pub from: PublicId,
    /// Addressed counterparty; None = open to any agent.
    pub to: Option<PublicId>,
    /// What the initiator gives up.
    pub cash_offered: Decimal,
    pub goods_offered: Vec<Tradeable>,
    /// What the initiator wants from the acceptor.
    pub cash_requested: Decimal,
    pub goods_requested: Vec<Tradeable>,
    pub created_at: DateTime<Utc>,
}

impl TradeRequest {
    /// Build the broadcast-safe copy: the server stamps the initiator's
    /// public id and strips private ownership off every listed good.
    pub fn stamped(
        from: PublicId,
        to: Option<PublicId>,
        cash_offered: Decimal,
        goods_offered: Vec<Tradeable>,
        cash_requested: Decimal,
        goods_requested: Vec<Tradeable>,
    ) -> Self {
        let strip = |goods: Vec<Tradeable>| {
            goods
                .into_iter()
                .map(|g| Tradeable {
                    owner: None,
                    ..g
                })
                .collect()
        };
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            cash_offered,
            goods_offered: strip(goods_offered),
            cash_requested,
            goods_requested: strip(goods_requested),
            created_at: Utc::now(),
        }
    }

    /// Whether `counterparty` is allowed to accept this request.
    pub fn accepts_from(&self, counterparty: PublicId) -> bool {
        match self.to {
            Some(target) => target == counterparty,
            None => counterparty != self.from,
        }
    }

    /// Both sides hold what the trade moves: the acceptor covers the
    /// requested leg, the initiator the offered leg.
    pub fn is_satisfied(&self, acceptor: &Account, initiator: &Account) -> bool {
        acceptor.can_cover(self.cash_requested, &self.goods_requested)
            && initiator.can_cover(self.cash_offered, &self.goods_offered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::{FullType, GoodKind};
    use rust_decimal_macros::dec;

    fn good() -> FullType {
        FullType::new(GoodKind::Commodity, 1)
    }

    #[test]
    fn test_stamped_strips_private_owners() {
        let offered = vec![Tradeable::security(Some(42), dec!(3), good())];
        let req = TradeRequest::stamped(0, None, dec!(0), offered, dec!(10), vec![]);
        assert!(req.goods_offered.iter().all(|g| g.owner.is_none()));
        assert_eq!(req.from, 0);
    }

    #[test]
    fn test_addressing() {
        let open = TradeRequest::stamped(0, None, dec!(1), vec![], dec!(1), vec![]);
        assert!(open.accepts_from(5));
        assert!(!open.accepts_from(0));

        let direct = TradeRequest::stamped(0, Some(2), dec!(1), vec![], dec!(1), vec![]);
        assert!(direct.accepts_from(2));
        assert!(!direct.accepts_from(3));
    }

    #[test]
    fn test_is_satisfied_checks_both_legs() {
        let req = TradeRequest::stamped(
            0,
            None,
            dec!(10),
            vec![],
            dec!(0),
            vec![Tradeable::security(None, dec!(2), good())],
        );
        let initiator = Account::with_endowment(1, dec!(10));
        let rich_acceptor = Account::with_endowment(2, dec!(0))
            .add(dec!(0), Some(Tradeable::security(Some(2), dec!(2), good())));
        let poor_acceptor = Account::with_endowment(3, dec!(0));

        assert!(req.is_satisfied(&rich_acceptor, &initiator));
        assert!(!req.is_satisfied(&poor_acceptor, &initiator));

        let broke_initiator = Account::with_endowment(1, dec!(5));
        assert!(!req.is_satisfied(&rich_acceptor, &broke_initiator));
    }
}
