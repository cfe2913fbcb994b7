//! Continuous double auction with price-time priority.
//!
//! Resting limit orders are matched first-in-first-out within a price
//! level: an incoming buy crosses the lowest ask, an incoming sell the
//! highest bid, and the resting (older) order sets the trade price. Any
//! unmatched remainder rests on the book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::MarketError;
use super::value::{AgentId, FullType};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A limit order resting on the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub agent: AgentId,
    pub price: Decimal,
    pub quantity: Decimal,
    seq: u64,
}

/// One match between a taker and a resting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub buyer: AgentId,
    pub seller: AgentId,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Two-sided order book for a single good.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoubleAuction {
    kind: FullType,
    /// Buys, best (highest price, lowest seq) first.
    bids: Vec<RestingOrder>,
    /// Sells, best (lowest price, lowest seq) first.
    asks: Vec<RestingOrder>,
    next_seq: u64,
    last_price: Option<Decimal>,
}

impl DoubleAuction {
    pub fn new(kind: FullType) -> Self {
        Self {
            kind,
            bids: Vec::new(),
            asks: Vec::new(),
            next_seq: 0,
            last_price: None,
        }
    }

    pub fn kind(&self) -> FullType {
        self.kind
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|o| o.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|o| o.price)
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    /// Submit a limit order; returns the fills it produced. The remainder,
    /// if any, rests on the book.
    pub fn submit(
        &mut self,
        agent: AgentId,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<Vec<Fill>, MarketError> {
        if quantity <= Decimal::ZERO {
            return Err(MarketError::InvalidQuantity(quantity));
        }
        if price <= Decimal::ZERO {
            return Err(MarketError::InvalidQuantity(price));
        }

        let mut remaining = quantity;
        let mut fills = Vec::new();

        loop {
            if remaining == Decimal::ZERO {
                break;
            }
            let crossed = match side {
                Side::Buy => self.asks.first().map(|o| o.price <= price),
                Side::Sell => self.bids.first().map(|o| o.price >= price),
            };
            if crossed != Some(true) {
                break;
            }
            let book = match side {
                Side::Buy => &mut self.asks,
                Side::Sell => &mut self.bids,
            };
            let resting = &mut book[0];
            // Self-crossing orders rest instead of self-trading.
            if resting.agent == agent {
                break;
            }
            let matched = resting.quantity.min(remaining);
            let trade_price = resting.price;
            let (buyer, seller) = match side {
                Side::Buy => (agent, resting.agent),
                Side::Sell => (resting.agent, agent),
            };
            fills.push(Fill {
                buyer,
                seller,
                price: trade_price,
                quantity: matched,
            });
            resting.quantity -= matched;
            remaining -= matched;
            self.last_price = Some(trade_price);
            if book[0].quantity == Decimal::ZERO {
                book.remove(0);
            }
        }

        if remaining > Decimal::ZERO {
            let order = RestingOrder {
                agent,
                price,
                quantity: remaining,
                seq: self.next_seq,
            };
            self.next_seq += 1;
            match side {
                Side::Buy => {
                    let at = self
                        .bids
                        .iter()
                        .position(|o| o.price < order.price)
                        .unwrap_or(self.bids.len());
                    self.bids.insert(at, order);
                }
                Side::Sell => {
                    let at = self
                        .asks
                        .iter()
                        .position(|o| o.price > order.price)
                        .unwrap_or(self.asks.len());
                    self.asks.insert(at, order);
                }
            }
        }

        Ok(fills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::GoodKind;
    use rust_decimal_macros::dec;

    fn book() -> DoubleAuction {
        DoubleAuction::new(FullType::new(GoodKind::Commodity, 3))
    }

    #[test]
    fn test_resting_order_sets_price() {
        let mut da = book();
        assert!(da.submit(1, Side::Sell, dec!(10), dec!(5)).unwrap().is_empty());
        let fills = da.submit(2, Side::Buy, dec!(12), dec!(3)).unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(10));
        assert_eq!(fills[0].quantity, dec!(3));
        assert_eq!(fills[0].buyer, 2);
        assert_eq!(fills[0].seller, 1);
        assert_eq!(da.best_ask(), Some(dec!(10)));
    }

    #[test]
    fn test_time_priority_within_price_level() {
        let mut da = book();
        da.submit(1, Side::Sell, dec!(10), dec!(2)).unwrap();
        da.submit(2, Side::Sell, dec!(10), dec!(2)).unwrap();
        let fills = da.submit(3, Side::Buy, dec!(10), dec!(3)).unwrap();
        assert_eq!(fills[0].seller, 1);
        assert_eq!(fills[1].seller, 2);
        assert_eq!(fills[1].quantity, dec!(1));
    }

    #[test]
    fn test_non_crossing_order_rests() {
        let mut da = book();
        da.submit(1, Side::Sell, dec!(10), dec!(5)).unwrap();
        let fills = da.submit(2, Side::Buy, dec!(9), dec!(5)).unwrap();
        assert!(fills.is_empty());
        assert_eq!(da.best_bid(), Some(dec!(9)));
        assert_eq!(da.best_ask(), Some(dec!(10)));
    }

    #[test]
    fn test_sweep_through_multiple_levels() {
        let mut da = book();
        da.submit(1, Side::Sell, dec!(10), dec!(1)).unwrap();
        da.submit(2, Side::Sell, dec!(11), dec!(1)).unwrap();
        let fills = da.submit(3, Side::Buy, dec!(11), dec!(2)).unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].price, dec!(10));
        assert_eq!(fills[1].price, dec!(11));
        assert_eq!(da.last_price(), Some(dec!(11)));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let mut da = book();
        assert!(da.submit(1, Side::Buy, dec!(10), dec!(0)).is_err());
        assert!(da.submit(1, Side::Buy, dec!(0), dec!(1)).is_err());
    }

    #[test]
    fn test_no_self_trade() {
        let mut da = book();
        da.submit(1, Side::Sell, dec!(10), dec!(5)).unwrap();
        let fills = da.submit(1, Side::Buy, dec!(12), dec!(5)).unwrap();
        assert!(fills.is_empty());
    }
}
