//! Logarithmic Market Scoring Rule (LMSR) market makers.
//!
//! Cost-function automated market making for binary outcome markets:
//! C(q) = b * ln(exp(q_yes/b) + exp(q_no/b)), price = ∂C/∂q. The maker is
//! always the counterparty and its inventory is inexhaustible.
//! Reference: Hanson (2003) "Combinatorial Information Market Design"
//!
//! Two backends share the math through the `MarketMaker` trait:
//! - `LmsrBackend`: classic fixed liquidity parameter b.
//! - `LiquiditySensitive`: b = alpha * (q_yes + q_no) * trade count, so
//!   depth grows as the market ages. Early trades move the price sharply,
//!   later ones barely at all. This deliberately gives up the classic
//!   bounded-loss guarantee of fixed-b LMSR.
//!
//! Exposes a Decimal API for account-precise settlement with f64 internals
//! for the transcendental math.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use super::value::Outcome;

// ────────────────────────────────────────────
// Shared cost-function math (f64 internals)
// ────────────────────────────────────────────

/// C(q_yes, q_no) evaluated via log-sum-exp so large q/b cannot overflow.
fn cost_fn(b: f64, q_yes: f64, q_no: f64) -> f64 {
    let (ry, rn) = (q_yes / b, q_no / b);
    let m = ry.max(rn);
    b * (m + ((ry - m).exp() + (rn - m).exp()).ln())
}

/// price(yes) = exp(q_yes/b) / (exp(q_yes/b) + exp(q_no/b)), computed as a
/// logistic of the quantity gap for stability.
fn price_yes_fn(b: f64, q_yes: f64, q_no: f64) -> f64 {
    1.0 / (1.0 + ((q_no - q_yes) / b).exp())
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn to_decimal(x: f64) -> Decimal {
    Decimal::from_f64(x).unwrap_or(Decimal::ZERO)
}

/// Cost-function market maker over a two-outcome security.
///
/// Implementors provide the current inventory and effective depth; all
/// quoting and inversion math is shared. Quantities are cumulative signed
/// totals of shares sold by the maker on each outcome.
pub trait MarketMaker: Send + std::fmt::Debug {
    /// Cumulative (q_yes, q_no).
    fn quantities(&self) -> (Decimal, Decimal);

    /// Effective liquidity parameter b at the current state.
    fn depth(&self) -> Decimal;

    /// Record an executed trade of `shares` on `outcome`.
    fn apply(&mut self, outcome: Outcome, shares: Decimal);

    /// Signed cost of moving inventory by (d_yes, d_no):
    /// C(q + d) - C(q) at the current depth.
    fn cost(&self, d_yes: Decimal, d_no: Decimal) -> Decimal {
        let b = to_f64(self.depth());
        let (qy, qn) = self.quantities();
        let (qy, qn) = (to_f64(qy), to_f64(qn));
        let delta =
            cost_fn(b, qy + to_f64(d_yes), qn + to_f64(d_no)) - cost_fn(b, qy, qn);
        to_decimal(delta)
    }

    /// Quoted cost to buy `shares` of `outcome` from the maker.
    fn ask(&self, outcome: Outcome, shares: Decimal) -> Decimal {
        match outcome {
            Outcome::Yes => self.cost(shares, Decimal::ZERO),
            Outcome::No => self.cost(Decimal::ZERO, shares),
        }
    }

    /// Quoted proceeds for selling `shares` of `outcome` back to the maker.
    fn bid(&self, outcome: Outcome, shares: Decimal) -> Decimal {
        match outcome {
            Outcome::Yes => -self.cost(-shares, Decimal::ZERO),
            Outcome::No => -self.cost(Decimal::ZERO, -shares),
        }
    }

    /// Instantaneous price of `outcome`, in (0, 1). Prices of the two
    /// outcomes always sum to 1.
    fn price(&self, outcome: Outcome) -> Decimal {
        let b = to_f64(self.depth());
        let (qy, qn) = self.quantities();
        let p_yes = price_yes_fn(b, to_f64(qy), to_f64(qn));
        match outcome {
            Outcome::Yes => to_decimal(p_yes),
            Outcome::No => to_decimal(1.0 - p_yes),
        }
    }

    /// Maximum share quantity on `outcome` before its price reaches
    /// `target`. Inverts the logistic price at the current depth; zero when
    /// the price is already past the target.
    fn how_many(&self, target: Decimal, outcome: Outcome) -> Decimal {
        let b = to_f64(self.depth());
        let (qy, qn) = self.quantities();
        let (qy, qn) = (to_f64(qy), to_f64(qn));
        let p = to_f64(target).clamp(0.01, 0.99);
        let logit = (p / (1.0 - p)).ln();
        let shares = match outcome {
            Outcome::Yes => b * logit + qn - qy,
            Outcome::No => b * logit + qy - qn,
        };
        to_decimal(shares.max(0.0))
    }

    /// Shares to buy toward `target` price without overspending `budget`:
    /// the ideal quantity from `how_many`, clamped to what the budget
    /// affords whenever the ideal cost exceeds it.
    fn affordable_shares(&self, target: Decimal, budget: Decimal, outcome: Outcome) -> Decimal {
        let ideal = self.how_many(target, outcome);
        if self.ask(outcome, ideal) > budget {
            self.budget_to_shares(budget, outcome)
        } else {
            ideal
        }
    }

    /// Share quantity on `outcome` whose cost exactly exhausts `budget`.
    /// Inverts the cost function at the current depth.
    fn budget_to_shares(&self, budget: Decimal, outcome: Outcome) -> Decimal {
        let b = to_f64(self.depth());
        let (qy, qn) = self.quantities();
        let (qy, qn) = (to_f64(qy), to_f64(qn));
        let budget = to_f64(budget);
        if budget <= 0.0 {
            return Decimal::ZERO;
        }
        // Solve C(q + d) - C(q) = budget for d on one outcome, factoring
        // exp(m) out of both sums so the intermediate terms stay bounded.
        let (q_same, q_other) = match outcome {
            Outcome::Yes => (qy, qn),
            Outcome::No => (qn, qy),
        };
        let m = (q_same / b).max(q_other / b);
        let sum = ((q_same / b) - m).exp() + ((q_other / b) - m).exp();
        let inner = (budget / b).exp() * sum - ((q_other / b) - m).exp();
        let shares = b * (m + inner.ln()) - q_same;
        to_decimal(shares.max(0.0))
    }
}

// ────────────────────────────────────────────
// Fixed-depth backend
// ────────────────────────────────────────────

/// Classic LMSR backend with a fixed liquidity parameter.
///
/// Higher `b` = deeper market, slower price movement; worst-case maker
/// loss is bounded by b * ln(2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmsrBackend {
    b: Decimal,
    q_yes: Decimal,
    q_no: Decimal,
}

impl LmsrBackend {
    /// # Panics
    /// Panics if `b` is not positive.
    pub fn new(b: Decimal) -> Self {
        assert!(b > Decimal::ZERO, "LMSR liquidity parameter b must be positive");
        Self {
            b,
            q_yes: Decimal::ZERO,
            q_no: Decimal::ZERO,
        }
    }
}

impl MarketMaker for LmsrBackend {
    fn quantities(&self) -> (Decimal, Decimal) {
        (self.q_yes, self.q_no)
    }

    fn depth(&self) -> Decimal {
        self.b
    }

    fn apply(&mut self, outcome: Outcome, shares: Decimal) {
        match outcome {
            Outcome::Yes => self.q_yes += shares,
            Outcome::No => self.q_no += shares,
        }
    }
}

// ────────────────────────────────────────────
// Liquidity-sensitive backend
// ────────────────────────────────────────────

/// LMSR backend whose depth scales with observed volume and trade count:
/// b = alpha * (q_yes + q_no) * trades.
///
/// Seeded with one share on each outcome and a trade count of 2 so the
/// first quote already has positive depth. Depth grows monotonically as
/// trading proceeds, trading early volatility for later stability; the
/// fixed-b bounded-loss guarantee does NOT hold here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquiditySensitive {
    alpha: Decimal,
    q_yes: Decimal,
    q_no: Decimal,
    trades: u32,
}

impl LiquiditySensitive {
    /// # Panics
    /// Panics if `alpha` is not positive.
    pub fn new(alpha: Decimal) -> Self {
        assert!(alpha > Decimal::ZERO, "liquidity sensitivity alpha must be positive");
        Self {
            alpha,
            q_yes: Decimal::ONE,
            q_no: Decimal::ONE,
            trades: 2,
        }
    }

    pub fn alpha(&self) -> Decimal {
        self.alpha
    }

    pub fn trade_count(&self) -> u32 {
        self.trades
    }
}

impl MarketMaker for LiquiditySensitive {
    fn quantities(&self) -> (Decimal, Decimal) {
        (self.q_yes, self.q_no)
    }

    fn depth(&self) -> Decimal {
        self.alpha * (self.q_yes + self.q_no) * Decimal::from(self.trades)
    }

    fn apply(&mut self, outcome: Outcome, shares: Decimal) {
        match outcome {
            Outcome::Yes => self.q_yes += shares,
            Outcome::No => self.q_no += shares,
        }
        self.trades += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fresh_market_prices_at_half() {
        let mm = LmsrBackend::new(dec!(100));
        let p = mm.price(Outcome::Yes);
        assert!((p - dec!(0.5)).abs() < dec!(0.0001), "expected ~0.5, got {p}");
    }

    #[test]
    fn test_prices_sum_to_one() {
        let mut mm = LmsrBackend::new(dec!(50));
        mm.apply(Outcome::Yes, dec!(30));
        mm.apply(Outcome::No, dec!(12));
        let sum = mm.price(Outcome::Yes) + mm.price(Outcome::No);
        assert!((sum - Decimal::ONE).abs() < dec!(0.000000001), "got {sum}");
    }

    #[test]
    fn test_buying_yes_raises_yes_price() {
        let mut mm = LmsrBackend::new(dec!(100));
        let before = mm.price(Outcome::Yes);
        mm.apply(Outcome::Yes, dec!(40));
        assert!(mm.price(Outcome::Yes) > before);
    }

    #[test]
    fn test_ask_positive_bid_below_ask() {
        let mm = LmsrBackend::new(dec!(100));
        let ask = mm.ask(Outcome::Yes, dec!(10));
        let bid = mm.bid(Outcome::Yes, dec!(10));
        assert!(ask > Decimal::ZERO);
        assert!(bid > Decimal::ZERO);
        assert!(bid <= ask);
    }

    #[test]
    fn test_how_many_reaches_target_price() {
        let mm = LmsrBackend::new(dec!(100));
        let shares = mm.how_many(dec!(0.6), Outcome::Yes);
        let mut moved = LmsrBackend::new(dec!(100));
        moved.apply(Outcome::Yes, shares);
        let p = moved.price(Outcome::Yes);
        assert!((p - dec!(0.6)).abs() < dec!(0.001), "got {p}");
    }

    #[test]
    fn test_how_many_zero_when_past_target() {
        let mut mm = LmsrBackend::new(dec!(10));
        mm.apply(Outcome::Yes, dec!(30));
        assert_eq!(mm.how_many(dec!(0.5), Outcome::Yes), Decimal::ZERO);
    }

    #[test]
    fn test_affordable_shares_clamps_to_budget() {
        let mm = LmsrBackend::new(dec!(100));
        // The ideal quantity toward 0.9 costs far more than 5.
        let ideal = mm.how_many(dec!(0.9), Outcome::Yes);
        assert!(mm.ask(Outcome::Yes, ideal) > dec!(5));
        let clamped = mm.affordable_shares(dec!(0.9), dec!(5), Outcome::Yes);
        assert!(clamped < ideal);
        assert!(mm.ask(Outcome::Yes, clamped) <= dec!(5.001));

        // A generous budget leaves the ideal quantity untouched.
        let unclamped = mm.affordable_shares(dec!(0.55), dec!(1000), Outcome::Yes);
        assert_eq!(unclamped, mm.how_many(dec!(0.55), Outcome::Yes));
    }

    #[test]
    fn test_budget_to_shares_costs_the_budget() {
        let mm = LmsrBackend::new(dec!(100));
        let shares = mm.budget_to_shares(dec!(20), Outcome::No);
        let cost = mm.ask(Outcome::No, shares);
        assert!((cost - dec!(20)).abs() < dec!(0.001), "cost {cost}");
    }

    #[test]
    fn test_liquidity_sensitive_depth_grows_with_trades() {
        let mut mm = LiquiditySensitive::new(dec!(0.2));
        // Seeded: b = 0.2 * (1 + 1) * 2
        assert_eq!(mm.depth(), dec!(0.8));
        let first = mm.ask(Outcome::No, dec!(50));
        mm.apply(Outcome::No, dec!(50));
        assert_eq!(mm.depth(), dec!(0.2) * dec!(52) * dec!(3));
        let second = mm.ask(Outcome::No, dec!(50));
        assert_ne!(first, second);
    }

    #[test]
    fn test_liquidity_sensitive_prices_still_sum_to_one() {
        let mut mm = LiquiditySensitive::new(dec!(0.2));
        mm.apply(Outcome::No, dec!(50));
        mm.apply(Outcome::Yes, dec!(17));
        let sum = mm.price(Outcome::Yes) + mm.price(Outcome::No);
        assert!((sum - Decimal::ONE).abs() < dec!(0.000000001), "got {sum}");
    }
}
