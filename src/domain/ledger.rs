//! Executed-trade records and the append-only ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value::{AgentId, FullType};

/// One executed trade: security, signed quantity, the agent side
/// (None = the market itself was the counterparty), price, timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub security: FullType,
    pub quantity: Decimal,
    pub agent: Option<AgentId>,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        security: FullType,
        quantity: Decimal,
        agent: Option<AgentId>,
        price: Decimal,
    ) -> Self {
        Self {
            security,
            quantity,
            agent,
            price,
            executed_at: Utc::now(),
        }
    }
}

/// Append-only transaction history scoped to one security.
///
/// Entries are never removed or rewritten; the in-memory log is the
/// authoritative session history and the JSONL adapter mirrors it to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    security: FullType,
    entries: Vec<Transaction>,
}

impl Ledger {
    pub fn new(security: FullType) -> Self {
        Self {
            security,
            entries: Vec::new(),
        }
    }

    pub fn security(&self) -> FullType {
        self.security
    }

    /// Append one executed trade. There is no removal operation.
    pub fn add(&mut self, transaction: Transaction) {
        self.entries.push(transaction);
    }

    pub fn entries(&self) -> &[Transaction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total unsigned quantity traded.
    pub fn volume(&self) -> Decimal {
        self.entries.iter().map(|t| t.quantity.abs()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::GoodKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ledger_appends_in_order() {
        let kind = FullType::new(GoodKind::PredictionYes, 1);
        let mut ledger = Ledger::new(kind);
        ledger.add(Transaction::new(kind, dec!(10), Some(1), dec!(0.4)));
        ledger.add(Transaction::new(kind, dec!(-4), Some(2), dec!(0.6)));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.entries()[0].quantity, dec!(10));
        assert_eq!(ledger.volume(), dec!(14));
    }
}
