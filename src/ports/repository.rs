//! Repository Port - Ledger Persistence Interface
//!
//! Trait for mirroring the in-memory ledgers to a durable append-only
//! log. No database dependency - lightweight JSONL format optimized for
//! audit trails and post-session analysis. The in-memory Ledger stays
//! authoritative; this port only externalizes it.

use async_trait::async_trait;

use crate::domain::ledger::Transaction;

/// Durable append-only store for executed transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
  /// Append one executed transaction. Append failures must not block
  /// settlement; callers log and continue.
  async fn append(&self, transaction: &Transaction) -> anyhow::Result<()>;

  /// Load every persisted transaction, oldest first.
  async fn load_all(&self) -> anyhow::Result<Vec<Transaction>>;
}
