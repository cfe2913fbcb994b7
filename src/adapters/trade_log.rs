//! Transaction Log - Append-only JSONL Ledger Mirror
//!
//! Implements the `LedgerStore` port over daily JSONL files in
//! `ledger/YYYY-MM-DD.jsonl`. Each line is one self-contained executed
//! transaction, so the session's trading history survives the process
//! and can be streamed line-by-line for analysis.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::domain::ledger::Transaction;
use crate::ports::repository::LedgerStore;

/// Append-only JSONL transaction logger with daily file rotation.
pub struct TransactionLog {
    ledger_dir: PathBuf,
}

impl TransactionLog {
    /// Create a transaction log rooted in the given data directory.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let ledger_dir = Path::new(data_dir).join("ledger");
        fs::create_dir_all(&ledger_dir)
            .await
            .context("Failed to create ledger directory")?;
        info!(dir = %ledger_dir.display(), "Transaction log ready");
        Ok(Self { ledger_dir })
    }

    fn today_path(&self) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        self.ledger_dir.join(format!("{date}.jsonl"))
    }
}

#[async_trait]
impl LedgerStore for TransactionLog {
    async fn append(&self, transaction: &Transaction) -> Result<()> {
        let mut json =
            serde_json::to_string(transaction).context("Failed to serialize transaction")?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.today_path())
            .await
            .context("Failed to open ledger log file")?;
        file.write_all(json.as_bytes())
            .await
            .context("Failed to write transaction")?;
        file.flush().await.context("Failed to flush ledger log")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();
        let mut entries = fs::read_dir(&self.ledger_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "jsonl") {
                let content = fs::read_to_string(&path).await?;
                for line in content.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Transaction>(line) {
                        Ok(transaction) => transactions.push(transaction),
                        Err(error) => {
                            warn!(
                                file = %path.display(),
                                error = %error,
                                "Skipping malformed ledger record"
                            );
                        }
                    }
                }
            }
        }
        transactions.sort_by_key(|t| t.executed_at);
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::{FullType, GoodKind};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_append_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("agoranet-log-{}", std::process::id()));
        let dir_str = dir.to_string_lossy().to_string();
        let log = TransactionLog::new(&dir_str).await.unwrap();

        let kind = FullType::new(GoodKind::PredictionYes, 1);
        log.append(&Transaction::new(kind, dec!(10), Some(3), dec!(0.4)))
            .await
            .unwrap();
        log.append(&Transaction::new(kind, dec!(-2), Some(4), dec!(0.6)))
            .await
            .unwrap();

        let loaded = log.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].quantity, dec!(10));
        assert_eq!(loaded[1].agent, Some(4));

        let _ = fs::remove_dir_all(&dir).await;
    }
}
