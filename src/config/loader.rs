//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config: AppConfig = toml::from_str(&content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;

  info!(
    auctions = config.auctions.len(),
    markets = config.markets.len(),
    endowment = config.bank.endowment,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive numeric values where required
/// - Unique auction and instrument ids
/// - Exactly one liquidity mode per LMSR market
/// - Known mechanism and policy names
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    config.bank.endowment >= 0.0,
    "bank endowment must not be negative, got {}",
    config.bank.endowment
  );
  anyhow::ensure!(
    config.server.tick_ms > 0,
    "server tick_ms must be positive"
  );
  anyhow::ensure!(
    config.auction.increment >= 0.0,
    "auction increment must not be negative, got {}",
    config.auction.increment
  );
  anyhow::ensure!(
    matches!(config.auction.tie_break.as_str(), "arrival" | "agent_id"),
    "auction tie_break must be \"arrival\" or \"agent_id\", got {}",
    config.auction.tie_break
  );

  let mut auction_ids = HashSet::new();
  for (i, auction) in config.auctions.iter().enumerate() {
    anyhow::ensure!(
      auction_ids.insert(auction.id),
      "auction {} reuses id {}",
      i,
      auction.id
    );
    anyhow::ensure!(
      matches!(auction.mechanism.as_str(), "sealed" | "outcry"),
      "auction {} mechanism must be \"sealed\" or \"outcry\", got {}",
      auction.id,
      auction.mechanism
    );
    anyhow::ensure!(
      matches!(auction.payment.as_str(), "first" | "second"),
      "auction {} payment must be \"first\" or \"second\", got {}",
      auction.id,
      auction.payment
    );
    anyhow::ensure!(
      auction.ticks > 0,
      "auction {} ticks must be positive",
      auction.id
    );
    anyhow::ensure!(
      auction.quantity > 0.0,
      "auction {} quantity must be positive",
      auction.id
    );
    anyhow::ensure!(
      auction.reserve >= 0.0,
      "auction {} reserve must not be negative",
      auction.id
    );
  }

  let mut instrument_ids = HashSet::new();
  for (i, market) in config.markets.iter().enumerate() {
    match market.mechanism.as_str() {
      "lmsr" => {
        let yes = market
          .yes_id
          .with_context(|| format!("lmsr market {i} is missing yes_id"))?;
        let no = market
          .no_id
          .with_context(|| format!("lmsr market {i} is missing no_id"))?;
        anyhow::ensure!(
          instrument_ids.insert(yes) && instrument_ids.insert(no),
          "market {} reuses an instrument id",
          i
        );
        anyhow::ensure!(
          market.alpha.is_some() != market.depth.is_some(),
          "lmsr market {} must set exactly one of alpha or depth",
          i
        );
        if let Some(alpha) = market.alpha {
          anyhow::ensure!(alpha > 0.0, "lmsr market {} alpha must be positive", i);
        }
        if let Some(depth) = market.depth {
          anyhow::ensure!(depth > 0.0, "lmsr market {} depth must be positive", i);
        }
      }
      "book" => {
        let id = market
          .book_id
          .with_context(|| format!("book market {i} is missing book_id"))?;
        anyhow::ensure!(
          instrument_ids.insert(id),
          "market {} reuses instrument id {}",
          i,
          id
        );
      }
      other => {
        anyhow::bail!("market {} mechanism must be \"lmsr\" or \"book\", got {other}", i);
      }
    }
  }

  if let Some(expiry) = config.trade.expiry_seconds {
    anyhow::ensure!(expiry > 0, "trade expiry_seconds must be positive");
  }

  Ok(())
}
