//! Configuration Module - TOML-based Server Configuration
//!
//! Loads and validates configuration from `config.toml`. The game a
//! server runs — which auctions open, which markets exist, what agents
//! are endowed with — is data here, never hardcoded in the domain layer.

pub mod loader;

use serde::Deserialize;

/// Top-level server configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the server begins accepting connections.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Server identity and transport.
  pub server: ServerConfig,
  /// Account endowment policy.
  pub bank: BankConfig,
  /// Defaults applied to every auction.
  pub auction: AuctionDefaults,
  /// Auctions opened at startup.
  #[serde(default)]
  pub auctions: Vec<AuctionSpec>,
  /// Exchange instruments opened at startup.
  #[serde(default)]
  pub markets: Vec<MarketSpec>,
  /// Bilateral trade handling.
  #[serde(default)]
  pub trade: TradeConfig,
  /// Metrics and health endpoints.
  pub metrics: MetricsConfig,
  /// Ledger persistence.
  pub persistence: PersistenceConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Human-readable server name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// WebSocket listener address.
  #[serde(default = "default_bind_addr")]
  pub bind_addr: String,
  /// Auction sweep interval in milliseconds.
  #[serde(default = "default_tick_ms")]
  pub tick_ms: u64,
}

/// Account endowment policy.
#[derive(Debug, Clone, Deserialize)]
pub struct BankConfig {
  /// Cash granted to every newly registered agent.
  pub endowment: f64,
}

/// Defaults applied to every auction.
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionDefaults {
  /// Minimum raise over an agent's own prior bid (open outcry).
  #[serde(default = "default_increment")]
  pub increment: f64,
  /// Tie-break policy: "arrival" or "agent_id".
  #[serde(default = "default_tie_break")]
  pub tie_break: String,
}

/// One auction opened at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionSpec {
  /// Auction identifier, unique across the session.
  pub id: u64,
  /// Mechanism: "sealed" or "outcry".
  pub mechanism: String,
  /// Identifier of the auctioned commodity.
  pub good_id: u64,
  /// Units of the good on offer.
  #[serde(default = "default_quantity")]
  pub quantity: f64,
  /// Reserve price floor.
  #[serde(default)]
  pub reserve: f64,
  /// Tick budget (sealed) or idle-tick limit (outcry).
  pub ticks: u32,
  /// Payment rule: "first" or "second".
  #[serde(default = "default_payment")]
  pub payment: String,
}

/// One exchange instrument opened at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketSpec {
  /// Mechanism: "lmsr" or "book".
  pub mechanism: String,
  /// YES instrument id (lmsr only).
  pub yes_id: Option<u64>,
  /// NO instrument id (lmsr only).
  pub no_id: Option<u64>,
  /// Book instrument id (book only).
  pub book_id: Option<u64>,
  /// Liquidity sensitivity alpha: depth scales with volume and trades.
  pub alpha: Option<f64>,
  /// Fixed liquidity parameter b (mutually exclusive with alpha).
  pub depth: Option<f64>,
}

/// Bilateral trade handling.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeConfig {
  /// Expire pending trade requests after this many seconds; None keeps
  /// them pending until decided.
  pub expiry_seconds: Option<i64>,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable the Prometheus/health endpoint.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

/// Ledger persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Enable the JSONL ledger mirror.
  #[serde(default)]
  pub enabled: bool,
  /// Directory for JSONL ledger files.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_bind_addr() -> String {
  "0.0.0.0:2121".to_string()
}

fn default_tick_ms() -> u64 {
  1000
}

fn default_increment() -> f64 {
  20.0
}

fn default_tie_break() -> String {
  "arrival".to_string()
}

fn default_quantity() -> f64 {
  1.0
}

fn default_payment() -> String {
  "second".to_string()
}

fn default_true() -> bool {
  true
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_data_dir() -> String {
  "data".to_string()
}
