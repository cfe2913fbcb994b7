//! Trade Desk - Pending Bilateral Trade Requests
//!
//! The set of outstanding trade requests. Removal is linearizable per
//! request: `take` claims a request exactly once, so an accept and a
//! replayed accept (or a concurrent reject) can never both settle.
//! Requests have no expiry unless one is configured; the optional sweep
//! drops requests older than the configured age.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::trading::TradeRequest;

pub struct TradeDesk {
  pending: Mutex<HashMap<Uuid, TradeRequest>>,
  max_age: Option<Duration>,
}

impl TradeDesk {
  pub fn new() -> Self {
    Self {
      pending: Mutex::new(HashMap::new()),
      max_age: None,
    }
  }

  /// A desk that expires pending requests after `secs` seconds.
  pub fn with_expiry(secs: i64) -> Self {
    Self {
      pending: Mutex::new(HashMap::new()),
      max_age: Some(Duration::seconds(secs)),
    }
  }

  /// Park a stamped request until someone decides on it.
  pub async fn submit(&self, request: TradeRequest) {
    let mut pending = self.pending.lock().await;
    debug!(request = %request.id, from = request.from, "Trade request parked");
    pending.insert(request.id, request);
  }

  /// Claim a request for resolution. Returns None when it was already
  /// claimed (settled, rejected, or expired) — the caller must treat
  /// that as a terminal outcome, not retry.
  pub async fn take(&self, id: Uuid) -> Option<TradeRequest> {
    self.pending.lock().await.remove(&id)
  }

  /// Look at a request without claiming it.
  pub async fn peek(&self, id: Uuid) -> Option<TradeRequest> {
    self.pending.lock().await.get(&id).cloned()
  }

  pub async fn len(&self) -> usize {
    self.pending.lock().await.len()
  }

  /// Drop requests older than the configured age; no-op without one.
  pub async fn expire(&self) -> Vec<TradeRequest> {
    let Some(max_age) = self.max_age else {
      return Vec::new();
    };
    let cutoff = Utc::now() - max_age;
    let mut pending = self.pending.lock().await;
    let expired_ids: Vec<Uuid> = pending
      .values()
      .filter(|r| r.created_at < cutoff)
      .map(|r| r.id)
      .collect();
    expired_ids
      .into_iter()
      .filter_map(|id| pending.remove(&id))
      .collect()
  }
}

impl Default for TradeDesk {
  fn default() -> Self {
    Self::new()
  }
}
