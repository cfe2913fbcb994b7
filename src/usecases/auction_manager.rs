//! Auction Manager - Registry and Tick Sweep
//!
//! Owns every open one-sided auction behind a per-auction lock and drives
//! the tick-based lifecycle. The sweep holds an auction's lock across
//! tick, the is-over check, and close, so a bid racing the close observes
//! either the open auction or the terminal state — never a half-closed
//! one. Closed auctions are removed after their outcome is handed back.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::domain::auction::{AuctionOutcome, OneSidedAuction};
use crate::domain::bid::BidBundle;
use crate::domain::error::MarketError;
use crate::domain::rules::AuctionAnnouncement;
use crate::domain::value::{AgentId, AuctionId};

/// Everything one sweep produced: terminal outcomes to settle and
/// per-recipient announcements for the auctions still running.
#[derive(Debug, Default)]
pub struct SweepReport {
  pub closed: Vec<(AuctionId, AuctionOutcome)>,
  pub announcements: Vec<(AgentId, AuctionAnnouncement)>,
}

pub struct AuctionManager {
  auctions: RwLock<HashMap<AuctionId, Arc<Mutex<OneSidedAuction>>>>,
}

impl AuctionManager {
  pub fn new() -> Self {
    Self {
      auctions: RwLock::new(HashMap::new()),
    }
  }

  /// Register a new auction. Ids are never reused or replaced.
  pub async fn open(&self, auction: OneSidedAuction) -> Result<(), MarketError> {
    let mut auctions = self.auctions.write().await;
    let id = auction.id();
    if auctions.contains_key(&id) {
      return Err(MarketError::DuplicateAuction(id));
    }
    auctions.insert(id, Arc::new(Mutex::new(auction)));
    info!(auction = id, "Auction opened");
    Ok(())
  }

  /// Route a bid to its auction under that auction's lock.
  pub async fn submit_bid(
    &self,
    id: AuctionId,
    agent: AgentId,
    bundle: BidBundle,
  ) -> Result<(), MarketError> {
    let entry = {
      let auctions = self.auctions.read().await;
      auctions
        .get(&id)
        .cloned()
        .ok_or(MarketError::AuctionNotFound(id))?
    };
    let mut auction = entry.lock().await;
    auction.add_bid(agent, bundle)?;
    debug!(auction = id, agent = agent, "Bid accepted");
    Ok(())
  }

  /// Tick every auction once; close and collect the finished ones, and
  /// build announcements for `recipients` on the ones still open.
  pub async fn sweep(&self, recipients: &[AgentId]) -> SweepReport {
    let entries: Vec<(AuctionId, Arc<Mutex<OneSidedAuction>>)> = {
      let auctions = self.auctions.read().await;
      auctions.iter().map(|(id, e)| (*id, Arc::clone(e))).collect()
    };

    let mut report = SweepReport::default();
    let mut finished = Vec::new();

    for (id, entry) in entries {
      let mut auction = entry.lock().await;
      auction.tick();
      if auction.is_over() {
        let outcome = auction.close().clone();
        info!(auction = id, bids = auction.bid_count(), "Auction closed");
        report.closed.push((id, outcome));
        finished.push(id);
      } else {
        for agent in recipients {
          report
            .announcements
            .push((*agent, auction.announcement(*agent)));
        }
      }
    }

    if !finished.is_empty() {
      let mut auctions = self.auctions.write().await;
      for id in finished {
        auctions.remove(&id);
      }
    }
    report
  }

  pub async fn len(&self) -> usize {
    self.auctions.read().await.len()
  }
}

impl Default for AuctionManager {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::rules::{SealedBidRule, SecondPriceRule, TieBreak};
  use crate::domain::value::{FullType, GoodKind, Tradeable};
  use rust_decimal_macros::dec;

  fn good() -> FullType {
    FullType::new(GoodKind::Commodity, 0)
  }

  fn sealed(id: AuctionId, ticks: u32) -> OneSidedAuction {
    OneSidedAuction::new(
      id,
      vec![Tradeable::security(None, dec!(1), good())],
      BidBundle::zero_reserve([good()]),
      Box::new(SealedBidRule::new(ticks, TieBreak::Arrival)),
      Box::new(SecondPriceRule),
      dec!(20),
    )
  }

  #[tokio::test]
  async fn test_duplicate_auction_rejected() {
    let manager = AuctionManager::new();
    manager.open(sealed(0, 5)).await.unwrap();
    let err = manager.open(sealed(0, 5)).await.unwrap_err();
    assert!(matches!(err, MarketError::DuplicateAuction(0)));
  }

  #[tokio::test]
  async fn test_sweep_closes_and_removes_finished_auctions() {
    let manager = AuctionManager::new();
    manager.open(sealed(0, 1)).await.unwrap();
    manager
      .submit_bid(0, 1, BidBundle::single(good(), None, dec!(60)))
      .await
      .unwrap();
    manager
      .submit_bid(0, 2, BidBundle::single(good(), None, dec!(40)))
      .await
      .unwrap();

    let report = manager.sweep(&[1, 2]).await;
    assert_eq!(report.closed.len(), 1);
    let (id, outcome) = &report.closed[0];
    assert_eq!(*id, 0);
    assert_eq!(outcome.payments[0].amount, dec!(40));
    assert_eq!(manager.len().await, 0);

    // The auction is gone: late bids are unroutable.
    let err = manager
      .submit_bid(0, 3, BidBundle::single(good(), None, dec!(99)))
      .await
      .unwrap_err();
    assert!(matches!(err, MarketError::AuctionNotFound(0)));
  }

  #[tokio::test]
  async fn test_sweep_announces_open_auctions_per_recipient() {
    let manager = AuctionManager::new();
    manager.open(sealed(0, 10)).await.unwrap();
    let report = manager.sweep(&[1, 2, 3]).await;
    assert!(report.closed.is_empty());
    assert_eq!(report.announcements.len(), 3);
  }
}
