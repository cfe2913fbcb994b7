//! Exchange - Market Instrument Registry
//!
//! Registers two-sided instruments under unique security ids and keeps an
//! append-only ledger per instrument. The two outcomes of one prediction
//! market are separate instruments sharing a single LMSR backend, exactly
//! as agents see them: a YES book and a NO book quoting complementary
//! prices. Colliding ids are rejected explicitly — open never silently
//! replaces a live market.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::domain::double_auction::{DoubleAuction, Fill, Side};
use crate::domain::error::MarketError;
use crate::domain::ledger::{Ledger, Transaction};
use crate::domain::lmsr::MarketMaker;
use crate::domain::value::{AgentId, FullType, GoodKind, Outcome, SecurityId, Tradeable, WorldState};
use crate::ports::transport::MarketSnapshot;

/// Result of a purchase against a market maker.
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
  /// Net cost: positive = the agent pays, negative = net proceeds.
  pub cost: Decimal,
  /// Shares minted to the agent.
  pub acquired: Vec<Tradeable>,
  /// Shares the agent must surrender back to the maker.
  pub sold: Vec<Tradeable>,
  /// Ledger records appended by this purchase.
  pub transactions: Vec<Transaction>,
}

/// One registered instrument: its mechanism plus its ledger.
pub struct Instrument {
  id: SecurityId,
  kind: FullType,
  side: MarketSide,
  ledger: Ledger,
}

pub enum MarketSide {
  /// One outcome of a binary prediction market. The backend is shared
  /// with the complementary instrument; its own lock is a plain mutex
  /// because no critical section ever awaits.
  Prediction {
    outcome: Outcome,
    backend: Arc<StdMutex<Box<dyn MarketMaker>>>,
  },
  /// A continuous double-auction book.
  Book(DoubleAuction),
}

impl Instrument {
  pub fn id(&self) -> SecurityId {
    self.id
  }

  pub fn kind(&self) -> FullType {
    self.kind
  }

  pub fn ledger(&self) -> &Ledger {
    &self.ledger
  }

  /// Net cost of buying `buy` and surrendering `sell` shares, without
  /// moving the market.
  pub fn quote(&self, buy: Decimal, sell: Decimal) -> Result<Decimal, MarketError> {
    let MarketSide::Prediction { outcome, backend } = &self.side else {
      return Err(MarketError::UnsupportedOperation(self.id));
    };
    if buy < Decimal::ZERO || sell < Decimal::ZERO || buy + sell == Decimal::ZERO {
      return Err(MarketError::InvalidQuantity(buy + sell));
    }
    let maker = backend.lock().expect("maker lock poisoned");
    Ok(maker.ask(*outcome, buy) - maker.bid(*outcome, sell))
  }

  /// Execute a purchase: move the maker's inventory, append the ledger,
  /// and report what the agent's account must absorb.
  pub fn purchase(
    &mut self,
    agent: AgentId,
    buy: Decimal,
    sell: Decimal,
  ) -> Result<PurchaseOutcome, MarketError> {
    let MarketSide::Prediction { outcome, backend } = &self.side else {
      return Err(MarketError::UnsupportedOperation(self.id));
    };
    if buy < Decimal::ZERO || sell < Decimal::ZERO || buy + sell == Decimal::ZERO {
      return Err(MarketError::InvalidQuantity(buy + sell));
    }

    let mut maker = backend.lock().expect("maker lock poisoned");
    // Both legs are priced against the pre-trade state, then applied;
    // the quoted and executed cost are identical under the held lock.
    let buy_leg = maker.ask(*outcome, buy);
    let sell_leg = maker.bid(*outcome, sell);
    let mut acquired = Vec::new();
    let mut sold = Vec::new();
    let mut transactions = Vec::new();

    if buy > Decimal::ZERO {
      maker.apply(*outcome, buy);
      acquired.push(Tradeable::security(Some(agent), buy, self.kind));
      transactions.push(Transaction::new(self.kind, buy, Some(agent), buy_leg / buy));
    }
    if sell > Decimal::ZERO {
      maker.apply(*outcome, -sell);
      sold.push(Tradeable::security(Some(agent), sell, self.kind));
      transactions.push(Transaction::new(self.kind, -sell, Some(agent), sell_leg / sell));
    }
    for transaction in &transactions {
      self.ledger.add(transaction.clone());
    }

    Ok(PurchaseOutcome {
      cost: buy_leg - sell_leg,
      acquired,
      sold,
      transactions,
    })
  }

  /// Submit a limit order to the double-auction book.
  pub fn submit_order(
    &mut self,
    agent: AgentId,
    side: Side,
    price: Decimal,
    quantity: Decimal,
  ) -> Result<Vec<Fill>, MarketError> {
    let MarketSide::Book(book) = &mut self.side else {
      return Err(MarketError::UnsupportedOperation(self.id));
    };
    let fills = book.submit(agent, side, price, quantity)?;
    for fill in &fills {
      self
        .ledger
        .add(Transaction::new(self.kind, fill.quantity, Some(fill.buyer), fill.price));
    }
    Ok(fills)
  }

  /// Public state of this instrument.
  pub fn snapshot(&self) -> MarketSnapshot {
    match &self.side {
      MarketSide::Prediction { backend, .. } => {
        let maker = backend.lock().expect("maker lock poisoned");
        MarketSnapshot::Prediction {
          security: self.id,
          kind: self.kind,
          price_yes: maker.price(Outcome::Yes),
          price_no: maker.price(Outcome::No),
          depth: maker.depth(),
        }
      }
      MarketSide::Book(book) => MarketSnapshot::Book {
        security: self.id,
        kind: self.kind,
        best_bid: book.best_bid(),
        best_ask: book.best_ask(),
        last: book.last_price(),
      },
    }
  }
}

pub struct Exchange {
  instruments: RwLock<HashMap<SecurityId, Arc<Mutex<Instrument>>>>,
}

impl Exchange {
  pub fn new() -> Self {
    Self {
      instruments: RwLock::new(HashMap::new()),
    }
  }

  /// Open the YES and NO instruments of one prediction market over a
  /// shared backend. Fails whole if either id collides.
  pub async fn open_prediction_pair(
    &self,
    yes_id: SecurityId,
    no_id: SecurityId,
    backend: Box<dyn MarketMaker>,
  ) -> Result<(), MarketError> {
    let mut instruments = self.instruments.write().await;
    if instruments.contains_key(&yes_id) {
      return Err(MarketError::DuplicateInstrument(yes_id));
    }
    if no_id == yes_id || instruments.contains_key(&no_id) {
      return Err(MarketError::DuplicateInstrument(no_id));
    }
    let shared = Arc::new(StdMutex::new(backend));
    for (id, outcome, kind) in [
      (yes_id, Outcome::Yes, GoodKind::PredictionYes),
      (no_id, Outcome::No, GoodKind::PredictionNo),
    ] {
      let kind = FullType::new(kind, id);
      instruments.insert(
        id,
        Arc::new(Mutex::new(Instrument {
          id,
          kind,
          side: MarketSide::Prediction {
            outcome,
            backend: Arc::clone(&shared),
          },
          ledger: Ledger::new(kind),
        })),
      );
    }
    info!(yes = yes_id, no = no_id, "Prediction market opened");
    Ok(())
  }

  /// Open a double-auction book for a commodity.
  pub async fn open_book(&self, id: SecurityId) -> Result<FullType, MarketError> {
    let mut instruments = self.instruments.write().await;
    if instruments.contains_key(&id) {
      return Err(MarketError::DuplicateInstrument(id));
    }
    let kind = FullType::new(GoodKind::Commodity, id);
    instruments.insert(
      id,
      Arc::new(Mutex::new(Instrument {
        id,
        kind,
        side: MarketSide::Book(DoubleAuction::new(kind)),
        ledger: Ledger::new(kind),
      })),
    );
    info!(id = id, "Double-auction book opened");
    Ok(kind)
  }

  /// The lock entry for one instrument.
  pub async fn instrument(&self, id: SecurityId) -> Result<Arc<Mutex<Instrument>>, MarketError> {
    let instruments = self.instruments.read().await;
    instruments
      .get(&id)
      .cloned()
      .ok_or(MarketError::InstrumentNotFound(id))
  }

  /// Submit a book order; settlement of the fills is the caller's job.
  pub async fn submit_order(
    &self,
    id: SecurityId,
    agent: AgentId,
    side: Side,
    price: Decimal,
    quantity: Decimal,
  ) -> Result<Vec<Fill>, MarketError> {
    let entry = self.instrument(id).await?;
    let mut instrument = entry.lock().await;
    instrument.submit_order(agent, side, price, quantity)
  }

  /// Deregister an instrument against a resolved world. Returns the
  /// closed instrument so the caller can convert holdings of its type
  /// and archive its ledger.
  pub async fn close(
    &self,
    id: SecurityId,
    _world: &WorldState,
  ) -> Result<(FullType, Ledger), MarketError> {
    let entry = {
      let mut instruments = self.instruments.write().await;
      instruments
        .remove(&id)
        .ok_or(MarketError::InstrumentNotFound(id))?
    };
    let instrument = entry.lock().await;
    info!(id = id, kind = %instrument.kind, "Instrument closed");
    Ok((instrument.kind, instrument.ledger.clone()))
  }

  pub async fn snapshot(&self, id: SecurityId) -> Result<MarketSnapshot, MarketError> {
    let entry = self.instrument(id).await?;
    let instrument = entry.lock().await;
    Ok(instrument.snapshot())
  }

  /// Public state of every open instrument.
  pub async fn snapshots(&self) -> Vec<MarketSnapshot> {
    let entries: Vec<Arc<Mutex<Instrument>>> = {
      let instruments = self.instruments.read().await;
      instruments.values().cloned().collect()
    };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
      out.push(entry.lock().await.snapshot());
    }
    out
  }

  pub async fn len(&self) -> usize {
    self.instruments.read().await.len()
  }
}

impl Default for Exchange {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::lmsr::LiquiditySensitive;
  use rust_decimal_macros::dec;

  fn backend() -> Box<dyn MarketMaker> {
    Box::new(LiquiditySensitive::new(dec!(0.2)))
  }

  #[tokio::test]
  async fn test_duplicate_instrument_rejected() {
    let exchange = Exchange::new();
    exchange.open_prediction_pair(1, 2, backend()).await.unwrap();
    let err = exchange
      .open_prediction_pair(1, 3, backend())
      .await
      .unwrap_err();
    assert!(matches!(err, MarketError::DuplicateInstrument(1)));
    let err = exchange.open_book(2).await.unwrap_err();
    assert!(matches!(err, MarketError::DuplicateInstrument(2)));
    assert_eq!(exchange.len().await, 2);
  }

  #[tokio::test]
  async fn test_pair_shares_one_backend() {
    let exchange = Exchange::new();
    exchange.open_prediction_pair(1, 2, backend()).await.unwrap();

    // Buying NO moves the YES price too: same backend.
    let before = match exchange.snapshot(1).await.unwrap() {
      MarketSnapshot::Prediction { price_yes, .. } => price_yes,
      MarketSnapshot::Book { .. } => unreachable!(),
    };
    let entry = exchange.instrument(2).await.unwrap();
    entry.lock().await.purchase(9, dec!(50), dec!(0)).unwrap();
    let after = match exchange.snapshot(1).await.unwrap() {
      MarketSnapshot::Prediction { price_yes, .. } => price_yes,
      MarketSnapshot::Book { .. } => unreachable!(),
    };
    assert!(after < before, "buying NO must lower the YES price");
  }

  #[tokio::test]
  async fn test_purchase_mints_shares_and_appends_ledger() {
    let exchange = Exchange::new();
    exchange.open_prediction_pair(1, 2, backend()).await.unwrap();
    let entry = exchange.instrument(1).await.unwrap();
    let mut instrument = entry.lock().await;
    let outcome = instrument.purchase(7, dec!(10), dec!(0)).unwrap();
    assert!(outcome.cost > Decimal::ZERO);
    assert_eq!(outcome.acquired.len(), 1);
    assert_eq!(outcome.acquired[0].quantity, dec!(10));
    assert_eq!(outcome.acquired[0].owner, Some(7));
    assert_eq!(instrument.ledger().len(), 1);
  }

  #[tokio::test]
  async fn test_close_removes_instrument() {
    let exchange = Exchange::new();
    exchange.open_prediction_pair(1, 2, backend()).await.unwrap();
    let world = WorldState::resolved(Outcome::Yes);
    let (kind, _ledger) = exchange.close(1, &world).await.unwrap();
    assert_eq!(kind, FullType::new(GoodKind::PredictionYes, 1));
    assert!(matches!(
      exchange.close(1, &world).await.unwrap_err(),
      MarketError::InstrumentNotFound(1)
    ));
    assert_eq!(exchange.len().await, 1);
  }

  #[tokio::test]
  async fn test_purchase_on_book_unsupported() {
    let exchange = Exchange::new();
    exchange.open_book(5).await.unwrap();
    let entry = exchange.instrument(5).await.unwrap();
    let err = entry.lock().await.purchase(1, dec!(1), dec!(0)).unwrap_err();
    assert!(matches!(err, MarketError::UnsupportedOperation(5)));
  }
}
