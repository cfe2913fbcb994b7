//! Dispatcher - Message Routing and Settlement
//!
//! The application service behind the server: every inbound message is
//! routed here, validated against the sender's authenticated identity,
//! executed against the owning resource under that resource's lock, and
//! answered with typed notifications. A failed precondition produces a
//! rejection referencing the offending request and changes nothing; a
//! message from an unregistered connection is dropped but logged.
//!
//! Settlement discipline:
//! - Accounts move value only through copy-returning Account operations
//!   swapped in under the per-agent lock (two-account settlements lock in
//!   ascending agent-id order via the bank).
//! - Purchases hold the account lock and then the instrument lock, so the
//!   quoted and charged cost cannot diverge.
//! - Trade requests settle at most once: the desk's `take` is the
//!   linearization point for accept and reject alike.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::account::Account;
use crate::domain::bid::BidBundle;
use crate::domain::double_auction::{Fill, Side};
use crate::domain::error::MarketError;
use crate::domain::ledger::Transaction;
use crate::domain::trading::TradeRequest;
use crate::domain::value::{
  AgentId, AuctionId, FullType, PublicId, SecurityId, Tradeable, WorldState,
};
use crate::ports::repository::LedgerStore;
use crate::ports::transport::{ConnectionId, Envelope, Inbound, Outbound, Transport};

use super::auction_manager::AuctionManager;
use super::bank::Bank;
use super::exchange::Exchange;
use super::registry::AgentRegistry;
use super::trade_desk::TradeDesk;

pub struct Dispatcher {
  bank: Arc<Bank>,
  registry: Arc<AgentRegistry>,
  desk: Arc<TradeDesk>,
  exchange: Arc<Exchange>,
  auctions: Arc<AuctionManager>,
  transport: Arc<dyn Transport>,
  journal: Option<Arc<dyn LedgerStore>>,
}

impl Dispatcher {
  pub fn new(
    bank: Arc<Bank>,
    registry: Arc<AgentRegistry>,
    desk: Arc<TradeDesk>,
    exchange: Arc<Exchange>,
    auctions: Arc<AuctionManager>,
    transport: Arc<dyn Transport>,
    journal: Option<Arc<dyn LedgerStore>>,
  ) -> Self {
    Self {
      bank,
      registry,
      desk,
      exchange,
      auctions,
      transport,
      journal,
    }
  }

  pub fn bank(&self) -> &Arc<Bank> {
    &self.bank
  }

  pub fn registry(&self) -> &Arc<AgentRegistry> {
    &self.registry
  }

  pub fn exchange(&self) -> &Arc<Exchange> {
    &self.exchange
  }

  pub fn auctions(&self) -> &Arc<AuctionManager> {
    &self.auctions
  }

  pub fn desk(&self) -> &Arc<TradeDesk> {
    &self.desk
  }

  /// Route one inbound message. Never fails outward: every error path
  /// ends in a rejection to the sender or an observable drop.
  pub async fn handle(&self, envelope: Envelope) {
    let Envelope {
      connection,
      origin,
      message,
    } = envelope;

    if let Inbound::Register { reconnect } = message {
      self.on_register(connection, origin, reconnect).await;
      return;
    }

    let Some(agent) = self.registry.agent_for(connection).await else {
      // Unroutable: sender never registered. Dropped, but never silently.
      warn!(
        connection = connection,
        message = ?message,
        "Dropping message from unregistered connection"
      );
      return;
    };

    let result = match message.clone() {
      Inbound::Register { .. } => unreachable!("handled above"),
      Inbound::Bid { auction, bundle } => self.on_bid(agent, auction, bundle).await,
      Inbound::Purchase {
        security,
        buy,
        sell,
      } => self.on_purchase(connection, agent, security, buy, sell).await,
      Inbound::Order {
        security,
        side,
        price,
        quantity,
      } => self.on_order(agent, security, side, price, quantity).await,
      Inbound::TradeRequest {
        to,
        cash_offered,
        goods_offered,
        cash_requested,
        goods_requested,
      } => {
        self
          .on_trade_request(
            connection,
            agent,
            to,
            cash_offered,
            goods_offered,
            cash_requested,
            goods_requested,
          )
          .await
      }
      Inbound::TradeDecision { request, accept } => {
        self.on_trade_decision(agent, request, accept).await
      }
    };

    if let Err(error) = result {
      debug!(agent = agent, error = %error, "Request rejected");
      self.reject(connection, &error, message).await;
    }
  }

  async fn reject(&self, connection: ConnectionId, error: &MarketError, request: Inbound) {
    let rejection = Outbound::Rejection {
      reason: error.to_string(),
      request: Box::new(request),
    };
    if let Err(e) = self.transport.send(connection, rejection).await {
      warn!(connection = connection, error = %e, "Failed to deliver rejection");
    }
  }

  // ── Registration ────────────────────────────────────────

  async fn on_register(
    &self,
    connection: ConnectionId,
    origin: std::net::SocketAddr,
    reconnect: Option<AgentId>,
  ) {
    match self.registry.register(connection, origin, reconnect).await {
      Ok(registered) => {
        let account = if registered.fresh {
          self.bank.open_account(registered.agent).await
        } else {
          match self.bank.snapshot(registered.agent).await {
            Ok(account) => account,
            Err(_) => self.bank.open_account(registered.agent).await,
          }
        };
        let _ = self
          .transport
          .send(
            connection,
            Outbound::Registered {
              agent: registered.agent,
              public: registered.public,
            },
          )
          .await;
        let _ = self
          .transport
          .send(
            connection,
            Outbound::BankUpdate {
              old: None,
              new: account,
            },
          )
          .await;
      }
      Err(error) => {
        // Refusals surface only to the connecting client.
        self
          .reject(connection, &error, Inbound::Register { reconnect })
          .await;
      }
    }
  }

  // ── Auctions ────────────────────────────────────────────

  async fn on_bid(
    &self,
    agent: AgentId,
    auction: AuctionId,
    bundle: BidBundle,
  ) -> Result<(), MarketError> {
    let account = self.bank.snapshot(agent).await?;
    let cost = bundle.cost();
    if account.cash < cost {
      return Err(MarketError::InsufficientFunds {
        needed: cost,
        available: account.cash,
      });
    }
    self.auctions.submit_bid(auction, agent, bundle).await
  }

  // ── Market-maker purchases ──────────────────────────────

  async fn on_purchase(
    &self,
    connection: ConnectionId,
    agent: AgentId,
    security: SecurityId,
    buy: Decimal,
    sell: Decimal,
  ) -> Result<(), MarketError> {
    let account_entry = self.bank.entry(agent).await?;
    let instrument_entry = self.exchange.instrument(security).await?;

    // Account before instrument, always: the quoted cost cannot move
    // between validation and execution while both locks are held.
    let mut account = account_entry.lock().await;
    let mut instrument = instrument_entry.lock().await;

    let surrendered = if sell > Decimal::ZERO {
      vec![Tradeable::security(Some(agent), sell, instrument.kind())]
    } else {
      Vec::new()
    };
    let cost = instrument.quote(buy, sell)?;
    let charged = cost.max(Decimal::ZERO);
    let credited = (-cost).max(Decimal::ZERO);

    let old = account.clone();
    let interim = old.remove(charged, &surrendered)?;
    let outcome = instrument.purchase(agent, buy, sell)?;
    let new = interim.add_all(credited, outcome.acquired);
    *account = new.clone();

    let snapshot = instrument.snapshot();
    drop(instrument);
    drop(account);

    info!(
      agent = agent,
      security = security,
      buy = %buy,
      sell = %sell,
      cost = %cost,
      "Purchase settled"
    );

    self.journal_all(&outcome.transactions).await;
    let _ = self
      .transport
      .send(
        connection,
        Outbound::BankUpdate {
          old: Some(old),
          new,
        },
      )
      .await;
    let _ = self.transport.broadcast(Outbound::MarketUpdate(snapshot)).await;
    Ok(())
  }

  // ── Double-auction orders ───────────────────────────────

  async fn on_order(
    &self,
    agent: AgentId,
    security: SecurityId,
    side: Side,
    price: Decimal,
    quantity: Decimal,
  ) -> Result<(), MarketError> {
    let instrument_entry = self.exchange.instrument(security).await?;
    let kind = instrument_entry.lock().await.kind();

    // Taker precondition on the snapshot; each fill re-checks under the
    // pairwise account locks at settlement.
    let account = self.bank.snapshot(agent).await?;
    match side {
      Side::Buy => {
        let needed = price * quantity;
        if account.cash < needed {
          return Err(MarketError::InsufficientFunds {
            needed,
            available: account.cash,
          });
        }
      }
      Side::Sell => {
        let held = account.quantity_of(&kind);
        if held < quantity {
          return Err(MarketError::InsufficientHoldings {
            kind,
            needed: quantity,
            available: held,
          });
        }
      }
    }

    let fills = self
      .exchange
      .submit_order(security, agent, side, price, quantity)
      .await?;
    for fill in &fills {
      self.settle_fill(kind, fill).await;
    }

    if let Ok(snapshot) = self.exchange.snapshot(security).await {
      let _ = self.transport.broadcast(Outbound::MarketUpdate(snapshot)).await;
    }
    Ok(())
  }

  /// Move cash and shares for one matched fill. A side that can no
  /// longer cover voids the fill for both parties — logged, not fatal.
  async fn settle_fill(&self, kind: FullType, fill: &Fill) {
    let total = fill.price * fill.quantity;
    let quantity = fill.quantity;
    let buyer = fill.buyer;
    let seller = fill.seller;

    let settled = self
      .bank
      .transfer(buyer, seller, |buyer_account, seller_account| {
        let bought = Tradeable::security(Some(buyer), quantity, kind);
        let sold = Tradeable::security(Some(seller), quantity, kind);
        let new_buyer = buyer_account.remove(total, &[])?.add(Decimal::ZERO, Some(bought));
        let new_seller = seller_account.remove(Decimal::ZERO, &[sold])?.add(total, None);
        Ok((new_buyer, new_seller))
      })
      .await;

    match settled {
      Ok(((old_buyer, new_buyer), (old_seller, new_seller))) => {
        self
          .journal_all(&[Transaction::new(kind, quantity, Some(buyer), fill.price)])
          .await;
        self
          .send_bank_update(buyer, Some(old_buyer), new_buyer)
          .await;
        self
          .send_bank_update(seller, Some(old_seller), new_seller)
          .await;
      }
      Err(error) => {
        warn!(
          buyer = buyer,
          seller = seller,
          error = %error,
          "Fill voided: a side cannot cover"
        );
      }
    }
  }

  // ── Bilateral trades ────────────────────────────────────

  #[allow(clippy::too_many_arguments)]
  async fn on_trade_request(
    &self,
    connection: ConnectionId,
    agent: AgentId,
    to: Option<PublicId>,
    cash_offered: Decimal,
    goods_offered: Vec<Tradeable>,
    cash_requested: Decimal,
    goods_requested: Vec<Tradeable>,
  ) -> Result<(), MarketError> {
    let public = self
      .registry
      .public_of(agent)
      .await
      .ok_or(MarketError::UnknownAgent(agent))?;

    let request = TradeRequest::stamped(
      public,
      to,
      cash_offered,
      goods_offered,
      cash_requested,
      goods_requested,
    );
    info!(request = %request.id, from = public, "Trade request received");

    // Everyone sees the safe copy, including the initiator's connection.
    let forwarded = Outbound::TradeRequested(request.clone());
    self.desk.submit(request).await;
    if let Err(error) = self.transport.broadcast(forwarded).await {
      warn!(connection = connection, error = %error, "Trade request broadcast failed");
    }
    Ok(())
  }

  async fn on_trade_decision(
    &self,
    agent: AgentId,
    request_id: Uuid,
    accept: bool,
  ) -> Result<(), MarketError> {
    let public = self
      .registry
      .public_of(agent)
      .await
      .ok_or(MarketError::UnknownAgent(agent))?;

    let Some(pending) = self.desk.peek(request_id).await else {
      // Already settled, rejected, or never existed: terminal either
      // way, and a replayed accept must not move value again.
      return Err(MarketError::RequestNotPending(request_id));
    };

    if !accept {
      // Either party may withdraw; anyone else is ignored.
      if pending.from == public || pending.accepts_from(public) {
        if self.desk.take(request_id).await.is_some() {
          info!(request = %request_id, by = public, "Trade request rejected");
        }
      }
      return Ok(());
    }

    if !pending.accepts_from(public) {
      return Err(MarketError::WrongCounterparty);
    }

    // Linearization point: whoever takes the request settles it; a
    // concurrent decision finds it gone.
    let Some(request) = self.desk.take(request_id).await else {
      return Err(MarketError::RequestNotPending(request_id));
    };

    let initiator = self
      .registry
      .private_of(request.from)
      .await
      .ok_or(MarketError::UnknownAgent(agent))?;

    let settled = self
      .bank
      .transfer(agent, initiator, |acceptor_account, initiator_account| {
        if !request.is_satisfied(acceptor_account, initiator_account) {
          return Err(MarketError::InsufficientFunds {
            needed: request.cash_requested.max(request.cash_offered),
            available: acceptor_account.cash.min(initiator_account.cash),
          });
        }
        let new_acceptor = acceptor_account
          .remove(request.cash_requested, &request.goods_requested)?
          .add_all(request.cash_offered, request.goods_offered.clone());
        let new_initiator = initiator_account
          .remove(request.cash_offered, &request.goods_offered)?
          .add_all(request.cash_requested, request.goods_requested.clone());
        Ok((new_acceptor, new_initiator))
      })
      .await?;

    let ((old_acceptor, new_acceptor), (old_initiator, new_initiator)) = settled;
    info!(request = %request_id, acceptor = public, initiator = request.from, "Trade settled");
    self
      .send_bank_update(agent, Some(old_acceptor), new_acceptor)
      .await;
    self
      .send_bank_update(initiator, Some(old_initiator), new_initiator)
      .await;
    Ok(())
  }

  // ── Periodic sweep ──────────────────────────────────────

  /// Tick all auctions, settle the ones that finished, announce the rest,
  /// and expire stale trade requests.
  #[instrument(skip(self))]
  pub async fn sweep(&self) {
    let connected = self.registry.connected().await;
    let agents: Vec<AgentId> = connected.iter().map(|(_, a)| *a).collect();

    let report = self.auctions.sweep(&agents).await;

    for (auction, outcome) in report.closed {
      for payment in &outcome.payments {
        let goods: Vec<Tradeable> = outcome
          .allocation
          .awards
          .iter()
          .filter(|(winner, _)| *winner == payment.agent)
          .map(|(_, good)| good.clone())
          .collect();
        match self
          .bank
          .update(payment.agent, |account| {
            Ok(account.add_all(-payment.amount, goods.clone()))
          })
          .await
        {
          Ok((old, new)) => {
            info!(
              auction = auction,
              winner = payment.agent,
              paid = %payment.amount,
              "Auction settled"
            );
            self.send_bank_update(payment.agent, Some(old), new).await;
          }
          Err(error) => {
            warn!(
              auction = auction,
              winner = payment.agent,
              error = %error,
              "Auction settlement skipped: winner has no account"
            );
          }
        }
      }
    }

    for (agent, announcement) in report.announcements {
      if let Some(connection) = self.registry.connection_for(agent).await {
        let _ = self
          .transport
          .send(connection, Outbound::BidRequest(announcement))
          .await;
      }
    }

    let expired = self.desk.expire().await;
    for request in expired {
      debug!(request = %request.id, "Trade request expired");
    }
  }

  /// Resolve an instrument: deregister it, convert every holding of its
  /// type, and notify the affected agents.
  pub async fn close_market(
    &self,
    security: SecurityId,
    world: WorldState,
  ) -> Result<(), MarketError> {
    let (kind, ledger) = self.exchange.close(security, &world).await?;
    let conversions = self.bank.convert_all(&kind, &world).await;
    info!(
      security = security,
      kind = %kind,
      holders = conversions.len(),
      trades = ledger.len(),
      "Market resolved"
    );

    for conversion in conversions {
      if let Some(connection) = self.registry.connection_for(conversion.agent).await {
        let _ = self
          .transport
          .send(
            connection,
            Outbound::Settlement {
              security: kind,
              outcome: world.outcome,
              realized: conversion.realized,
            },
          )
          .await;
        let _ = self
          .transport
          .send(
            connection,
            Outbound::BankUpdate {
              old: Some(conversion.old),
              new: conversion.new,
            },
          )
          .await;
      }
    }
    Ok(())
  }

  /// Broadcast the public state of every open instrument.
  pub async fn broadcast_market_updates(&self) {
    for snapshot in self.exchange.snapshots().await {
      let _ = self.transport.broadcast(Outbound::MarketUpdate(snapshot)).await;
    }
  }

  /// Main loop: inbound messages fan out to their own handler tasks,
  /// the tick interval drives the auction sweep.
  pub async fn run(
    self: Arc<Self>,
    mut inbound: mpsc::Receiver<Envelope>,
    tick: std::time::Duration,
    mut shutdown: broadcast::Receiver<()>,
  ) -> Result<()> {
    let mut ticker = tokio::time::interval(tick);
    info!(tick_ms = tick.as_millis() as u64, "Dispatcher running");
    loop {
      tokio::select! {
        biased;
        _ = shutdown.recv() => {
          info!("Dispatcher received shutdown signal");
          break;
        }
        _ = ticker.tick() => {
          self.sweep().await;
        }
        received = inbound.recv() => {
          match received {
            Some(envelope) => {
              let dispatcher = Arc::clone(&self);
              tokio::spawn(async move { dispatcher.handle(envelope).await });
            }
            None => {
              info!("Inbound channel closed, dispatcher stopping");
              break;
            }
          }
        }
      }
    }
    Ok(())
  }

  async fn send_bank_update(&self, agent: AgentId, old: Option<Account>, new: Account) {
    if let Some(connection) = self.registry.connection_for(agent).await {
      let _ = self
        .transport
        .send(connection, Outbound::BankUpdate { old, new })
        .await;
    }
  }

  async fn journal_all(&self, transactions: &[Transaction]) {
    if let Some(journal) = &self.journal {
      for transaction in transactions {
        if let Err(error) = journal.append(transaction).await {
          warn!(error = %error, "Ledger journal append failed");
        }
      }
    }
  }
}
