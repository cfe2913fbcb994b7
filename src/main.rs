//! Agoranet — Entry Point
//!
//! Initializes configuration, logging, the shared market services, and
//! the agent-facing WebSocket transport. Runs until SIGINT/SIGTERM.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Shutdown + readiness channels
//! 4. Build services (bank, registry, trade desk, exchange, auctions)
//! 5. Build the dispatcher over the WebSocket transport
//! 6. Open the configured auctions and markets
//! 7. Spawn metrics/health server
//! 8. Spawn WebSocket accept loop feeding the dispatcher
//! 9. Spawn the dispatcher loop (message fan-out + auction sweep)
//! 10. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use tokio::signal;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

mod adapters;
mod config;
mod domain;
mod ports;
mod usecases;

use adapters::metrics::MetricsRegistry;
use adapters::trade_log::TransactionLog;
use adapters::ws::WsTransport;
use config::AppConfig;
use domain::auction::OneSidedAuction;
use domain::bid::BidBundle;
use domain::lmsr::{LiquiditySensitive, LmsrBackend, MarketMaker};
use domain::rules::{
    AllocationRule, FirstPriceRule, OpenOutcryRule, PaymentRule, SealedBidRule, SecondPriceRule,
    TieBreak,
};
use domain::value::{FullType, GoodKind, Tradeable};
use ports::repository::LedgerStore;
use usecases::auction_manager::AuctionManager;
use usecases::bank::Bank;
use usecases::dispatch::Dispatcher;
use usecases::exchange::Exchange;
use usecases::registry::AgentRegistry;
use usecases::trade_desk::TradeDesk;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config = config::loader::load_config("config.toml")
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.server.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.server.name,
        version = env!("CARGO_PKG_VERSION"),
        auctions = config.auctions.len(),
        markets = config.markets.len(),
        "Starting Agoranet server"
    );

    // ── 3. Shutdown and readiness channels ──────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let (ready_tx, ready_rx) = watch::channel(true);

    // ── 4. Shared market services ───────────────────────────
    let endowment = Decimal::from_f64(config.bank.endowment).unwrap_or(Decimal::ZERO);
    let bank = Arc::new(Bank::new(endowment));
    let registry = Arc::new(AgentRegistry::new());
    let desk = Arc::new(match config.trade.expiry_seconds {
        Some(secs) => TradeDesk::with_expiry(secs),
        None => TradeDesk::new(),
    });
    let exchange = Arc::new(Exchange::new());
    let auctions = Arc::new(AuctionManager::new());

    let journal: Option<Arc<dyn LedgerStore>> = if config.persistence.enabled {
        let log = TransactionLog::new(&config.persistence.data_dir)
            .await
            .context("Failed to create transaction log")?;
        Some(Arc::new(log))
    } else {
        None
    };

    // ── 5. Dispatcher over the WebSocket transport ──────────
    let transport = Arc::new(WsTransport::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&bank),
        Arc::clone(&registry),
        Arc::clone(&desk),
        Arc::clone(&exchange),
        Arc::clone(&auctions),
        Arc::clone(&transport) as Arc<dyn ports::transport::Transport>,
        journal,
    ));

    // ── 6. Open the configured auctions and markets ─────────
    bootstrap(&dispatcher, &config).await?;

    // ── 7. Metrics/health server ────────────────────────────
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);
    let metrics_handle = if config.metrics.enabled {
        let addr = config.metrics.bind_address.clone();
        let metrics = Arc::clone(&metrics);
        Some(tokio::spawn(async move {
            if let Err(e) = adapters::metrics::serve(addr, metrics, ready_rx).await {
                error!(error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    // ── 8. WebSocket accept loop ────────────────────────────
    let (inbound_tx, inbound_rx) = mpsc::channel(1024);
    let ws_shutdown = shutdown_tx.subscribe();
    let ws_transport = Arc::clone(&transport);
    let ws_registry = Arc::clone(&registry);
    let bind_addr = config.server.bind_addr.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(e) =
            adapters::ws::serve(bind_addr, ws_transport, ws_registry, inbound_tx, ws_shutdown)
                .await
        {
            error!(error = %e, "WebSocket transport failed");
        }
    });

    // ── 9. Dispatcher loop ──────────────────────────────────
    let dispatcher_shutdown = shutdown_tx.subscribe();
    let tick = std::time::Duration::from_millis(config.server.tick_ms);
    let dispatcher_handle = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            if let Err(e) = dispatcher.run(inbound_rx, tick, dispatcher_shutdown).await {
                error!(error = %e, "Dispatcher failed");
            }
        }
    });

    dispatcher.broadcast_market_updates().await;
    info!("All tasks spawned — server is running");

    // ── 10. Wait for SIGINT or SIGTERM ──────────────────────
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT received, initiating graceful shutdown");
        }
    }

    // Graceful shutdown: stop accepting, drain, report unready.
    let _ = shutdown_tx.send(());
    let _ = ready_tx.send(false);

    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), dispatcher_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), ws_handle).await;
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Open every auction and market the configuration names.
async fn bootstrap(dispatcher: &Dispatcher, config: &AppConfig) -> Result<()> {
    let tie = match config.auction.tie_break.as_str() {
        "agent_id" => TieBreak::AgentId,
        _ => TieBreak::Arrival,
    };
    let increment =
        Decimal::from_f64(config.auction.increment).unwrap_or_else(|| Decimal::from(20));

    for spec in &config.auctions {
        let kind = FullType::new(GoodKind::Commodity, spec.good_id);
        let quantity = Decimal::from_f64(spec.quantity).unwrap_or(Decimal::ONE);
        let reserve_price = Decimal::from_f64(spec.reserve).unwrap_or(Decimal::ZERO);
        let items = vec![Tradeable::security(None, quantity, kind)];
        let reserve = BidBundle::single(kind, None, reserve_price);

        let allocation: Box<dyn AllocationRule> = match spec.mechanism.as_str() {
            "outcry" => Box::new(OpenOutcryRule::new(spec.ticks, tie)),
            _ => Box::new(SealedBidRule::new(spec.ticks, tie)),
        };
        let payment: Box<dyn PaymentRule> = match spec.payment.as_str() {
            "first" => Box::new(FirstPriceRule),
            _ => Box::new(SecondPriceRule),
        };

        dispatcher
            .auctions()
            .open(OneSidedAuction::new(
                spec.id, items, reserve, allocation, payment, increment,
            ))
            .await
            .with_context(|| format!("Failed to open auction {}", spec.id))?;
    }

    for (i, market) in config.markets.iter().enumerate() {
        match market.mechanism.as_str() {
            "lmsr" => {
                let yes = market.yes_id.expect("validated");
                let no = market.no_id.expect("validated");
                let backend: Box<dyn MarketMaker> = if let Some(alpha) = market.alpha {
                    Box::new(LiquiditySensitive::new(
                        Decimal::from_f64(alpha).context("invalid alpha")?,
                    ))
                } else {
                    let depth = market.depth.expect("validated");
                    Box::new(LmsrBackend::new(
                        Decimal::from_f64(depth).context("invalid depth")?,
                    ))
                };
                dispatcher
                    .exchange()
                    .open_prediction_pair(yes, no, backend)
                    .await
                    .with_context(|| format!("Failed to open lmsr market {i}"))?;
            }
            "book" => {
                let id = market.book_id.expect("validated");
                dispatcher
                    .exchange()
                    .open_book(id)
                    .await
                    .with_context(|| format!("Failed to open book market {i}"))?;
            }
            other => warn!(mechanism = other, "Skipping unknown market mechanism"),
        }
    }

    Ok(())
}
