//! Prometheus Metrics - Server Observability
//!
//! Registers server-level Prometheus metrics and serves them alongside
//! liveness/readiness probes on one axum listener:
//! - `/metrics` — Prometheus text exposition
//! - `/live`    — 200 while the process runs
//! - `/ready`   — 503 once graceful shutdown begins

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::sync::watch;
use tracing::info;

/// Centralized Prometheus metrics for the auction server.
///
/// All metrics follow the naming convention `agoranet_*`.
pub struct MetricsRegistry {
    registry: Registry,
    /// Agents currently registered on a live connection.
    pub connected_agents: IntGauge,
    /// Inbound messages decoded, by kind.
    pub messages_received: IntCounterVec,
    /// Malformed or unroutable frames dropped.
    pub messages_dropped: IntCounter,
    /// Auctions closed since start.
    pub auctions_closed: IntCounter,
    /// Bilateral trades settled since start.
    pub trades_settled: IntCounter,
    /// Market-maker purchases executed since start.
    pub purchases: IntCounter,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let connected_agents = IntGauge::new(
            "agoranet_connected_agents",
            "Agents currently registered on a live connection",
        )?;
        let messages_received = IntCounterVec::new(
            Opts::new("agoranet_messages_received_total", "Inbound messages decoded"),
            &["kind"],
        )?;
        let messages_dropped = IntCounter::new(
            "agoranet_messages_dropped_total",
            "Malformed or unroutable messages dropped",
        )?;
        let auctions_closed =
            IntCounter::new("agoranet_auctions_closed_total", "Auctions closed")?;
        let trades_settled =
            IntCounter::new("agoranet_trades_settled_total", "Bilateral trades settled")?;
        let purchases =
            IntCounter::new("agoranet_purchases_total", "Market-maker purchases executed")?;

        registry.register(Box::new(connected_agents.clone()))?;
        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_dropped.clone()))?;
        registry.register(Box::new(auctions_closed.clone()))?;
        registry.register(Box::new(trades_settled.clone()))?;
        registry.register(Box::new(purchases.clone()))?;

        Ok(Self {
            registry,
            connected_agents,
            messages_received,
            messages_dropped,
            auctions_closed,
            trades_settled,
            purchases,
        })
    }

    /// Render the current metrics in Prometheus text format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[derive(Clone)]
struct ServeState {
    metrics: Arc<MetricsRegistry>,
    ready: watch::Receiver<bool>,
}

/// Serve `/metrics`, `/live`, and `/ready` until the listener fails.
pub async fn serve(
    bind_addr: String,
    metrics: Arc<MetricsRegistry>,
    ready: watch::Receiver<bool>,
) -> Result<()> {
    let state = ServeState { metrics, ready };
    let app = Router::new()
        .route(
            "/metrics",
            get(|State(state): State<ServeState>| async move { state.metrics.gather() }),
        )
        .route("/live", get(|| async { StatusCode::OK }))
        .route(
            "/ready",
            get(|State(state): State<ServeState>| async move {
                if *state.ready.borrow() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            }),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
