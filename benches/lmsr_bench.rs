//! LMSR Pricing Benchmarks — Hot-Path Performance Validation
//!
//! Benchmarks the cost-function math that runs on every quote and
//! purchase: pricing, cost deltas, and the two inversions.
//!
//! Run with: cargo bench --bench lmsr_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal_macros::dec;

use agoranet::domain::lmsr::{LiquiditySensitive, LmsrBackend, MarketMaker};
use agoranet::domain::value::Outcome;

/// Benchmark instantaneous price computation.
fn bench_lmsr_price(c: &mut Criterion) {
    let mut mm = LmsrBackend::new(dec!(100));
    mm.apply(Outcome::Yes, dec!(60));
    mm.apply(Outcome::No, dec!(40));

    c.bench_function("lmsr_price_binary", |b| {
        b.iter(|| {
            let _price = mm.price(black_box(Outcome::Yes));
        });
    });
}

/// Benchmark the cost of a 10-share purchase quote.
fn bench_lmsr_ask(c: &mut Criterion) {
    let mut mm = LmsrBackend::new(dec!(100));
    mm.apply(Outcome::Yes, dec!(60));
    mm.apply(Outcome::No, dec!(40));

    c.bench_function("lmsr_ask_10_shares", |b| {
        b.iter(|| {
            let _cost = mm.ask(black_box(Outcome::Yes), black_box(dec!(10)));
        });
    });
}

/// Benchmark the price-target inversion.
fn bench_lmsr_how_many(c: &mut Criterion) {
    let mm = LmsrBackend::new(dec!(100));

    c.bench_function("lmsr_how_many", |b| {
        b.iter(|| {
            let _shares = mm.how_many(black_box(dec!(0.7)), black_box(Outcome::Yes));
        });
    });
}

/// Benchmark the budget inversion.
fn bench_lmsr_budget_to_shares(c: &mut Criterion) {
    let mm = LmsrBackend::new(dec!(100));

    c.bench_function("lmsr_budget_to_shares", |b| {
        b.iter(|| {
            let _shares = mm.budget_to_shares(black_box(dec!(25)), black_box(Outcome::No));
        });
    });
}

/// Benchmark quoting against a liquidity-sensitive backend whose depth
/// is recomputed from volume and trade count on every call.
fn bench_liquidity_sensitive_ask(c: &mut Criterion) {
    let mut mm = LiquiditySensitive::new(dec!(0.2));
    mm.apply(Outcome::Yes, dec!(50));
    mm.apply(Outcome::No, dec!(50));

    c.bench_function("liquidity_sensitive_ask", |b| {
        b.iter(|| {
            let _cost = mm.ask(black_box(Outcome::No), black_box(dec!(5)));
        });
    });
}

criterion_group!(
    benches,
    bench_lmsr_price,
    bench_lmsr_ask,
    bench_lmsr_how_many,
    bench_lmsr_budget_to_shares,
    bench_liquidity_sensitive_ask,
);
criterion_main!(benches);
