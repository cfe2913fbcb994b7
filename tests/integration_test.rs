//! Integration Tests - End-to-end Server Component Testing
//!
//! Drives the dispatcher over the in-process channel transport the way a
//! connected agent would: register, bid, trade, purchase, and observe the
//! typed notifications coming back. Uses mockall for transport mocking
//! and tokio::test for async tests.

use std::sync::Arc;

use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc::UnboundedReceiver;

use agoranet::adapters::channel::ChannelTransport;
use agoranet::domain::auction::OneSidedAuction;
use agoranet::domain::bid::BidBundle;
use agoranet::domain::lmsr::{LiquiditySensitive, MarketMaker};
use agoranet::domain::rules::{SealedBidRule, SecondPriceRule, TieBreak};
use agoranet::domain::value::{
    AgentId, FullType, GoodKind, Outcome, Tradeable, TradeableForm, WorldState,
};
use agoranet::domain::Side;
use agoranet::ports::transport::{
    ConnectionId, Envelope, Inbound, Origin, Outbound, Transport,
};
use agoranet::usecases::auction_manager::AuctionManager;
use agoranet::usecases::bank::Bank;
use agoranet::usecases::dispatch::Dispatcher;
use agoranet::usecases::exchange::Exchange;
use agoranet::usecases::registry::AgentRegistry;
use agoranet::usecases::trade_desk::TradeDesk;

// ---- Harness ----

fn commodity(id: u64) -> FullType {
    FullType::new(GoodKind::Commodity, id)
}

fn sealed_auction(id: u64, good: FullType, ticks: u32) -> OneSidedAuction {
    OneSidedAuction::new(
        id,
        vec![Tradeable::security(None, dec!(1), good)],
        BidBundle::zero_reserve([good]),
        Box::new(SealedBidRule::new(ticks, TieBreak::Arrival)),
        Box::new(SecondPriceRule),
        dec!(20),
    )
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<ChannelTransport>,
}

impl Harness {
    async fn new(endowment: Decimal) -> Self {
        let transport = Arc::new(ChannelTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(Bank::new(endowment)),
            Arc::new(AgentRegistry::new()),
            Arc::new(TradeDesk::new()),
            Arc::new(Exchange::new()),
            Arc::new(AuctionManager::new()),
            Arc::clone(&transport) as Arc<dyn Transport>,
            None,
        ));
        Self {
            dispatcher,
            transport,
        }
    }

    async fn send(&self, connection: ConnectionId, origin: &str, message: Inbound) {
        let origin: Origin = origin.parse().unwrap();
        self.dispatcher
            .handle(Envelope {
                connection,
                origin,
                message,
            })
            .await;
    }

    /// Connect and register an agent; returns its private id and inbox.
    async fn register(
        &self,
        connection: ConnectionId,
        origin: &str,
    ) -> (AgentId, UnboundedReceiver<Outbound>) {
        let mut inbox = self.transport.connect(connection).await;
        self.send(connection, origin, Inbound::Register { reconnect: None })
            .await;
        let agent = match inbox.recv().await.expect("registration reply") {
            Outbound::Registered { agent, .. } => agent,
            other => panic!("expected Registered, got {other:?}"),
        };
        // Initial BankUpdate follows registration.
        let _ = inbox.recv().await;
        (agent, inbox)
    }
}

fn drain(inbox: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut messages = Vec::new();
    while let Ok(message) = inbox.try_recv() {
        messages.push(message);
    }
    messages
}

// ---- Scenario A: second-price sealed auction ----

#[tokio::test]
async fn test_second_price_auction_settles_winner_at_second_bid() {
    let harness = Harness::new(dec!(100)).await;
    let good = commodity(0);
    harness
        .dispatcher
        .auctions()
        .open(sealed_auction(0, good, 1))
        .await
        .unwrap();

    let (alice, mut alice_inbox) = harness.register(1, "10.0.0.1:4000").await;
    let (bob, _bob_inbox) = harness.register(2, "10.0.0.2:4000").await;

    harness
        .send(
            1,
            "10.0.0.1:4000",
            Inbound::Bid {
                auction: 0,
                bundle: BidBundle::single(good, None, dec!(60)),
            },
        )
        .await;
    harness
        .send(
            2,
            "10.0.0.2:4000",
            Inbound::Bid {
                auction: 0,
                bundle: BidBundle::single(good, None, dec!(40)),
            },
        )
        .await;

    // One tick exhausts the budget; the sweep closes and settles.
    harness.dispatcher.sweep().await;

    let winner = harness.dispatcher.bank().snapshot(alice).await.unwrap();
    assert_eq!(winner.cash, dec!(60), "winner pays the second price");
    assert_eq!(winner.quantity_of(&good), dec!(1));

    let loser = harness.dispatcher.bank().snapshot(bob).await.unwrap();
    assert_eq!(loser.cash, dec!(100));
    assert_eq!(loser.quantity_of(&good), dec!(0));

    // The winner saw a BankUpdate with the settled account.
    let updates = drain(&mut alice_inbox);
    assert!(updates
        .iter()
        .any(|m| matches!(m, Outbound::BankUpdate { new, .. } if new.cash == dec!(60))));

    // The auction is gone; a late bid is rejected as unroutable.
    harness
        .send(
            2,
            "10.0.0.2:4000",
            Inbound::Bid {
                auction: 0,
                bundle: BidBundle::single(good, None, dec!(99)),
            },
        )
        .await;
    assert_eq!(
        harness.dispatcher.bank().snapshot(bob).await.unwrap().cash,
        dec!(100)
    );
}

// ---- Scenario C: registration origin pinning ----

#[tokio::test]
async fn test_reused_id_from_foreign_origin_is_refused() {
    let harness = Harness::new(dec!(100)).await;
    let (alice, _alice_inbox) = harness.register(1, "10.0.0.1:4000").await;

    let mut intruder_inbox = harness.transport.connect(9).await;
    harness
        .send(
            9,
            "172.16.0.9:4000",
            Inbound::Register {
                reconnect: Some(alice),
            },
        )
        .await;

    match intruder_inbox.recv().await.expect("refusal reply") {
        Outbound::Rejection { reason, .. } => {
            assert!(reason.contains("origin"), "unexpected reason: {reason}");
        }
        other => panic!("expected Rejection, got {other:?}"),
    }

    // Original binding retained; the intruder's connection is unbound.
    assert_eq!(harness.dispatcher.registry().agent_for(1).await, Some(alice));
    assert_eq!(harness.dispatcher.registry().agent_for(9).await, None);
}

// ---- At-most-once trade settlement ----

#[tokio::test]
async fn test_replayed_accept_cannot_settle_twice() {
    let harness = Harness::new(dec!(100)).await;
    let (alice, mut alice_inbox) = harness.register(1, "10.0.0.1:4000").await;
    let (bob, mut bob_inbox) = harness.register(2, "10.0.0.2:4000").await;

    // Alice offers 30 cash for 10 cash (a deliberately lopsided trade).
    harness
        .send(
            1,
            "10.0.0.1:4000",
            Inbound::TradeRequest {
                to: None,
                cash_offered: dec!(30),
                goods_offered: vec![],
                cash_requested: dec!(10),
                goods_requested: vec![],
            },
        )
        .await;

    let request_id = drain(&mut bob_inbox)
        .into_iter()
        .find_map(|m| match m {
            Outbound::TradeRequested(request) => Some(request.id),
            _ => None,
        })
        .expect("forwarded trade request");

    let accept = Inbound::TradeDecision {
        request: request_id,
        accept: true,
    };
    harness.send(2, "10.0.0.2:4000", accept.clone()).await;

    let bank = harness.dispatcher.bank();
    assert_eq!(bank.snapshot(alice).await.unwrap().cash, dec!(80));
    assert_eq!(bank.snapshot(bob).await.unwrap().cash, dec!(120));

    // Replaying the identical accept transfers nothing.
    harness.send(2, "10.0.0.2:4000", accept).await;
    assert_eq!(bank.snapshot(alice).await.unwrap().cash, dec!(80));
    assert_eq!(bank.snapshot(bob).await.unwrap().cash, dec!(120));
    assert!(drain(&mut bob_inbox)
        .iter()
        .any(|m| matches!(m, Outbound::Rejection { .. })));

    // Conservation: value moved, none was created.
    assert_eq!(bank.total_cash().await, dec!(200));
    let _ = drain(&mut alice_inbox);
}

// ---- LMSR purchase and resolution ----

#[tokio::test]
async fn test_prediction_market_purchase_and_resolution() {
    let harness = Harness::new(dec!(100)).await;
    harness
        .dispatcher
        .exchange()
        .open_prediction_pair(10, 11, Box::new(LiquiditySensitive::new(dec!(0.2))))
        .await
        .unwrap();

    let (alice, mut alice_inbox) = harness.register(1, "10.0.0.1:4000").await;

    harness
        .send(
            1,
            "10.0.0.1:4000",
            Inbound::Purchase {
                security: 10,
                buy: dec!(10),
                sell: dec!(0),
            },
        )
        .await;

    let yes = FullType::new(GoodKind::PredictionYes, 10);
    let bank = harness.dispatcher.bank();
    let account = bank.snapshot(alice).await.unwrap();
    assert_eq!(account.quantity_of(&yes), dec!(10));
    let cost = dec!(100) - account.cash;
    assert!(cost > Decimal::ZERO && cost < dec!(100));

    // YES resolves true: every share pays 1.
    harness
        .dispatcher
        .close_market(10, WorldState::resolved(Outcome::Yes))
        .await
        .unwrap();

    let settled = bank.snapshot(alice).await.unwrap();
    assert_eq!(settled.cash, dec!(100) - cost + dec!(10));
    assert_eq!(settled.quantity_of(&yes), dec!(0));
    assert!(settled
        .holdings
        .iter()
        .any(|h| h.form == TradeableForm::Settled));

    let messages = drain(&mut alice_inbox);
    assert!(messages
        .iter()
        .any(|m| matches!(m, Outbound::Settlement { realized, .. } if *realized == dec!(10))));

    // Resolving the same instrument twice is an explicit error.
    assert!(harness
        .dispatcher
        .close_market(10, WorldState::resolved(Outcome::Yes))
        .await
        .is_err());
}

// ---- Scenario B: liquidity-sensitive marginal costs ----

#[test]
fn test_liquidity_sensitive_sequential_no_purchases() {
    let mut maker = LiquiditySensitive::new(dec!(0.2));

    let first = maker.ask(Outcome::No, dec!(50));
    maker.apply(Outcome::No, dec!(50));
    let second = maker.ask(Outcome::No, dec!(50));
    maker.apply(Outcome::No, dec!(50));

    assert_ne!(first, second, "depth changed between purchases");

    // price(yes) must equal the logistic of the quantity gap.
    use rust_decimal::prelude::ToPrimitive;
    let (q_yes, q_no) = maker.quantities();
    let b = maker.depth().to_f64().unwrap();
    let expected = {
        let qy = q_yes.to_f64().unwrap();
        let qn = q_no.to_f64().unwrap();
        (qy / b).exp() / ((qy / b).exp() + (qn / b).exp())
    };
    let actual = maker.price(Outcome::Yes).to_f64().unwrap();
    assert!(
        (actual - expected).abs() < 1e-9,
        "price {actual} vs logistic {expected}"
    );
}

// ---- Double-auction fills settle both sides ----

#[tokio::test]
async fn test_book_fill_moves_cash_and_goods() {
    let harness = Harness::new(dec!(100)).await;
    let kind = harness.dispatcher.exchange().open_book(20).await.unwrap();

    let (seller, _seller_inbox) = harness.register(1, "10.0.0.1:4000").await;
    let (buyer, _buyer_inbox) = harness.register(2, "10.0.0.2:4000").await;

    // Seed the seller with inventory to sell.
    harness
        .dispatcher
        .bank()
        .update(seller, |a| {
            Ok(a.add(dec!(0), Some(Tradeable::security(Some(seller), dec!(5), kind))))
        })
        .await
        .unwrap();

    harness
        .send(
            1,
            "10.0.0.1:4000",
            Inbound::Order {
                security: 20,
                side: Side::Sell,
                price: dec!(10),
                quantity: dec!(5),
            },
        )
        .await;
    harness
        .send(
            2,
            "10.0.0.2:4000",
            Inbound::Order {
                security: 20,
                side: Side::Buy,
                price: dec!(12),
                quantity: dec!(5),
            },
        )
        .await;

    let bank = harness.dispatcher.bank();
    let seller_account = bank.snapshot(seller).await.unwrap();
    let buyer_account = bank.snapshot(buyer).await.unwrap();

    // Resting sell at 10 sets the price.
    assert_eq!(seller_account.cash, dec!(150));
    assert_eq!(seller_account.quantity_of(&kind), dec!(0));
    assert_eq!(buyer_account.cash, dec!(50));
    assert_eq!(buyer_account.quantity_of(&kind), dec!(5));
    assert_eq!(bank.total_cash().await, dec!(200));
}

// ---- Unroutable messages are dropped without damage ----

#[tokio::test]
async fn test_message_from_unregistered_connection_is_dropped() {
    let harness = Harness::new(dec!(100)).await;
    let good = commodity(0);
    harness
        .dispatcher
        .auctions()
        .open(sealed_auction(0, good, 5))
        .await
        .unwrap();

    // Never registered: the bid is dropped, nothing settles, no panic.
    harness
        .send(
            77,
            "10.9.9.9:4000",
            Inbound::Bid {
                auction: 0,
                bundle: BidBundle::single(good, None, dec!(50)),
            },
        )
        .await;

    assert_eq!(harness.dispatcher.bank().len().await, 0);
}

// ---- Rejection delivery via a mocked transport ----

mock! {
    pub Net {}

    #[async_trait::async_trait]
    impl Transport for Net {
        async fn send(
            &self,
            connection: ConnectionId,
            message: Outbound,
        ) -> anyhow::Result<()>;

        async fn broadcast(&self, message: Outbound) -> anyhow::Result<()>;
    }
}

#[tokio::test]
async fn test_insufficient_funds_bid_produces_rejection() {
    let mut net = MockNet::new();
    net.expect_send()
        .withf(|_, message| {
            matches!(
                message,
                Outbound::Registered { .. } | Outbound::BankUpdate { .. }
            )
        })
        .returning(|_, _| Ok(()));
    net.expect_send()
        .withf(|connection, message| {
            *connection == 1
                && matches!(
                    message,
                    Outbound::Rejection { reason, .. } if reason.contains("insufficient funds")
                )
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let good = commodity(0);
    let dispatcher = Dispatcher::new(
        Arc::new(Bank::new(dec!(10))),
        Arc::new(AgentRegistry::new()),
        Arc::new(TradeDesk::new()),
        Arc::new(Exchange::new()),
        Arc::new(AuctionManager::new()),
        Arc::new(net) as Arc<dyn Transport>,
        None,
    );
    dispatcher.auctions().open(sealed_auction(0, good, 5)).await.unwrap();

    let origin: Origin = "10.0.0.1:4000".parse().unwrap();
    dispatcher
        .handle(Envelope {
            connection: 1,
            origin,
            message: Inbound::Register { reconnect: None },
        })
        .await;
    dispatcher
        .handle(Envelope {
            connection: 1,
            origin,
            message: Inbound::Bid {
                auction: 0,
                bundle: BidBundle::single(good, None, dec!(50)),
            },
        })
        .await;
}
