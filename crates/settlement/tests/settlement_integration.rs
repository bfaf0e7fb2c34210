//! Integration tests for the settlement scheduler and sweeps.
//!
//! Timer scenarios use millisecond-scale configured windows instead of
//! mocked clocks.

use std::time::Duration;

use common::{Money, UserId};
use domain::{InMemoryCatalogSink, InMemoryNotifier, OrderEngine};
use ledger::{
    BookRecord, BookStatus, ConditionGrade, InMemoryLedger, LedgerStore, OrderRecord, OrderState,
    SettlementOutcome,
};
use settlement::{
    InMemoryPayoutGateway, SettlementConfig, SettlementError, SettlementScheduler,
};

type TestEngine = OrderEngine<InMemoryLedger, InMemoryNotifier, InMemoryCatalogSink>;
type TestScheduler =
    SettlementScheduler<InMemoryLedger, InMemoryNotifier, InMemoryCatalogSink, InMemoryPayoutGateway>;

fn fast_config() -> SettlementConfig {
    SettlementConfig {
        payment_timeout: Duration::from_millis(40),
        no_objection_window: Duration::from_millis(40),
        settlement_grace: Duration::from_millis(40),
        payout_backoff_base: Duration::from_millis(1),
        ..SettlementConfig::default()
    }
}

fn setup(config: SettlementConfig) -> (TestScheduler, TestEngine, InMemoryLedger, InMemoryPayoutGateway) {
    let ledger = InMemoryLedger::new();
    let engine = OrderEngine::new(
        ledger.clone(),
        InMemoryNotifier::new(),
        InMemoryCatalogSink::new(),
    );
    let gateway = InMemoryPayoutGateway::new();
    let scheduler = SettlementScheduler::new(ledger.clone(), engine.clone(), gateway.clone(), config);
    (scheduler, engine, ledger, gateway)
}

async fn pending_order(engine: &TestEngine) -> (BookRecord, OrderRecord) {
    let book = engine
        .list_book(
            "978-0596517748",
            "JavaScript: The Good Parts",
            ConditionGrade::New,
            Money::from_cents(2500),
            UserId::new(),
        )
        .await
        .unwrap();
    let order = engine
        .place_order(book.id, UserId::new(), "main quad")
        .await
        .unwrap();
    (book, order)
}

async fn delivered_order(engine: &TestEngine) -> (BookRecord, OrderRecord) {
    let (book, order) = pending_order(engine).await;
    engine.mark_paid(order.id, order.price).await.unwrap();
    let order = engine.confirm_meetup(order.id).await.unwrap();
    let token = order.handoff_token.clone().unwrap();
    let order = engine.confirm_receipt(order.id, &token).await.unwrap();
    (book, order)
}

#[tokio::test]
async fn explicit_settle_releases_funds() {
    let (scheduler, engine, ledger, gateway) = setup(SettlementConfig::default());
    let (book, order) = delivered_order(&engine).await;

    let order = scheduler.settle(order.id).await.unwrap();
    assert_eq!(order.state, OrderState::Settled);
    assert!(gateway.has_payout(order.id));

    let book = ledger.book(book.id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Sold);

    let settlement = ledger.released_settlement(order.id).await.unwrap().unwrap();
    assert_eq!(settlement.amount, order.price);
}

#[tokio::test]
async fn replayed_settle_is_already_settled() {
    let (scheduler, engine, ledger, _) = setup(SettlementConfig::default());
    let (_, order) = delivered_order(&engine).await;

    scheduler.settle(order.id).await.unwrap();
    let result = scheduler.settle(order.id).await;

    assert!(matches!(result, Err(SettlementError::AlreadySettled(_))));
    assert_eq!(ledger.settlement_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_settles_create_one_record() {
    let (scheduler, engine, ledger, gateway) = setup(SettlementConfig::default());
    let (_, order) = delivered_order(&engine).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let scheduler = scheduler.clone();
        let order_id = order.id;
        handles.push(tokio::spawn(async move { scheduler.settle(order_id).await }));
    }

    let mut released = 0;
    let mut already_settled = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => released += 1,
            Err(SettlementError::AlreadySettled(_)) => already_settled += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(released, 1);
    assert_eq!(already_settled, 3);
    assert_eq!(ledger.settlement_count().await, 1);
    assert_eq!(gateway.payout_count(), 1);

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Settled);
}

#[tokio::test]
async fn settle_before_delivery_is_rejected() {
    let (scheduler, engine, _, gateway) = setup(SettlementConfig::default());
    let (_, order) = pending_order(&engine).await;

    let result = scheduler.settle(order.id).await;
    assert!(matches!(
        result,
        Err(SettlementError::NotDeliveredYet {
            state: OrderState::PendingPayment,
            ..
        })
    ));
    assert_eq!(gateway.payout_count(), 0);
}

#[tokio::test]
async fn disputed_order_withholds_settlement() {
    let (scheduler, engine, _, gateway) = setup(SettlementConfig::default());
    let (_, order) = delivered_order(&engine).await;
    engine.open_dispute(order.id).await.unwrap();

    let result = scheduler.settle(order.id).await;
    assert!(matches!(result, Err(SettlementError::Disputed(_))));
    assert_eq!(gateway.payout_count(), 0);
}

#[tokio::test]
async fn payout_retries_through_transient_outage() {
    let mut config = SettlementConfig::default();
    config.payout_backoff_base = Duration::from_millis(1);
    let (scheduler, engine, _, gateway) = setup(config);
    let (_, order) = delivered_order(&engine).await;

    gateway.set_unavailable_for(2);

    let order = scheduler.settle(order.id).await.unwrap();
    assert_eq!(order.state, OrderState::Settled);
    assert_eq!(gateway.payout_count(), 1);
}

#[tokio::test]
async fn payout_exhaustion_flags_order_and_preserves_state() {
    let mut config = SettlementConfig::default();
    config.payout_backoff_base = Duration::from_millis(1);
    config.payout_attempts = 3;
    let (scheduler, engine, ledger, gateway) = setup(config);
    let (_, order) = delivered_order(&engine).await;

    gateway.set_unavailable_for(10);

    let result = scheduler.settle(order.id).await;
    assert!(matches!(
        result,
        Err(SettlementError::PayoutExhausted { attempts: 3, .. })
    ));

    // Never force-advanced: still Delivered, flagged for the operator,
    // with a withheld settlement row in the audit trail.
    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Delivered);
    assert!(order.settlement_failed);

    let settlements = ledger.settlements_for_order(order.id).await.unwrap();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].outcome, SettlementOutcome::Withheld);
}

#[tokio::test]
async fn sweep_cancels_timed_out_pending_payment() {
    let (scheduler, engine, ledger, _) = setup(fast_config());
    let (book, order) = pending_order(&engine).await;

    // Not yet timed out.
    let stats = scheduler.run_sweep().await.unwrap();
    assert_eq!(stats.cancelled, 0);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let stats = scheduler.run_sweep().await.unwrap();
    assert_eq!(stats.cancelled, 1);

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Cancelled);
    let book = ledger.book(book.id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Listed);
}

#[tokio::test]
async fn sweep_promotes_seller_reported_delivery() {
    let (scheduler, engine, ledger, _) = setup(fast_config());
    let (_, order) = pending_order(&engine).await;
    engine.mark_paid(order.id, order.price).await.unwrap();
    engine.confirm_meetup(order.id).await.unwrap();
    engine.report_delivery(order.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    let stats = scheduler.run_sweep().await.unwrap();
    assert_eq!(stats.promoted, 1);

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert!(matches!(
        order.state,
        OrderState::Delivered | OrderState::Settled
    ));
}

#[tokio::test]
async fn sweep_does_not_promote_unreported_handoff() {
    let (scheduler, engine, ledger, _) = setup(fast_config());
    let (_, order) = pending_order(&engine).await;
    engine.mark_paid(order.id, order.price).await.unwrap();
    engine.confirm_meetup(order.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    let stats = scheduler.run_sweep().await.unwrap();
    assert_eq!(stats.promoted, 0);

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::AwaitingHandoff);
}

#[tokio::test]
async fn sweep_settles_after_grace_period() {
    let (scheduler, engine, ledger, gateway) = setup(fast_config());
    let (_, order) = delivered_order(&engine).await;

    tokio::time::sleep(Duration::from_millis(60)).await;

    let stats = scheduler.run_sweep().await.unwrap();
    assert_eq!(stats.settled, 1);
    assert!(gateway.has_payout(order.id));

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Settled);
}

#[tokio::test]
async fn sweep_skips_disputed_orders() {
    let (scheduler, engine, ledger, gateway) = setup(fast_config());
    let (_, order) = delivered_order(&engine).await;
    engine.open_dispute(order.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    let stats = scheduler.run_sweep().await.unwrap();
    assert_eq!(stats.settled, 0);
    assert_eq!(gateway.payout_count(), 0);

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Disputed);
}

#[tokio::test]
async fn sweep_skips_settlement_failed_orders() {
    let mut config = fast_config();
    config.payout_attempts = 2;
    let (scheduler, engine, ledger, gateway) = setup(config);
    let (_, order) = delivered_order(&engine).await;

    // Exhaust payouts so the order gets flagged.
    gateway.set_unavailable_for(10);
    let _ = scheduler.settle(order.id).await;
    let flagged = ledger.order(order.id).await.unwrap().unwrap();
    assert!(flagged.settlement_failed);

    tokio::time::sleep(Duration::from_millis(60)).await;

    // The sweep leaves the flagged order for the operator.
    gateway.set_unavailable_for(0);
    let stats = scheduler.run_sweep().await.unwrap();
    assert_eq!(stats.settled, 0);

    let order = ledger.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Delivered);
}

#[tokio::test]
async fn operator_retry_after_outage_settles_flagged_order() {
    let mut config = fast_config();
    config.payout_attempts = 2;
    let (scheduler, engine, ledger, gateway) = setup(config);
    let (_, order) = delivered_order(&engine).await;

    gateway.set_unavailable_for(10);
    let _ = scheduler.settle(order.id).await;
    gateway.set_unavailable_for(0);

    // Explicit settle is the operator path; it ignores the marker.
    let order = scheduler.settle(order.id).await.unwrap();
    assert_eq!(order.state, OrderState::Settled);
    assert!(!order.settlement_failed);

    let outcomes: Vec<_> = ledger
        .settlements_for_order(order.id)
        .await
        .unwrap()
        .iter()
        .map(|s| s.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![SettlementOutcome::Withheld, SettlementOutcome::Released]
    );
}
