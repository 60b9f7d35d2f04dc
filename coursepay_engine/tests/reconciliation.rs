use std::sync::Arc;

use coursepay_engine::{
    api::{AnomalyCategory, OrderFlowApi, ReconciliationApi, ReconciliationError, ReconciliationParams},
    config::{CommerceConfig, ReconciliationConfig},
    db_types::{NewBasket, NewBasketLine, Order, PaymentNotification},
    events::{start_fulfillment_worker, Fulfiller, FulfillmentDispatcher, PostOrderHooks},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    SqliteDatabase,
};
use cp_common::Money;

fn noop_fulfiller() -> Fulfiller {
    Arc::new(|_req| Box::pin(async { Ok(()) }))
}

async fn new_api(url: &str) -> OrderFlowApi<SqliteDatabase> {
    prepare_test_env(url).await;
    let db = SqliteDatabase::new_with_url(url, 5).await.expect("Error creating database");
    let (queue, _worker) = start_fulfillment_worker(noop_fulfiller(), 10);
    let dispatcher = FulfillmentDispatcher::new(noop_fulfiller(), queue, 0);
    OrderFlowApi::new(db, CommerceConfig::default(), dispatcher, PostOrderHooks::default())
}

/// Everything placed during a test lands in the last hour, so scan [now-60m, now).
fn recent_window() -> ReconciliationParams {
    ReconciliationParams { start_delta_minutes: 60, end_delta_minutes: 0, ..Default::default() }
}

async fn place_paid_order(api: &OrderFlowApi<SqliteDatabase>, owner: &str, reference: &str, cents: i64) -> Order {
    let basket = api.create_basket(NewBasket::new(owner, "EDX")).await.unwrap();
    api.add_line(basket.id, NewBasketLine::new("course-101", "seat", 1, Money::from_cents(cents))).await.unwrap();
    api.freeze_basket(basket.id).await.unwrap();
    let notification = PaymentNotification {
        processor: "cybersource".to_string(),
        reference: reference.to_string(),
        amount: Money::from_cents(cents),
        currency: "USD".to_string(),
        basket_id: basket.id,
    };
    let record = api.handle_payment(notification).await.unwrap();
    api.place_order(basket.id, &record).await.unwrap()
}

/// Simulates upstream drift the auditor exists to catch: the stored order total no longer matches its payment.
async fn tamper_order_total(api: &OrderFlowApi<SqliteDatabase>, order_id: i64, cents: i64) {
    sqlx::query("UPDATE orders SET total_price = ? WHERE id = ?")
        .bind(cents)
        .bind(order_id)
        .execute(api.db().pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn a_clean_window_produces_a_clean_report() {
    let url = random_db_path();
    let api = new_api(&url).await;
    place_paid_order(&api, "alice", "cs-1", 9_000).await;
    place_paid_order(&api, "bob", "cs-2", 12_000).await;

    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let report = auditor.run(recent_window()).await.unwrap();
    assert_eq!(report.orders_scanned, 2);
    assert!(report.is_clean());
    assert_eq!(report.error_count(), 0);
}

/// An order placed in the same wall-clock second as the window's exclusive end bound must still be scanned;
/// whole-second truncation of either side of the comparison would silently drop the boundary second.
#[tokio::test]
async fn orders_placed_in_the_end_bounds_second_are_scanned() {
    let url = random_db_path();
    let api = new_api(&url).await;
    place_paid_order(&api, "alice", "cs-1", 9_000).await;

    // The audit runs immediately, so the order's timestamp and the end bound land in the same second.
    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let report = auditor.run(recent_window()).await.unwrap();
    assert_eq!(report.orders_scanned, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn an_empty_window_is_clean() {
    let url = random_db_path();
    let api = new_api(&url).await;
    place_paid_order(&api, "alice", "cs-1", 9_000).await;

    // A window entirely in the past contains nothing.
    let params = ReconciliationParams { start_delta_minutes: 600, end_delta_minutes: 540, ..Default::default() };
    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let report = auditor.run(params).await.unwrap();
    assert_eq!(report.orders_scanned, 0);
    assert!(report.is_clean());
}

#[tokio::test]
async fn an_inverted_window_is_rejected() {
    let url = random_db_path();
    let api = new_api(&url).await;
    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let params = ReconciliationParams { start_delta_minutes: 40, end_delta_minutes: 240, ..Default::default() };
    let err = auditor.run(params).await.unwrap_err();
    assert!(matches!(err, ReconciliationError::InvalidWindow(40, 240)));
}

#[tokio::test]
async fn mismatched_totals_fail_a_zero_threshold_run() {
    let url = random_db_path();
    let api = new_api(&url).await;
    let order = place_paid_order(&api, "alice", "cs-1", 9_000).await;
    tamper_order_total(&api, order.id, 10_000).await;

    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let err = auditor.run(recent_window()).await.unwrap_err();
    let ReconciliationError::ThresholdExceeded(report) = err else {
        panic!("expected a threshold failure");
    };
    assert_eq!(report.error_count(), 1);
    let anomalies = &report.categories[&AnomalyCategory::OrdersMismatchedTotals];
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].order_id, order.id);
    assert_eq!(anomalies[0].payments.len(), 1);
}

#[tokio::test]
async fn count_thresholds_tolerate_that_many_errors() {
    let url = random_db_path();
    let api = new_api(&url).await;
    let order = place_paid_order(&api, "alice", "cs-1", 9_000).await;
    place_paid_order(&api, "bob", "cs-2", 12_000).await;
    tamper_order_total(&api, order.id, 10_000).await;

    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    // One error against a count threshold of 1 passes.
    let params = ReconciliationParams { threshold: 1.0, ..recent_window() };
    let report = auditor.run(params).await.unwrap();
    assert_eq!(report.error_count(), 1);
}

#[tokio::test]
async fn rate_thresholds_compare_against_the_error_rate() {
    let url = random_db_path();
    let api = new_api(&url).await;
    // 10 orders, 1 of which drifts: a 10% error rate.
    let mut tampered = None;
    for i in 0..10 {
        let order = place_paid_order(&api, &format!("user-{i}"), &format!("cs-{i}"), 9_000).await;
        if i == 0 {
            tampered = Some(order.id);
        }
    }
    tamper_order_total(&api, tampered.unwrap(), 10_000).await;

    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let passing = ReconciliationParams { threshold: 0.2, ..recent_window() };
    let report = auditor.run(passing).await.unwrap();
    assert_eq!(report.orders_scanned, 10);
    assert_eq!(report.error_count(), 1);
    assert!((report.error_rate() - 0.1).abs() < f64::EPSILON);

    let failing = ReconciliationParams { threshold: 0.05, ..recent_window() };
    assert!(matches!(auditor.run(failing).await, Err(ReconciliationError::ThresholdExceeded(_))));
}

#[tokio::test]
async fn refunds_exceeding_payments_are_flagged() {
    let url = random_db_path();
    let api = new_api(&url).await;
    let order = place_paid_order(&api, "alice", "cs-1", 9_000).await;
    api.record_refund(&order.order_number, Money::from_cents(10_000), "cybersource", "rf-1").await.unwrap();

    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let err = auditor.run(recent_window()).await.unwrap_err();
    let ReconciliationError::ThresholdExceeded(report) = err else {
        panic!("expected a threshold failure");
    };
    let anomalies = &report.categories[&AnomalyCategory::OrdersRefundExceeded];
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].order_id, order.id);
}

#[tokio::test]
async fn missing_payments_are_flagged_unless_the_order_is_exempt() {
    let url = random_db_path();
    let api = new_api(&url).await;

    // A free, code-product order legitimately has no payment.
    let exempt = api.create_basket(NewBasket::new("alice", "EDX")).await.unwrap();
    api.add_line(exempt.id, NewBasketLine::new("course-101", "enrollment_code", 1, Money::from_cents(0)))
        .await
        .unwrap();
    api.freeze_basket(exempt.id).await.unwrap();
    let exempt_order = api.place_free_order(exempt.id).await.unwrap();

    // A paid-class order whose total drifted away from zero has lost its payment trail.
    let broken = api.create_basket(NewBasket::new("bob", "EDX")).await.unwrap();
    api.add_line(broken.id, NewBasketLine::new("course-202", "seat", 1, Money::from_cents(0))).await.unwrap();
    api.freeze_basket(broken.id).await.unwrap();
    let broken_order = api.place_free_order(broken.id).await.unwrap();
    tamper_order_total(&api, broken_order.id, 9_000).await;

    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let err = auditor.run(recent_window()).await.unwrap_err();
    let ReconciliationError::ThresholdExceeded(report) = err else {
        panic!("expected a threshold failure");
    };
    let anomalies = &report.categories[&AnomalyCategory::OrdersNoPayment];
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].order_id, broken_order.id);
    assert_ne!(anomalies[0].order_id, exempt_order.id);
}

#[tokio::test]
async fn support_mode_reports_only_mismatches_with_the_signed_difference() {
    let url = random_db_path();
    let api = new_api(&url).await;
    let overcharged = place_paid_order(&api, "alice", "cs-1", 9_000).await;
    tamper_order_total(&api, overcharged.id, 8_000).await;
    // A refund drift that plain mode would flag; support mode ignores it.
    let refunded = place_paid_order(&api, "bob", "cs-2", 9_000).await;
    api.record_refund(&refunded.order_number, Money::from_cents(10_000), "cybersource", "rf-1").await.unwrap();

    let auditor = ReconciliationApi::new(api.db().clone(), ReconciliationConfig::default());
    let params = ReconciliationParams { support_mode: true, threshold: 10.0, ..recent_window() };
    // Support mode fails on any hit, ignoring the threshold.
    let err = auditor.run(params).await.unwrap_err();
    let ReconciliationError::ThresholdExceeded(report) = err else {
        panic!("expected a threshold failure");
    };
    assert_eq!(report.error_count(), 1);
    let anomalies = &report.categories[&AnomalyCategory::OrdersMismatchedTotalsSupport];
    assert_eq!(anomalies[0].order_id, overcharged.id);
    // The payment captured 90.00 against an 80.00 order: 10.00 is owed back.
    assert_eq!(anomalies[0].refund_amount, Some(Money::from_cents(1_000)));
}
