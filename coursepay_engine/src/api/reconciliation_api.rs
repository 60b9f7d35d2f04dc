//! The transaction auditor: cross-checks a window of orders against their recorded payment events.
//!
//! The auditor is strictly read-only. It performs one bounded query for the window's orders plus one prefetch each
//! for their payment events and lines, then classifies everything in memory. Anomalies are never exceptions during
//! detection; they are aggregated into a report and only escalated to a hard failure when the configured threshold
//! is exceeded. Running the same window twice is safe and yields the same result for the same underlying data.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use cp_common::Money;
use log::*;
use thiserror::Error;

use crate::{
    api::reconciliation_objects::{AnomalyCategory, OrderAnomaly, ReconciliationReport},
    config::ReconciliationConfig,
    db_types::{Order, OrderLine, PaymentEvent, PaymentEventType},
    traits::{CommerceDatabase, CommerceError},
};

const DEFAULT_START_DELTA_MINUTES: i64 = 240;
const DEFAULT_END_DELTA_MINUTES: i64 = 40;

/// Parameters for one auditor run, normally supplied by the scheduled job's flags.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationParams {
    /// Minutes before now marking the *oldest* order to scan.
    pub start_delta_minutes: i64,
    /// Minutes before now marking the scan cutoff. The default window ends 40 minutes ago so that in-flight
    /// asynchronous fulfillment has had time to settle before being judged.
    pub end_delta_minutes: i64,
    /// In `[0, 1)`: the maximum tolerable error *rate*. At `1` or above — or exactly `0` — the maximum tolerable
    /// absolute error *count* (`0` means any error fails).
    pub threshold: f64,
    /// Narrower support-team mode: only mismatched totals, with the signed refund amount, failing on any hit.
    pub support_mode: bool,
}

impl Default for ReconciliationParams {
    fn default() -> Self {
        Self {
            start_delta_minutes: DEFAULT_START_DELTA_MINUTES,
            end_delta_minutes: DEFAULT_END_DELTA_MINUTES,
            threshold: 0.0,
            support_mode: false,
        }
    }
}

impl ReconciliationParams {
    fn threshold_is_rate(&self) -> bool {
        self.threshold > 0.0 && self.threshold < 1.0
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    #[error("Invalid audit window: start delta {0} minutes does not precede end delta {1} minutes")]
    InvalidWindow(i64, i64),
    #[error("Reconciliation threshold exceeded: {}", .0.summary())]
    ThresholdExceeded(Box<ReconciliationReport>),
    #[error("{0}")]
    DatabaseError(#[from] CommerceError),
}

/// `ReconciliationApi` runs the scheduled payment/order audit against a backend.
pub struct ReconciliationApi<B> {
    db: B,
    config: ReconciliationConfig,
}

impl<B> ReconciliationApi<B> {
    pub fn new(db: B, config: ReconciliationConfig) -> Self {
        Self { db, config }
    }
}

impl<B> ReconciliationApi<B>
where B: CommerceDatabase
{
    /// Runs one audit. Returns the report on success (possibly with logged warnings below the threshold), or
    /// [`ReconciliationError::ThresholdExceeded`] carrying the full report when the run must fail loudly.
    pub async fn run(&self, params: ReconciliationParams) -> Result<ReconciliationReport, ReconciliationError> {
        if params.start_delta_minutes <= params.end_delta_minutes {
            return Err(ReconciliationError::InvalidWindow(params.start_delta_minutes, params.end_delta_minutes));
        }
        let now = Utc::now();
        let start = now - Duration::minutes(params.start_delta_minutes);
        let end = now - Duration::minutes(params.end_delta_minutes);
        let orders = self.db.fetch_orders_in_window(start, end).await?;
        let mut report = ReconciliationReport::new(start, end, orders.len());
        if orders.is_empty() {
            info!("🔎️ No orders placed in [{start} .. {end}). Nothing to audit.");
            return Ok(report);
        }
        debug!("🔎️ Auditing {} orders placed in [{start} .. {end})", orders.len());

        let order_ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let events = self.db.fetch_payment_events_for_orders(&order_ids).await?;
        let lines = self.db.fetch_order_lines_for_orders(&order_ids).await?;
        let mut events_by_order: HashMap<i64, Vec<PaymentEvent>> = HashMap::new();
        for event in events {
            if let Some(order_id) = event.order_id {
                events_by_order.entry(order_id).or_default().push(event);
            }
        }
        let mut lines_by_order: HashMap<i64, Vec<OrderLine>> = HashMap::new();
        for line in lines {
            lines_by_order.entry(line.order_id).or_default().push(line);
        }

        for order in &orders {
            let events = events_by_order.get(&order.id).map(Vec::as_slice).unwrap_or(&[]);
            let lines = lines_by_order.get(&order.id).map(Vec::as_slice).unwrap_or(&[]);
            let anomalies = if params.support_mode {
                classify_order_support(order, events)
            } else {
                classify_order(order, events, lines, &self.config)
            };
            report.record_all(anomalies);
        }

        let flunk = if params.support_mode {
            !report.is_clean()
        } else if params.threshold_is_rate() {
            report.error_rate() > params.threshold
        } else {
            report.error_count() as f64 > params.threshold
        };
        if flunk {
            error!("🔎️ {}", report.summary());
            return Err(ReconciliationError::ThresholdExceeded(Box::new(report)));
        }
        if !report.is_clean() {
            warn!("🔎️ Anomalies below threshold {}: {report}", params.threshold);
        } else {
            info!("🔎️ Audit clean: {} orders checked", report.orders_scanned);
        }
        Ok(report)
    }
}

/// Classifies one order against its payment events.
///
/// The payment-count checks are deliberately an `else if` chain, preserved from the reference behaviour: an order
/// reports at most one of no-payment / multi-payment / mismatched-totals, whichever matches first. The
/// refund-exceeded check runs unconditionally afterwards, so an order can appear in that category alongside one of
/// the others. Known limitation, kept so alerting volumes stay comparable.
pub fn classify_order(
    order: &Order,
    events: &[PaymentEvent],
    lines: &[OrderLine],
    config: &ReconciliationConfig,
) -> Vec<OrderAnomaly> {
    let paid: Vec<&PaymentEvent> = events.iter().filter(|e| e.event_type == PaymentEventType::Paid).collect();
    let refunded: Vec<&PaymentEvent> = events.iter().filter(|e| e.event_type == PaymentEventType::Refunded).collect();
    let mut anomalies = Vec::new();

    if paid.is_empty() {
        if requires_payment(order, lines, config) {
            anomalies.push(OrderAnomaly::new(
                AnomalyCategory::OrdersNoPayment,
                format!("Order {} of {} has no recorded payment", order.order_number, order.total_price),
                order,
                &[],
            ));
        }
    } else if paid.len() > 1 {
        anomalies.push(OrderAnomaly::new(
            AnomalyCategory::OrdersMultiPayment,
            format!("Order {} has {} Paid events; multi-payment is not supported", order.order_number, paid.len()),
            order,
            &paid,
        ));
    } else if paid[0].amount != order.total_price {
        anomalies.push(OrderAnomaly::new(
            AnomalyCategory::OrdersMismatchedTotals,
            format!(
                "Order {} total is {} but its payment recorded {}",
                order.order_number, order.total_price, paid[0].amount
            ),
            order,
            &paid,
        ));
    }

    let total_paid: Money = paid.iter().map(|e| e.amount).sum();
    let total_refunded: Money = refunded.iter().map(|e| e.amount).sum();
    if total_refunded > total_paid {
        let involved: Vec<&PaymentEvent> = paid.iter().chain(refunded.iter()).copied().collect();
        anomalies.push(OrderAnomaly::new(
            AnomalyCategory::OrdersRefundExceeded,
            format!(
                "Order {} refunded {total_refunded} against {total_paid} paid",
                order.order_number
            ),
            order,
            &involved,
        ));
    }
    anomalies
}

/// Support mode: only the single-payment totals mismatch, with the signed difference a human needs to settle the
/// account (positive: refund owed to the buyer; negative: an additional charge is outstanding).
pub fn classify_order_support(order: &Order, events: &[PaymentEvent]) -> Vec<OrderAnomaly> {
    let paid: Vec<&PaymentEvent> = events.iter().filter(|e| e.event_type == PaymentEventType::Paid).collect();
    if paid.len() != 1 || paid[0].amount == order.total_price {
        return Vec::new();
    }
    let refund_amount = paid[0].amount - order.total_price;
    vec![
        OrderAnomaly::new(
            AnomalyCategory::OrdersMismatchedTotalsSupport,
            format!(
                "Order {} total is {} but its payment recorded {}; signed difference {refund_amount}",
                order.order_number, order.total_price, paid[0].amount
            ),
            order,
            &paid,
        )
        .with_refund_amount(refund_amount),
    ]
}

/// Whether the order was expected to carry a payment. Zero-value orders and orders consisting entirely of exempt
/// product classes (fully coupon-covered, enrollment codes, ...) legitimately have none.
fn requires_payment(order: &Order, lines: &[OrderLine], config: &ReconciliationConfig) -> bool {
    if order.total_price.is_zero() {
        return false;
    }
    if !lines.is_empty() && lines.iter().all(|l| config.no_payment_exempt_classes.contains(&l.product_class)) {
        return false;
    }
    true
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::db_types::OrderNumber;

    fn order(id: i64, total_cents: i64) -> Order {
        Order {
            id,
            order_number: OrderNumber(format!("EDX-{}", 100_000 + id)),
            basket_id: id,
            partner_code: "EDX".into(),
            total_price: Money::from_cents(total_cents),
            currency: "USD".into(),
            status: crate::db_types::OrderStatusType::Open,
            organization: None,
            created_at: Utc::now(),
        }
    }

    fn event(id: i64, order_id: i64, amount_cents: i64, event_type: PaymentEventType) -> PaymentEvent {
        PaymentEvent {
            id,
            source_id: None,
            basket_id: order_id,
            order_id: Some(order_id),
            amount: Money::from_cents(amount_cents),
            event_type,
            processor: "cybersource".into(),
            reference: format!("ref-{id}"),
            created_at: Utc::now(),
        }
    }

    fn line(order_id: i64, class: &str, unit_cents: i64) -> OrderLine {
        OrderLine {
            id: 1,
            order_id,
            product_sku: "SKU-1".into(),
            product_class: class.into(),
            quantity: 1,
            unit_price: Money::from_cents(unit_cents),
        }
    }

    #[test]
    fn clean_order_reports_nothing() {
        let o = order(1, 9_000);
        let events = vec![event(10, 1, 9_000, PaymentEventType::Paid)];
        let lines = vec![line(1, "seat", 9_000)];
        assert!(classify_order(&o, &events, &lines, &ReconciliationConfig::default()).is_empty());
    }

    #[test]
    fn missing_payment_is_flagged() {
        let o = order(1, 9_000);
        let lines = vec![line(1, "seat", 9_000)];
        let anomalies = classify_order(&o, &[], &lines, &ReconciliationConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].category, AnomalyCategory::OrdersNoPayment);
        assert_eq!(anomalies[0].order_id, 1);
    }

    #[test]
    fn free_orders_are_exempt_from_the_no_payment_check() {
        let o = order(1, 0);
        let anomalies = classify_order(&o, &[], &[], &ReconciliationConfig::default());
        assert!(anomalies.is_empty());
    }

    #[test]
    fn exempt_product_classes_are_not_flagged() {
        let o = order(1, 9_000);
        let lines = vec![line(1, "enrollment_code", 9_000)];
        assert!(classify_order(&o, &[], &lines, &ReconciliationConfig::default()).is_empty());
        // A mixed basket still requires payment.
        let mixed = vec![line(1, "enrollment_code", 4_500), line(1, "seat", 4_500)];
        assert_eq!(classify_order(&o, &[], &mixed, &ReconciliationConfig::default()).len(), 1);
    }

    #[test]
    fn multi_payment_lists_every_payment_id() {
        let o = order(1, 10_000);
        let events =
            vec![event(10, 1, 6_700, PaymentEventType::Paid), event(11, 1, 6_600, PaymentEventType::Paid)];
        let anomalies = classify_order(&o, &events, &[], &ReconciliationConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].category, AnomalyCategory::OrdersMultiPayment);
        let ids: Vec<i64> = anomalies[0].payments.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn mismatched_total_is_flagged_with_both_amounts() {
        let o = order(1, 9_000);
        let events = vec![event(10, 1, 8_000, PaymentEventType::Paid)];
        let anomalies = classify_order(&o, &events, &[], &ReconciliationConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].category, AnomalyCategory::OrdersMismatchedTotals);
        assert!(anomalies[0].message.contains("90.00"));
        assert!(anomalies[0].message.contains("80.00"));
    }

    #[test]
    fn refund_exceeding_paid_is_flagged_with_the_refund_id() {
        let o = order(1, 9_000);
        let events = vec![
            event(10, 1, 9_000, PaymentEventType::Paid),
            event(11, 1, 10_000, PaymentEventType::Refunded),
        ];
        let anomalies = classify_order(&o, &events, &[], &ReconciliationConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].category, AnomalyCategory::OrdersRefundExceeded);
        assert_eq!(anomalies[0].order_id, 1);
        assert!(anomalies[0].payments.iter().any(|p| p.id == 11));
    }

    #[test]
    fn refund_check_runs_on_top_of_the_payment_count_branch() {
        // Mismatched total AND excessive refund: both are reported, because the refund check is unconditional.
        let o = order(1, 9_000);
        let events = vec![
            event(10, 1, 8_000, PaymentEventType::Paid),
            event(11, 1, 9_500, PaymentEventType::Refunded),
        ];
        let anomalies = classify_order(&o, &events, &[], &ReconciliationConfig::default());
        let categories: Vec<AnomalyCategory> = anomalies.iter().map(|a| a.category).collect();
        assert_eq!(
            categories,
            vec![AnomalyCategory::OrdersMismatchedTotals, AnomalyCategory::OrdersRefundExceeded]
        );
    }

    #[test]
    fn payment_count_branches_are_mutually_exclusive() {
        // Two Paid events that also mismatch the total report only multi-payment: the first matching branch wins.
        let o = order(1, 9_000);
        let events =
            vec![event(10, 1, 100, PaymentEventType::Paid), event(11, 1, 100, PaymentEventType::Paid)];
        let anomalies = classify_order(&o, &events, &[], &ReconciliationConfig::default());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].category, AnomalyCategory::OrdersMultiPayment);
    }

    #[test]
    fn support_mode_reports_the_signed_difference() {
        let o = order(1, 9_000);
        let overpaid = vec![event(10, 1, 9_500, PaymentEventType::Paid)];
        let anomalies = classify_order_support(&o, &overpaid);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].category, AnomalyCategory::OrdersMismatchedTotalsSupport);
        assert_eq!(anomalies[0].refund_amount, Some(Money::from_cents(500)));

        let underpaid = vec![event(10, 1, 8_000, PaymentEventType::Paid)];
        let anomalies = classify_order_support(&o, &underpaid);
        assert_eq!(anomalies[0].refund_amount, Some(Money::from_cents(-1_000)));
    }

    #[test]
    fn support_mode_ignores_everything_else() {
        let o = order(1, 9_000);
        assert!(classify_order_support(&o, &[]).is_empty());
        let two_paid =
            vec![event(10, 1, 4_500, PaymentEventType::Paid), event(11, 1, 4_500, PaymentEventType::Paid)];
        assert!(classify_order_support(&o, &two_paid).is_empty());
        let exact = vec![event(10, 1, 9_000, PaymentEventType::Paid)];
        assert!(classify_order_support(&o, &exact).is_empty());
    }

    #[test]
    fn threshold_semantics() {
        // 10 orders scanned, 1 anomaly.
        let mut report = ReconciliationReport::new(Utc::now(), Utc::now(), 10);
        let o = order(1, 9_000);
        let events = vec![event(10, 1, 8_000, PaymentEventType::Paid)];
        report.record_all(classify_order(&o, &events, &[], &ReconciliationConfig::default()));
        assert_eq!(report.error_count(), 1);
        assert!((report.error_rate() - 0.1).abs() < f64::EPSILON);

        // Rate threshold of 20%: 10% passes.
        let rate = ReconciliationParams { threshold: 0.2, ..Default::default() };
        assert!(rate.threshold_is_rate());
        assert!(report.error_rate() <= rate.threshold);

        // Threshold 0 means any error fails.
        let strict = ReconciliationParams::default();
        assert!(!strict.threshold_is_rate());
        assert!(report.error_count() as f64 > strict.threshold);
    }
}
