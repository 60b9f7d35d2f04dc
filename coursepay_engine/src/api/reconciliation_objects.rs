use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, Utc};
use cp_common::Money;
use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderNumber, PaymentEvent, PaymentEventType};

/// The anomaly categories the auditor can raise. Serialized names match the alerting queries operators run against
/// the job logs, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    OrdersNoPayment,
    OrdersMultiPayment,
    OrdersMismatchedTotals,
    OrdersRefundExceeded,
    OrdersMismatchedTotalsSupport,
}

impl Display for AnomalyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnomalyCategory::OrdersNoPayment => "orders_no_payment",
            AnomalyCategory::OrdersMultiPayment => "orders_multi_payment",
            AnomalyCategory::OrdersMismatchedTotals => "orders_mismatched_totals",
            AnomalyCategory::OrdersRefundExceeded => "orders_refund_exceeded",
            AnomalyCategory::OrdersMismatchedTotalsSupport => "orders_mismatched_totals_support",
        };
        write!(f, "{name}")
    }
}

/// A compact view of one payment event, as it appears in the report.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSummary {
    pub id: i64,
    pub amount: Money,
    pub processor: String,
    pub event_type: PaymentEventType,
}

impl From<&PaymentEvent> for PaymentSummary {
    fn from(event: &PaymentEvent) -> Self {
        Self { id: event.id, amount: event.amount, processor: event.processor.clone(), event_type: event.event_type }
    }
}

/// One anomaly raised against one order. An order may appear in more than one category.
#[derive(Debug, Clone, Serialize)]
pub struct OrderAnomaly {
    pub category: AnomalyCategory,
    pub message: String,
    pub order_id: i64,
    pub order_number: OrderNumber,
    pub order_total: Money,
    pub payments: Vec<PaymentSummary>,
    /// Support mode only: `paid - order_total`, signed, so a human can tell whether a refund (positive) or an
    /// additional charge (negative) is owed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<Money>,
}

impl OrderAnomaly {
    pub fn new(category: AnomalyCategory, message: String, order: &Order, payments: &[&PaymentEvent]) -> Self {
        Self {
            category,
            message,
            order_id: order.id,
            order_number: order.order_number.clone(),
            order_total: order.total_price,
            payments: payments.iter().map(|e| PaymentSummary::from(*e)).collect(),
            refund_amount: None,
        }
    }

    pub fn with_refund_amount(mut self, refund_amount: Money) -> Self {
        self.refund_amount = Some(refund_amount);
        self
    }
}

/// One auditor run's findings: the anomalies grouped by category, plus the window and scan size the rates are
/// computed from. Ephemeral — this is the job's log/stdout payload, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub orders_scanned: usize,
    pub categories: BTreeMap<AnomalyCategory, Vec<OrderAnomaly>>,
}

impl ReconciliationReport {
    pub fn new(window_start: DateTime<Utc>, window_end: DateTime<Utc>, orders_scanned: usize) -> Self {
        Self { window_start, window_end, orders_scanned, categories: BTreeMap::new() }
    }

    pub fn record(&mut self, anomaly: OrderAnomaly) {
        self.categories.entry(anomaly.category).or_default().push(anomaly);
    }

    pub fn record_all(&mut self, anomalies: Vec<OrderAnomaly>) {
        for anomaly in anomalies {
            self.record(anomaly);
        }
    }

    /// Total anomaly count across all categories.
    pub fn error_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    /// Anomalies per order scanned. Zero when the window was empty.
    pub fn error_rate(&self) -> f64 {
        if self.orders_scanned == 0 {
            0.0
        } else {
            self.error_count() as f64 / self.orders_scanned as f64
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }

    pub fn summary(&self) -> String {
        let per_category = self
            .categories
            .iter()
            .map(|(cat, anomalies)| format!("{cat}: {}", anomalies.len()))
            .collect::<Vec<String>>()
            .join(", ");
        format!(
            "{} anomalies across {} orders in [{} .. {}) ({per_category})",
            self.error_count(),
            self.orders_scanned,
            self.window_start,
            self.window_end
        )
    }
}

impl Display for ReconciliationReport {
    /// Renders as pretty JSON (the job's stdout payload), falling back to the one-line summary.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(json) => write!(f, "{json}"),
            Err(_) => write!(f, "{}", self.summary()),
        }
    }
}
