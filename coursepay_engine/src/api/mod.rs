//! The engine's public-facing APIs: the order/payment flow and the reconciliation audit.

mod order_flow_api;
mod reconciliation_api;
mod reconciliation_objects;

pub use order_flow_api::OrderFlowApi;
pub use reconciliation_api::{ReconciliationApi, ReconciliationError, ReconciliationParams};
pub use reconciliation_objects::{
    AnomalyCategory,
    OrderAnomaly,
    PaymentSummary,
    ReconciliationReport,
};
