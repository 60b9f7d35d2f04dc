//! CoursePay Engine
//!
//! The core order-placement and payment-reconciliation library for course purchases. It is storefront-agnostic:
//! payment processor integrations, HTTP surfaces and UIs all live upstream of this crate.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@sqlite`]). You should never need to access the database directly.
//!    Instead, use the public API provided by the engine. The exception is the data types used in the database,
//!    which are defined in the [`mod@db_types`] module and are public.
//! 2. The storage contracts ([`mod@traits`]). Backends implement the repository traits and
//!    [`traits::CommerceDatabase`] and are responsible for the transaction boundaries each operation documents.
//! 3. The engine public API ([`mod@api`]). [`OrderFlowApi`](api::OrderFlowApi) orchestrates basket checkout: it
//!    records payments idempotently, places exactly one order per basket, and fires fulfillment and post-order
//!    hooks. [`ReconciliationApi`](api::ReconciliationApi) is the read-only transaction auditor that cross-checks
//!    a window of orders against their payment events on a schedule.
//!
//! Fulfillment and analytics run off events ([`mod@events`]): subscribe hooks to order completion, and feed the
//! [`events::FulfillmentDispatcher`] a fulfiller to have orders fulfilled inline or through a background worker
//! according to a runtime-adjustable rollout percentage.

pub mod api;
pub mod config;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use api::{OrderFlowApi, ReconciliationApi};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{BasketRepository, CommerceDatabase, CommerceError, OrderRepository, PaymentEventRepository};
