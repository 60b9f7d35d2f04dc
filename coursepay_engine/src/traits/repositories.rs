use chrono::{DateTime, Utc};
use cp_common::Money;
use thiserror::Error;

use crate::{
    db_types::{
        Basket,
        BasketLine,
        BusinessClient,
        Invoice,
        NewBasket,
        NewBasketLine,
        Order,
        OrderLine,
        OrderNumber,
        OrderStatusType,
        PaymentEvent,
        PaymentEventType,
        PaymentNotification,
        PaymentRecord,
    },
    helpers::order_number::OrderNumberError,
};

/// Basket lifecycle and lookup operations.
#[allow(async_fn_in_trait)]
pub trait BasketRepository {
    async fn create_basket(&self, basket: NewBasket) -> Result<Basket, CommerceError>;

    /// Adds a line to an `Open` basket. Frozen and submitted baskets reject line edits.
    async fn add_basket_line(&self, basket_id: i64, line: NewBasketLine) -> Result<BasketLine, CommerceError>;

    async fn fetch_basket(&self, basket_id: i64) -> Result<Option<Basket>, CommerceError>;

    async fn fetch_basket_lines(&self, basket_id: i64) -> Result<Vec<BasketLine>, CommerceError>;

    /// The basket's computed total: `Σ quantity × unit_price` over its lines.
    async fn basket_total(&self, basket_id: i64) -> Result<Money, CommerceError>;

    /// Guarded `Open → Frozen` transition (checkout start). Fails if the basket is in any other state.
    async fn freeze_basket(&self, basket_id: i64) -> Result<Basket, CommerceError>;
}

/// Order creation and read access.
#[allow(async_fn_in_trait)]
pub trait OrderRepository {
    /// Places the order for a frozen basket in a single atomic transaction:
    ///
    /// * the basket transitions `Frozen → Submitted` with a guarded single-statement update; a concurrent writer
    ///   that lost the race observes zero affected rows and gets [`CommerceError::BasketAlreadySubmitted`];
    /// * a pre-existing order with the same order number is [`CommerceError::OrderNumberCollision`] — fatal, never
    ///   an overwrite;
    /// * basket lines are copied to order lines;
    /// * every payment event recorded against the basket is linked to the new order.
    ///
    /// No reader can observe an order without its linked payments, or vice versa.
    async fn place_order_for_basket(&self, basket: &Basket, order_number: &OrderNumber) -> Result<Order, CommerceError>;

    async fn fetch_order_by_number(&self, order_number: &OrderNumber) -> Result<Option<Order>, CommerceError>;

    async fn fetch_order_for_basket(&self, basket_id: i64) -> Result<Option<Order>, CommerceError>;

    async fn fetch_order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>, CommerceError>;

    /// All orders with `created_at` in `[start, end)`, ordered by creation time. Read-only; safe on a replica.
    async fn fetch_orders_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>, CommerceError>;

    /// Prefetches the lines for a batch of orders in one query.
    async fn fetch_order_lines_for_orders(&self, order_ids: &[i64]) -> Result<Vec<OrderLine>, CommerceError>;

    async fn update_order_status(&self, order_id: i64, status: OrderStatusType) -> Result<(), CommerceError>;

    async fn fetch_or_create_business_client(&self, name: &str) -> Result<BusinessClient, CommerceError>;

    async fn create_invoice(&self, order_id: i64, business_client_id: i64) -> Result<Invoice, CommerceError>;
}

/// Recording and reading append-only payment events.
#[allow(async_fn_in_trait)]
pub trait PaymentEventRepository {
    /// Records a payment notification against a frozen basket in a single atomic transaction: one payment source
    /// row plus one `Paid` event carrying `total` (the basket's computed total at recording time).
    ///
    /// Idempotent by external reference: a notification whose reference was already recorded for the *same* basket
    /// returns the existing record untouched. The same reference recorded against a *different* basket is
    /// [`CommerceError::DuplicateReference`] and must abort checkout.
    async fn record_payment(
        &self,
        basket: &Basket,
        total: Money,
        notification: &PaymentNotification,
    ) -> Result<PaymentRecord, CommerceError>;

    /// Looks up the record produced for an already-processed external reference, if any. Used to answer processor
    /// retries that arrive after the basket has moved on.
    async fn fetch_payment_record_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, CommerceError>;

    /// Appends a `Refunded` (or manual `Paid`) event against a placed order. Never mutates existing events.
    async fn append_payment_event(
        &self,
        order: &Order,
        amount: Money,
        event_type: PaymentEventType,
        processor: &str,
        reference: &str,
    ) -> Result<PaymentEvent, CommerceError>;

    async fn fetch_payment_events_for_order(&self, order_id: i64) -> Result<Vec<PaymentEvent>, CommerceError>;

    /// Prefetches the events for a batch of orders in one query, so the auditor never issues one query per order.
    async fn fetch_payment_events_for_orders(&self, order_ids: &[i64]) -> Result<Vec<PaymentEvent>, CommerceError>;
}

/// The full backend contract for the commerce engine.
#[allow(async_fn_in_trait)]
pub trait CommerceDatabase: Clone + BasketRepository + OrderRepository + PaymentEventRepository {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), CommerceError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum CommerceError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("The requested basket #{0} does not exist")]
    BasketNotFound(i64),
    #[error("Basket #{0} is not open; its lines can no longer change")]
    BasketNotOpen(i64),
    #[error("Basket #{0} is not frozen; checkout has not started for it")]
    BasketNotFrozen(i64),
    #[error("Basket #{0} has already been submitted; an order exists for it")]
    BasketAlreadySubmitted(i64),
    #[error(
        "Payment reference '{reference}' was already recorded against basket #{existing_basket_id}, but arrived \
         again for basket #{basket_id}"
    )]
    DuplicateReference { reference: String, basket_id: i64, existing_basket_id: i64 },
    #[error("Payment reference '{0}' was recorded concurrently")]
    PaymentAlreadyRecorded(String),
    #[error("Order number {0} already exists; basket ids are being reused somewhere upstream")]
    OrderNumberCollision(OrderNumber),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderNumber),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderIdNotFound(i64),
    #[error("Basket #{basket_id} has a non-zero total of {total} and cannot be placed as a free order")]
    NonZeroTotal { basket_id: i64, total: Money },
    #[error("Malformed payment notification: {0}")]
    InvalidNotification(String),
    #[error("{0}")]
    OrderNumberError(#[from] OrderNumberError),
}

impl From<sqlx::Error> for CommerceError {
    fn from(e: sqlx::Error) -> Self {
        CommerceError::DatabaseError(e.to_string())
    }
}
