//! `SqliteDatabase` is the concrete SQLite backend for the commerce engine.
//!
//! It owns the connection pool and is responsible for the transaction boundaries the repository traits document:
//! recording a payment and placing an order are each one atomic transaction here.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use cp_common::Money;
use log::*;
use sqlx::SqlitePool;

use super::db::{baskets, db_url, invoices, new_pool, orders, payments};
use crate::{
    db_types::{
        Basket,
        BasketLine,
        BasketState,
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
    traits::{BasketRepository, CommerceDatabase, CommerceError, OrderRepository, PaymentEventRepository},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl BasketRepository for SqliteDatabase {
    async fn create_basket(&self, basket: NewBasket) -> Result<Basket, CommerceError> {
        // Explicit commit, so the row is visible on every pool connection once this returns.
        let mut tx = self.pool.begin().await?;
        let basket = baskets::insert_basket(basket, &mut tx).await?;
        tx.commit().await?;
        debug!("🧺️ Basket #{} created for {} ({})", basket.id, basket.owner_id, basket.partner_code);
        Ok(basket)
    }

    async fn add_basket_line(&self, basket_id: i64, line: NewBasketLine) -> Result<BasketLine, CommerceError> {
        let mut tx = self.pool.begin().await?;
        let basket =
            baskets::fetch_basket(basket_id, &mut tx).await?.ok_or(CommerceError::BasketNotFound(basket_id))?;
        if basket.state != BasketState::Open {
            return Err(CommerceError::BasketNotOpen(basket_id));
        }
        let line = baskets::insert_line(basket_id, line, &mut tx).await?;
        tx.commit().await?;
        Ok(line)
    }

    async fn fetch_basket(&self, basket_id: i64) -> Result<Option<Basket>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let basket = baskets::fetch_basket(basket_id, &mut conn).await?;
        Ok(basket)
    }

    async fn fetch_basket_lines(&self, basket_id: i64) -> Result<Vec<BasketLine>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let lines = baskets::lines_for_basket(basket_id, &mut conn).await?;
        Ok(lines)
    }

    async fn basket_total(&self, basket_id: i64) -> Result<Money, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let total = baskets::basket_total(basket_id, &mut conn).await?;
        Ok(total)
    }

    async fn freeze_basket(&self, basket_id: i64) -> Result<Basket, CommerceError> {
        let mut tx = self.pool.begin().await?;
        let basket =
            baskets::fetch_basket(basket_id, &mut tx).await?.ok_or(CommerceError::BasketNotFound(basket_id))?;
        let frozen = match baskets::freeze_basket(basket_id, &mut tx).await? {
            Some(b) => b,
            None => {
                return match basket.state {
                    BasketState::Submitted => Err(CommerceError::BasketAlreadySubmitted(basket_id)),
                    _ => Err(CommerceError::BasketNotOpen(basket_id)),
                };
            },
        };
        tx.commit().await?;
        Ok(frozen)
    }
}

impl OrderRepository for SqliteDatabase {
    /// The create-and-link step. Everything between `begin` and `commit` is atomic: the basket submission guard,
    /// the collision-guarded order insert, the line copy and the payment-event linking all land together or not
    /// at all.
    async fn place_order_for_basket(
        &self,
        basket: &Basket,
        order_number: &OrderNumber,
    ) -> Result<Order, CommerceError> {
        let mut tx = self.pool.begin().await?;
        if baskets::submit_basket(basket.id, &mut tx).await?.is_none() {
            return Err(CommerceError::BasketAlreadySubmitted(basket.id));
        }
        let total = baskets::basket_total(basket.id, &mut tx).await?;
        let order = orders::guarded_insert(basket, order_number, total, &mut tx).await?;
        let copied = orders::copy_basket_lines(order.id, basket.id, &mut tx).await?;
        let linked = payments::link_events_to_order(order.id, basket.id, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Order {} committed for basket #{}: {copied} lines, {linked} payment events linked",
            order.order_number, basket.id
        );
        Ok(order)
    }

    async fn fetch_order_by_number(&self, order_number: &OrderNumber) -> Result<Option<Order>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_number(order_number, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_for_basket(&self, basket_id: i64) -> Result<Option<Order>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_for_basket(basket_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let lines = orders::lines_for_order(order_id, &mut conn).await?;
        Ok(lines)
    }

    async fn fetch_orders_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::orders_in_window(start, end, &mut conn).await?;
        Ok(orders)
    }

    async fn fetch_order_lines_for_orders(&self, order_ids: &[i64]) -> Result<Vec<OrderLine>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let lines = orders::lines_for_orders(order_ids, &mut conn).await?;
        Ok(lines)
    }

    async fn update_order_status(&self, order_id: i64, status: OrderStatusType) -> Result<(), CommerceError> {
        let mut tx = self.pool.begin().await?;
        orders::update_order_status(order_id, status, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_or_create_business_client(&self, name: &str) -> Result<BusinessClient, CommerceError> {
        let mut tx = self.pool.begin().await?;
        let client = invoices::fetch_or_create_business_client(name, &mut tx).await?;
        tx.commit().await?;
        Ok(client)
    }

    async fn create_invoice(&self, order_id: i64, business_client_id: i64) -> Result<Invoice, CommerceError> {
        let mut tx = self.pool.begin().await?;
        let invoice = invoices::insert_invoice(order_id, business_client_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🏢️ Invoice #{} raised for order id {order_id} (client {business_client_id})", invoice.id);
        Ok(invoice)
    }
}

impl PaymentEventRepository for SqliteDatabase {
    async fn record_payment(
        &self,
        basket: &Basket,
        total: Money,
        notification: &PaymentNotification,
    ) -> Result<PaymentRecord, CommerceError> {
        let mut tx = self.pool.begin().await?;
        if let Some(source) = payments::fetch_source_by_reference(&notification.reference, &mut tx).await? {
            if source.basket_id == basket.id {
                // A processor retry. Return the existing record; nothing is written.
                let event = payments::paid_event_for_source(source.id, &mut tx).await?.ok_or_else(|| {
                    CommerceError::DatabaseError(format!(
                        "Payment source {} has no Paid event. The recording transaction is supposed to make this \
                         impossible.",
                        source.id
                    ))
                })?;
                tx.commit().await?;
                debug!(
                    "💳️ Reference '{}' already recorded for basket #{}. Returning the existing record.",
                    notification.reference, basket.id
                );
                return Ok(PaymentRecord { source, event });
            }
            return Err(CommerceError::DuplicateReference {
                reference: notification.reference.clone(),
                basket_id: basket.id,
                existing_basket_id: source.basket_id,
            });
        }
        let source = payments::insert_source(basket.id, notification, &mut tx).await?;
        let event = payments::insert_event(
            Some(source.id),
            basket.id,
            None,
            total,
            PaymentEventType::Paid,
            &notification.processor,
            &notification.reference,
            &mut tx,
        )
        .await?;
        tx.commit().await?;
        Ok(PaymentRecord { source, event })
    }

    async fn fetch_payment_record_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let Some(source) = payments::fetch_source_by_reference(reference, &mut conn).await? else {
            return Ok(None);
        };
        let event = payments::paid_event_for_source(source.id, &mut conn).await?.ok_or_else(|| {
            CommerceError::DatabaseError(format!(
                "Payment source {} has no Paid event. The recording transaction is supposed to make this impossible.",
                source.id
            ))
        })?;
        Ok(Some(PaymentRecord { source, event }))
    }

    async fn append_payment_event(
        &self,
        order: &Order,
        amount: Money,
        event_type: PaymentEventType,
        processor: &str,
        reference: &str,
    ) -> Result<PaymentEvent, CommerceError> {
        let mut tx = self.pool.begin().await?;
        let event = payments::insert_event(
            None,
            order.basket_id,
            Some(order.id),
            amount,
            event_type,
            processor,
            reference,
            &mut tx,
        )
        .await?;
        tx.commit().await?;
        debug!("🗃️ {} event of {} appended to order {}", event.event_type, event.amount, order.order_number);
        Ok(event)
    }

    async fn fetch_payment_events_for_order(&self, order_id: i64) -> Result<Vec<PaymentEvent>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let events = payments::events_for_order(order_id, &mut conn).await?;
        Ok(events)
    }

    async fn fetch_payment_events_for_orders(&self, order_ids: &[i64]) -> Result<Vec<PaymentEvent>, CommerceError> {
        let mut conn = self.pool.acquire().await?;
        let events = payments::events_for_orders(order_ids, &mut conn).await?;
        Ok(events)
    }
}

impl CommerceDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), CommerceError> {
        self.pool.close().await;
        Ok(())
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL from the environment.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
