use std::fmt::Debug;

use cp_common::Money;
use log::*;

use crate::{
    config::CommerceConfig,
    db_types::{
        Basket,
        BasketLine,
        BasketState,
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
    events::{FulfillmentDispatcher, OrderCompletedEvent, PostOrderHooks},
    helpers::order_number,
    traits::{CommerceDatabase, CommerceError},
};

/// `OrderFlowApi` is the primary API for the checkout flow: recording payment notifications against baskets,
/// turning a paid basket into exactly one order, and running the post-order side effects.
pub struct OrderFlowApi<B> {
    db: B,
    config: CommerceConfig,
    dispatcher: FulfillmentDispatcher,
    hooks: PostOrderHooks,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    /// The dispatcher's rollout percentage is taken from `config.async_fulfillment_rollout`.
    pub fn new(db: B, config: CommerceConfig, dispatcher: FulfillmentDispatcher, hooks: PostOrderHooks) -> Self {
        dispatcher.set_rollout(config.async_fulfillment_rollout);
        Self { db, config, dispatcher, hooks }
    }
}

impl<B> OrderFlowApi<B>
where B: CommerceDatabase
{
    //------------------------------------ Basket lifecycle -----------------------------------------------------------

    pub async fn create_basket(&self, basket: NewBasket) -> Result<Basket, CommerceError> {
        self.db.create_basket(basket).await
    }

    pub async fn add_line(&self, basket_id: i64, line: NewBasketLine) -> Result<BasketLine, CommerceError> {
        self.db.add_basket_line(basket_id, line).await
    }

    /// Starts checkout: no further line edits are possible after this.
    pub async fn freeze_basket(&self, basket_id: i64) -> Result<Basket, CommerceError> {
        self.db.freeze_basket(basket_id).await
    }

    //------------------------------------ Payment recording ----------------------------------------------------------

    /// Records a payment notification against a frozen basket, exactly once per external reference.
    ///
    /// A retried notification (same reference, same basket) returns the existing record, including retries that
    /// arrive after the basket has already been submitted and its order placed. The same reference arriving for a
    /// different basket is a processor-side bug and aborts with [`CommerceError::DuplicateReference`] — order
    /// placement must not proceed on top of it.
    ///
    /// No order creation or fulfillment happens here; the only side effects are the payment source and event rows
    /// and one structured log line, which is the audit trail of last resort if anything downstream fails.
    pub async fn handle_payment(&self, notification: PaymentNotification) -> Result<PaymentRecord, CommerceError> {
        if notification.processor.trim().is_empty() {
            return Err(CommerceError::InvalidNotification("processor name is missing".into()));
        }
        if notification.reference.trim().is_empty() {
            return Err(CommerceError::InvalidNotification("external reference is missing".into()));
        }
        let basket = self
            .db
            .fetch_basket(notification.basket_id)
            .await?
            .ok_or(CommerceError::BasketNotFound(notification.basket_id))?;
        if basket.state != BasketState::Frozen {
            // A processor can retry a notification after the order is already placed. Idempotency by reference
            // extends across that boundary: the retry gets the original record, not a state error.
            if let Some(record) = self.db.fetch_payment_record_by_reference(&notification.reference).await? {
                if record.source.basket_id == basket.id {
                    debug!(
                        "💳️ Reference '{}' already recorded for basket #{} (now {}). Returning the existing record.",
                        notification.reference, basket.id, basket.state
                    );
                    return Ok(record);
                }
            }
            return Err(CommerceError::BasketNotFrozen(basket.id));
        }
        let total = self.db.basket_total(basket.id).await?;
        let record = self.db.record_payment(&basket, total, &notification).await?;
        info!(
            "💳️ payment received: amount {total} {} for basket #{} via {} (reference '{}', user {})",
            basket.currency, basket.id, notification.processor, notification.reference, basket.owner_id
        );
        Ok(record)
    }

    //------------------------------------ Order placement ------------------------------------------------------------

    /// Converts a paid, frozen basket into exactly one order and runs the post-order side effects.
    ///
    /// The order number is computed from the basket id, and the create-and-link step is one atomic transaction: a
    /// second caller for the same basket observes the submitted basket and aborts rather than double-creating. An
    /// order-number collision is fatal and is never retried.
    ///
    /// Failures here happen *after* money was received, so they are logged at high severity with the basket id; the
    /// payment record is never rolled back, and the transaction auditor independently re-detects the drift.
    pub async fn place_order(&self, basket_id: i64, payment: &PaymentRecord) -> Result<Order, CommerceError> {
        if payment.event.basket_id != basket_id {
            return Err(CommerceError::InvalidNotification(format!(
                "payment record belongs to basket #{}, not #{basket_id}",
                payment.event.basket_id
            )));
        }
        let order = match self.place_order_inner(basket_id).await {
            Ok(order) => order,
            Err(e) => {
                error!("🧾️ Order placement failed for basket #{basket_id} after payment capture: {e}");
                return Err(e);
            },
        };
        info!("🧾️ Order {} placed for basket #{basket_id} ({} {})", order.order_number, order.total_price, order.currency);
        self.handle_successful_order(&order).await;
        Ok(order)
    }

    /// Places an order for a zero-total basket. A basket whose computed total is non-zero is rejected before any
    /// write: a pricing bug must never produce a "free" order for a paid product.
    pub async fn place_free_order(&self, basket_id: i64) -> Result<Order, CommerceError> {
        let total = self.db.basket_total(basket_id).await?;
        if !total.is_zero() {
            return Err(CommerceError::NonZeroTotal { basket_id, total });
        }
        let order = match self.place_order_inner(basket_id).await {
            Ok(order) => order,
            Err(e) => {
                error!("🧾️ Free order placement failed for basket #{basket_id}: {e}");
                return Err(e);
            },
        };
        info!("🧾️ Free order {} placed for basket #{basket_id}", order.order_number);
        self.handle_successful_order(&order).await;
        Ok(order)
    }

    async fn place_order_inner(&self, basket_id: i64) -> Result<Order, CommerceError> {
        let basket =
            self.db.fetch_basket(basket_id).await?.ok_or(CommerceError::BasketNotFound(basket_id))?;
        match basket.state {
            BasketState::Frozen => {},
            BasketState::Submitted => return Err(CommerceError::BasketAlreadySubmitted(basket_id)),
            BasketState::Open => return Err(CommerceError::BasketNotFrozen(basket_id)),
        }
        let number = order_number::encode(basket.id, &basket.partner_code)?;
        self.db.place_order_for_basket(&basket, &number).await
    }

    //------------------------------------ Post-order side effects ----------------------------------------------------

    /// Fires after the order row is committed. Each step is individually failure-isolated: an error is logged and
    /// the remaining steps still run. Checkout is already successful by the time this is called.
    pub async fn handle_successful_order(&self, order: &Order) {
        let lines = match self.db.fetch_order_lines(order.id).await {
            Ok(lines) => lines,
            Err(e) => {
                error!("🧾️ Could not load lines for order {}: {e}. Post-order steps run without them.", order.order_number);
                Vec::new()
            },
        };
        self.emit_order_completed(order, &lines).await;
        self.raise_invoice_if_bulk(order, &lines).await;
        if let Err(e) = self.dispatcher.dispatch(order).await {
            error!("🚚️ Fulfillment dispatch failed for order {}: {e}", order.order_number);
        }
    }

    /// Emits the "Order Completed" analytics event, unless the order is zero-value or consists solely of code
    /// products (code issuance is not a purchase and must not be tracked as revenue).
    async fn emit_order_completed(&self, order: &Order, lines: &[OrderLine]) {
        if order.total_price.is_zero() {
            debug!("📣️ Order {} is zero-value. Skipping analytics.", order.order_number);
            return;
        }
        if !lines.is_empty() && lines.iter().all(|l| self.config.is_code_product(&l.product_class)) {
            debug!("📣️ Order {} contains only code products. Skipping analytics.", order.order_number);
            return;
        }
        let event = OrderCompletedEvent::new(order.clone(), lines.to_vec());
        for hook in &self.hooks.on_order_completed {
            if let Err(e) = hook.call(event.clone()).await {
                error!("📣️ Analytics hook '{}' failed for order {}: {e}", hook.name, order.order_number);
            }
        }
    }

    /// Creates the BusinessClient/Invoice linkage for bulk purchases placed on behalf of an organization. Plain
    /// seat purchases never create either.
    async fn raise_invoice_if_bulk(&self, order: &Order, lines: &[OrderLine]) {
        let Some(organization) = order.organization.as_deref() else {
            return;
        };
        if !lines.iter().any(|l| self.config.is_code_product(&l.product_class)) {
            return;
        }
        let client = match self.db.fetch_or_create_business_client(organization).await {
            Ok(client) => client,
            Err(e) => {
                error!("🏢️ Could not fetch or create business client '{organization}' for order {}: {e}", order.order_number);
                return;
            },
        };
        match self.db.create_invoice(order.id, client.id).await {
            Ok(invoice) => {
                info!("🏢️ Invoice #{} raised for order {} (organization '{organization}')", invoice.id, order.order_number)
            },
            Err(e) => error!("🏢️ Could not raise invoice for order {}: {e}", order.order_number),
        }
    }

    //------------------------------------ Refunds and lookups --------------------------------------------------------

    /// Appends a `Refunded` event against a placed order. When cumulative refunds reach the paid total, the order
    /// status moves to `Refunded`. Events are append-only; nothing is ever corrected in place.
    pub async fn record_refund(
        &self,
        order_number: &OrderNumber,
        amount: Money,
        processor: &str,
        reference: &str,
    ) -> Result<PaymentEvent, CommerceError> {
        let order = self
            .db
            .fetch_order_by_number(order_number)
            .await?
            .ok_or_else(|| CommerceError::OrderNotFound(order_number.clone()))?;
        let event =
            self.db.append_payment_event(&order, amount, PaymentEventType::Refunded, processor, reference).await?;
        let events = self.db.fetch_payment_events_for_order(order.id).await?;
        let paid: Money =
            events.iter().filter(|e| e.event_type == PaymentEventType::Paid).map(|e| e.amount).sum();
        let refunded: Money =
            events.iter().filter(|e| e.event_type == PaymentEventType::Refunded).map(|e| e.amount).sum();
        if refunded >= paid && !paid.is_zero() {
            self.db.update_order_status(order.id, OrderStatusType::Refunded).await?;
            info!("🧾️ Order {} fully refunded ({refunded} of {paid})", order.order_number);
        }
        Ok(event)
    }

    pub async fn order_by_number(&self, order_number: &OrderNumber) -> Result<Option<Order>, CommerceError> {
        self.db.fetch_order_by_number(order_number).await
    }

    pub async fn payments_for_order(&self, order_id: i64) -> Result<Vec<PaymentEvent>, CommerceError> {
        self.db.fetch_payment_events_for_order(order_id).await
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
