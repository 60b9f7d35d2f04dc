use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use cp_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(String);

//--------------------------------------     BasketState     ---------------------------------------------------------
/// The lifecycle of a basket. `Open` baskets accept line edits, `Frozen` baskets are mid-checkout, and `Submitted`
/// baskets have an order and can never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum BasketState {
    Open,
    Frozen,
    Submitted,
}

impl Display for BasketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BasketState::Open => write!(f, "Open"),
            BasketState::Frozen => write!(f, "Frozen"),
            BasketState::Submitted => write!(f, "Submitted"),
        }
    }
}

impl FromStr for BasketState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Frozen" => Ok(Self::Frozen),
            "Submitted" => Ok(Self::Submitted),
            s => Err(ConversionError(format!("Invalid basket state: {s}"))),
        }
    }
}

//--------------------------------------        Basket        ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Basket {
    pub id: i64,
    pub owner_id: String,
    pub partner_code: String,
    pub currency: String,
    pub state: BasketState,
    /// Present when the purchase was made on behalf of an organization (attached at checkout time).
    pub organization: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBasket {
    pub owner_id: String,
    pub partner_code: String,
    pub currency: String,
    pub organization: Option<String>,
}

impl NewBasket {
    pub fn new<S1: Into<String>, S2: Into<String>>(owner_id: S1, partner_code: S2) -> Self {
        Self {
            owner_id: owner_id.into(),
            partner_code: partner_code.into(),
            currency: cp_common::DEFAULT_CURRENCY.to_string(),
            organization: None,
        }
    }

    pub fn for_organization(mut self, organization: String) -> Self {
        self.organization = Some(organization);
        self
    }
}

//--------------------------------------     BasketLine      ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct BasketLine {
    pub id: i64,
    pub basket_id: i64,
    pub product_sku: String,
    /// The product class drives the analytics exemption and invoicing rules (e.g. "seat", "enrollment_code").
    pub product_class: String,
    pub quantity: i64,
    pub unit_price: Money,
}

impl BasketLine {
    pub fn line_total(&self) -> Money {
        self.unit_price * self.quantity
    }
}

#[derive(Debug, Clone)]
pub struct NewBasketLine {
    pub product_sku: String,
    pub product_class: String,
    pub quantity: i64,
    pub unit_price: Money,
}

impl NewBasketLine {
    pub fn new<S1: Into<String>, S2: Into<String>>(sku: S1, class: S2, quantity: i64, unit_price: Money) -> Self {
        Self { product_sku: sku.into(), product_class: class.into(), quantity, unit_price }
    }
}

//--------------------------------------     OrderNumber     ---------------------------------------------------------
/// The human-facing order identifier, e.g. "EDX-100042". Encodes the partner code and the basket id (see
/// [`crate::helpers::order_number`]); no lookup table is needed to map one back to the other.
#[derive(Debug, Clone, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderNumber(pub String);

impl FromStr for OrderNumber {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OrderNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------   OrderStatusType   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// The order exists and fulfillment has not completed.
    Open,
    /// Fulfillment completed.
    Complete,
    /// Refunds have reached the paid total.
    Refunded,
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Open => write!(f, "Open"),
            OrderStatusType::Complete => write!(f, "Complete"),
            OrderStatusType::Refunded => write!(f, "Refunded"),
        }
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Complete" => Ok(Self::Complete),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------        Order         ---------------------------------------------------------
/// Immutable after creation, apart from the fulfillment/refund status. Exactly one exists per submitted basket.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    pub order_number: OrderNumber,
    pub basket_id: i64,
    pub partner_code: String,
    pub total_price: Money,
    pub currency: String,
    pub status: OrderStatusType,
    pub organization: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub product_sku: String,
    pub product_class: String,
    pub quantity: i64,
    pub unit_price: Money,
}

//--------------------------------------  PaymentEventType   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PaymentEventType {
    Paid,
    Refunded,
}

impl Display for PaymentEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentEventType::Paid => write!(f, "Paid"),
            PaymentEventType::Refunded => write!(f, "Refunded"),
        }
    }
}

//--------------------------------------    PaymentSource    ---------------------------------------------------------
/// One row per recorded payment notification: the processor, currency and external reference it arrived with.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentSource {
    pub id: i64,
    pub processor: String,
    pub currency: String,
    pub reference: String,
    pub label: String,
    pub basket_id: i64,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    PaymentEvent     ---------------------------------------------------------
/// Append-only fact: "amount X of type {Paid, Refunded} was recorded via processor P with reference R". The
/// `order_id` is filled in when the order is placed; events are never mutated or deleted otherwise.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentEvent {
    pub id: i64,
    pub source_id: Option<i64>,
    pub basket_id: i64,
    pub order_id: Option<i64>,
    pub amount: Money,
    pub event_type: PaymentEventType,
    pub processor: String,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

/// The result of recording a payment notification: the source row and its single `Paid` event.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub source: PaymentSource,
    pub event: PaymentEvent,
}

//-------------------------------------- PaymentNotification ---------------------------------------------------------
/// The normalized payment notification handed over by a processor integration. Signature verification, redirects and
/// the processor's own wire format all happen upstream of this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub processor: String,
    pub reference: String,
    pub amount: Money,
    pub currency: String,
    pub basket_id: i64,
}

impl PaymentNotification {
    pub fn label(&self) -> String {
        format!("{} ({})", self.processor, self.reference)
    }
}

//-------------------------------------- BusinessClient / Invoice ----------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct BusinessClient {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub order_id: i64,
    pub business_client_id: i64,
    pub created_at: DateTime<Utc>,
}
