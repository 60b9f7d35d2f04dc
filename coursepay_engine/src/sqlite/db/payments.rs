use cp_common::Money;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{PaymentEvent, PaymentEventType, PaymentNotification, PaymentSource},
    traits::CommerceError,
};

pub async fn fetch_source_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentSource>, sqlx::Error> {
    let source = sqlx::query_as("SELECT * FROM payment_sources WHERE reference = $1")
        .bind(reference)
        .fetch_optional(conn)
        .await?;
    Ok(source)
}

/// Inserts the payment source row for a notification. A concurrent insert of the same reference trips the UNIQUE
/// constraint; callers treat that the same as any other abort-checkout error.
pub async fn insert_source(
    basket_id: i64,
    notification: &PaymentNotification,
    conn: &mut SqliteConnection,
) -> Result<PaymentSource, CommerceError> {
    let reference = notification.reference.clone();
    let source = sqlx::query_as(
        r#"
            INSERT INTO payment_sources (processor, currency, reference, label, basket_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(notification.processor.as_str())
    .bind(notification.currency.as_str())
    .bind(notification.reference.as_str())
    .bind(notification.label())
    .bind(basket_id)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => CommerceError::PaymentAlreadyRecorded(reference),
        _ => CommerceError::from(e),
    })?;
    Ok(source)
}

pub async fn insert_event(
    source_id: Option<i64>,
    basket_id: i64,
    order_id: Option<i64>,
    amount: Money,
    event_type: PaymentEventType,
    processor: &str,
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<PaymentEvent, CommerceError> {
    let event = sqlx::query_as(
        r#"
            INSERT INTO payment_events (source_id, basket_id, order_id, amount, event_type, processor, reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *;
        "#,
    )
    .bind(source_id)
    .bind(basket_id)
    .bind(order_id)
    .bind(amount)
    .bind(event_type)
    .bind(processor)
    .bind(reference)
    .fetch_one(conn)
    .await?;
    Ok(event)
}

/// The single `Paid` event belonging to a payment source.
pub async fn paid_event_for_source(
    source_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentEvent>, sqlx::Error> {
    let event = sqlx::query_as("SELECT * FROM payment_events WHERE source_id = $1 AND event_type = 'Paid'")
        .bind(source_id)
        .fetch_optional(conn)
        .await?;
    Ok(event)
}

/// Links every still-unlinked event for the basket to the freshly created order. Called inside the order placement
/// transaction so that no reader observes an order without its payments.
pub async fn link_events_to_order(
    order_id: i64,
    basket_id: i64,
    conn: &mut SqliteConnection,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE payment_events SET order_id = $1 WHERE basket_id = $2 AND order_id IS NULL")
        .bind(order_id)
        .bind(basket_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn events_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<PaymentEvent>, sqlx::Error> {
    let events = sqlx::query_as("SELECT * FROM payment_events WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(events)
}

pub async fn events_for_orders(
    order_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentEvent>, sqlx::Error> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT * FROM payment_events WHERE order_id IN (");
    let mut in_list = builder.separated(", ");
    for id in order_ids {
        in_list.push_bind(*id);
    }
    builder.push(") ORDER BY order_id, id");
    let events = builder.build_query_as().fetch_all(conn).await?;
    Ok(events)
}
