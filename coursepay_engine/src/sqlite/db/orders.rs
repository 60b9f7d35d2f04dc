use chrono::{DateTime, Utc};
use cp_common::Money;
use log::debug;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{Basket, Order, OrderLine, OrderNumber, OrderStatusType},
    traits::CommerceError,
};

/// Inserts the order row for a basket. A pre-existing order with the same order number is a fatal collision: order
/// numbers are globally unique by construction, so a hit here means basket ids are being reused upstream.
pub async fn guarded_insert(
    basket: &Basket,
    order_number: &OrderNumber,
    total_price: Money,
    conn: &mut SqliteConnection,
) -> Result<Order, CommerceError> {
    if fetch_order_by_number(order_number, conn).await?.is_some() {
        return Err(CommerceError::OrderNumberCollision(order_number.clone()));
    }
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (order_number, basket_id, partner_code, total_price, currency, organization)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(order_number.as_str())
    .bind(basket.id)
    .bind(basket.partner_code.as_str())
    .bind(total_price)
    .bind(basket.currency.as_str())
    .bind(basket.organization.as_deref())
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            CommerceError::OrderNumberCollision(order_number.clone())
        },
        _ => CommerceError::from(e),
    })?;
    debug!("📝️ Order {} inserted with id {} for basket #{}", order.order_number, order.id, basket.id);
    Ok(order)
}

/// Copies the basket's lines onto the order in a single statement.
pub async fn copy_basket_lines(order_id: i64, basket_id: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO order_lines (order_id, product_sku, product_class, quantity, unit_price)
            SELECT $1, product_sku, product_class, quantity, unit_price
            FROM basket_lines WHERE basket_id = $2;
        "#,
    )
    .bind(order_id)
    .bind(basket_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn fetch_order_by_number(
    order_number: &OrderNumber,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE order_number = $1")
        .bind(order_number.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_order_for_basket(basket_id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE basket_id = $1").bind(basket_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn lines_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderLine>, sqlx::Error> {
    let lines = sqlx::query_as("SELECT * FROM order_lines WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(lines)
}

/// All orders placed in `[start, end)`, oldest first. `unixepoch(…, 'subsec')` normalizes the stored and bound
/// timestamp representations without truncating to whole seconds, so orders landing in the window's boundary
/// second still compare correctly against the exclusive end bound.
pub async fn orders_in_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    let orders = sqlx::query_as(
        r#"
            SELECT * FROM orders
            WHERE unixepoch(created_at, 'subsec') >= unixepoch($1, 'subsec')
              AND unixepoch(created_at, 'subsec') < unixepoch($2, 'subsec')
            ORDER BY created_at ASC;
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub async fn lines_for_orders(order_ids: &[i64], conn: &mut SqliteConnection) -> Result<Vec<OrderLine>, sqlx::Error> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT * FROM order_lines WHERE order_id IN (");
    let mut in_list = builder.separated(", ");
    for id in order_ids {
        in_list.push_bind(*id);
    }
    builder.push(") ORDER BY order_id, id");
    let lines = builder.build_query_as().fetch_all(conn).await?;
    Ok(lines)
}

pub async fn update_order_status(
    order_id: i64,
    status: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<(), CommerceError> {
    let result = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(order_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CommerceError::OrderIdNotFound(order_id));
    }
    Ok(())
}
