use cp_common::Money;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Basket, BasketLine, NewBasket, NewBasketLine},
    traits::CommerceError,
};

pub async fn insert_basket(basket: NewBasket, conn: &mut SqliteConnection) -> Result<Basket, CommerceError> {
    let basket = sqlx::query_as(
        r#"
            INSERT INTO baskets (owner_id, partner_code, currency, organization)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(basket.owner_id)
    .bind(basket.partner_code)
    .bind(basket.currency)
    .bind(basket.organization)
    .fetch_one(conn)
    .await?;
    Ok(basket)
}

pub async fn fetch_basket(basket_id: i64, conn: &mut SqliteConnection) -> Result<Option<Basket>, sqlx::Error> {
    let basket =
        sqlx::query_as("SELECT * FROM baskets WHERE id = $1").bind(basket_id).fetch_optional(conn).await?;
    Ok(basket)
}

pub async fn insert_line(
    basket_id: i64,
    line: NewBasketLine,
    conn: &mut SqliteConnection,
) -> Result<BasketLine, CommerceError> {
    let line = sqlx::query_as(
        r#"
            INSERT INTO basket_lines (basket_id, product_sku, product_class, quantity, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(basket_id)
    .bind(line.product_sku)
    .bind(line.product_class)
    .bind(line.quantity)
    .bind(line.unit_price)
    .fetch_one(conn)
    .await?;
    Ok(line)
}

pub async fn lines_for_basket(basket_id: i64, conn: &mut SqliteConnection) -> Result<Vec<BasketLine>, sqlx::Error> {
    let lines = sqlx::query_as("SELECT * FROM basket_lines WHERE basket_id = $1 ORDER BY id")
        .bind(basket_id)
        .fetch_all(conn)
        .await?;
    Ok(lines)
}

pub async fn basket_total(basket_id: i64, conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let total: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(quantity * unit_price), 0) FROM basket_lines WHERE basket_id = $1")
            .bind(basket_id)
            .fetch_one(conn)
            .await?;
    Ok(Money::from(total))
}

/// Guarded `Open → Frozen` transition. Returns `None` if the basket was not `Open`.
pub async fn freeze_basket(basket_id: i64, conn: &mut SqliteConnection) -> Result<Option<Basket>, sqlx::Error> {
    let basket = sqlx::query_as(
        r#"
            UPDATE baskets SET state = 'Frozen', updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND state = 'Open'
            RETURNING *;
        "#,
    )
    .bind(basket_id)
    .fetch_optional(conn)
    .await?;
    if basket.is_some() {
        debug!("🧺️ Basket #{basket_id} frozen for checkout");
    }
    Ok(basket)
}

/// Guarded `Frozen → Submitted` transition, the per-basket exclusivity point for order placement. Exactly one
/// writer can observe an affected row; the loser of a race gets `None` and must abort.
pub async fn submit_basket(basket_id: i64, conn: &mut SqliteConnection) -> Result<Option<Basket>, sqlx::Error> {
    let basket = sqlx::query_as(
        r#"
            UPDATE baskets SET state = 'Submitted', updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND state = 'Frozen'
            RETURNING *;
        "#,
    )
    .bind(basket_id)
    .fetch_optional(conn)
    .await?;
    Ok(basket)
}
