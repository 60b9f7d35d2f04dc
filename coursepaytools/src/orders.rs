use anyhow::{anyhow, Result};
use coursepay_engine::{
    db_types::OrderNumber,
    helpers::order_number,
    OrderRepository,
    PaymentEventRepository,
    SqliteDatabase,
};
use serde_json::json;

use crate::OrderParams;

pub async fn print_order(params: OrderParams) -> Result<()> {
    let basket_id = order_number::decode(&params.order_number)
        .map_err(|e| anyhow!("'{}' is not a valid order number: {e}", params.order_number))?;
    let db = SqliteDatabase::new(5).await.map_err(|e| anyhow!("Could not connect to the database: {e}"))?;
    let number = OrderNumber(params.order_number.clone());
    let order = db
        .fetch_order_by_number(&number)
        .await?
        .ok_or_else(|| anyhow!("No order exists with number {number}"))?;
    let lines = db.fetch_order_lines(order.id).await?;
    let payments = db.fetch_payment_events_for_order(order.id).await?;
    let payload = json!({
        "order": order,
        "basket_id": basket_id,
        "line_count": lines.len(),
        "payments": payments,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
