use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{BusinessClient, Invoice},
    traits::CommerceError,
};

/// Fetches the business client with the given organization name, creating it on first use.
pub async fn fetch_or_create_business_client(
    name: &str,
    conn: &mut SqliteConnection,
) -> Result<BusinessClient, CommerceError> {
    if let Some(client) =
        sqlx::query_as::<_, BusinessClient>("SELECT * FROM business_clients WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?
    {
        return Ok(client);
    }
    let client = sqlx::query_as("INSERT INTO business_clients (name) VALUES ($1) RETURNING *;")
        .bind(name)
        .fetch_one(conn)
        .await?;
    debug!("🏢️ Business client '{name}' created");
    Ok(client)
}

pub async fn insert_invoice(
    order_id: i64,
    business_client_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Invoice, CommerceError> {
    let invoice = sqlx::query_as(
        "INSERT INTO invoices (order_id, business_client_id) VALUES ($1, $2) RETURNING *;",
    )
    .bind(order_id)
    .bind(business_client_id)
    .fetch_one(conn)
    .await?;
    Ok(invoice)
}
