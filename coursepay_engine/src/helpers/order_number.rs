//! Deterministic, reversible mapping between basket ids and order numbers.
//!
//! An order number is `"{partner_code}-{basket_id + OFFSET}"`. The offset keeps order identifiers visually distinct
//! from raw basket ids and clear of any pre-existing low ids. Both directions are pure functions; no counter or
//! database round-trip is involved, so `decode(encode(b, p)) == b` holds for every valid basket id.

use thiserror::Error;

use crate::db_types::OrderNumber;

/// Added to the basket id to form the numeric part of the order number.
pub const ORDER_ID_OFFSET: i64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderNumberError {
    #[error("Basket id {0} overflows the order number space")]
    Overflow(i64),
    #[error("Basket id {0} is not a valid basket identifier")]
    InvalidBasketId(i64),
    #[error("Partner code may not be empty")]
    EmptyPartnerCode,
    #[error("'{0}' is not a well-formed order number")]
    Malformed(String),
}

/// Encodes a basket id and partner code into an order number.
///
/// Overflow of `basket_id + OFFSET` is a configuration error, never a wrapped id.
pub fn encode(basket_id: i64, partner_code: &str) -> Result<OrderNumber, OrderNumberError> {
    if basket_id < 0 {
        return Err(OrderNumberError::InvalidBasketId(basket_id));
    }
    if partner_code.is_empty() {
        return Err(OrderNumberError::EmptyPartnerCode);
    }
    let order_id = basket_id.checked_add(ORDER_ID_OFFSET).ok_or(OrderNumberError::Overflow(basket_id))?;
    Ok(OrderNumber(format!("{partner_code}-{order_id}")))
}

/// Recovers the basket id from an order number produced by [`encode`].
///
/// The partner prefix is stripped at the last `-`, so partner codes containing hyphens round-trip correctly.
pub fn decode(order_number: &str) -> Result<i64, OrderNumberError> {
    let malformed = || OrderNumberError::Malformed(order_number.to_string());
    let (prefix, suffix) = order_number.rsplit_once('-').ok_or_else(malformed)?;
    if prefix.is_empty() {
        return Err(malformed());
    }
    let order_id = suffix.parse::<i64>().map_err(|_| malformed())?;
    if order_id < ORDER_ID_OFFSET {
        return Err(malformed());
    }
    Ok(order_id - ORDER_ID_OFFSET)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        for basket_id in [0, 1, 42, 99_999, 100_000, 8_675_309, i64::MAX - ORDER_ID_OFFSET] {
            let number = encode(basket_id, "EDX").unwrap();
            assert_eq!(decode(number.as_str()).unwrap(), basket_id);
        }
    }

    #[test]
    fn encoding_is_offset_and_prefixed() {
        assert_eq!(encode(42, "EDX").unwrap().as_str(), "EDX-100042");
        assert_eq!(encode(0, "acme").unwrap().as_str(), "acme-100000");
    }

    #[test]
    fn hyphenated_partner_codes_round_trip() {
        let number = encode(7, "open-campus").unwrap();
        assert_eq!(number.as_str(), "open-campus-100007");
        assert_eq!(decode(number.as_str()).unwrap(), 7);
    }

    #[test]
    fn overflow_is_fatal_not_wrapped() {
        assert_eq!(encode(i64::MAX, "EDX"), Err(OrderNumberError::Overflow(i64::MAX)));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(encode(-1, "EDX"), Err(OrderNumberError::InvalidBasketId(-1)));
        assert_eq!(encode(1, ""), Err(OrderNumberError::EmptyPartnerCode));
        assert!(decode("EDX").is_err());
        assert!(decode("-100042").is_err());
        assert!(decode("EDX-banana").is_err());
        // A numeric suffix below the offset cannot have come from encode().
        assert!(decode("EDX-99999").is_err());
    }
}
