//! Explicit configuration for the order flow and the reconciliation audit.
//!
//! Everything configurable is a plain struct passed into the API constructors, so tests can set values
//! deterministically. `from_env_or_default` mirrors the deployment convention: one env var per field, with a logged
//! fallback to the default when a value is missing or unparseable.

use std::{collections::HashSet, env};

use log::*;

const DEFAULT_ROLLOUT: u8 = 0;
const DEFAULT_CODE_CLASSES: &str = "enrollment_code,coupon";

/// Configuration for the order placement flow.
#[derive(Clone, Debug)]
pub struct CommerceConfig {
    /// Percentage (0-100) of orders whose fulfillment is routed to the background worker instead of running inline.
    pub async_fulfillment_rollout: u8,
    /// Product classes that represent code issuance rather than a purchase. Orders consisting solely of these are
    /// excluded from revenue analytics; their presence marks a bulk purchase for invoicing.
    pub code_product_classes: HashSet<String>,
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self { async_fulfillment_rollout: DEFAULT_ROLLOUT, code_product_classes: parse_class_list(DEFAULT_CODE_CLASSES) }
    }
}

impl CommerceConfig {
    pub fn from_env_or_default() -> Self {
        let async_fulfillment_rollout = env::var("COURSEPAY_FULFILLMENT_ROLLOUT")
            .ok()
            .map(|s| {
                s.parse::<u8>().map(|v| v.min(100)).unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid rollout percentage. {e} Using {DEFAULT_ROLLOUT} instead.");
                    DEFAULT_ROLLOUT
                })
            })
            .unwrap_or(DEFAULT_ROLLOUT);
        let code_product_classes = env::var("COURSEPAY_CODE_PRODUCT_CLASSES")
            .map(|s| parse_class_list(&s))
            .unwrap_or_else(|_| parse_class_list(DEFAULT_CODE_CLASSES));
        Self { async_fulfillment_rollout, code_product_classes }
    }

    pub fn is_code_product(&self, product_class: &str) -> bool {
        self.code_product_classes.contains(product_class)
    }
}

/// Configuration for the transaction auditor.
#[derive(Clone, Debug)]
pub struct ReconciliationConfig {
    /// Product classes that do not require immediate payment. An order whose lines are all in this set is expected
    /// to have no `Paid` event and is not flagged as `orders_no_payment`.
    pub no_payment_exempt_classes: HashSet<String>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self { no_payment_exempt_classes: parse_class_list(DEFAULT_CODE_CLASSES) }
    }
}

impl ReconciliationConfig {
    pub fn from_env_or_default() -> Self {
        let no_payment_exempt_classes = env::var("COURSEPAY_NO_PAYMENT_EXEMPT_CLASSES")
            .map(|s| parse_class_list(&s))
            .unwrap_or_else(|_| parse_class_list(DEFAULT_CODE_CLASSES));
        Self { no_payment_exempt_classes }
    }
}

fn parse_class_list(value: &str) -> HashSet<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn class_list_parsing() {
        let classes = parse_class_list(" enrollment_code, coupon ,,donation ");
        assert_eq!(classes.len(), 3);
        assert!(classes.contains("enrollment_code"));
        assert!(classes.contains("coupon"));
        assert!(classes.contains("donation"));
    }

    #[test]
    fn defaults() {
        let config = CommerceConfig::default();
        assert_eq!(config.async_fulfillment_rollout, 0);
        assert!(config.is_code_product("enrollment_code"));
        assert!(!config.is_code_product("seat"));
    }
}
