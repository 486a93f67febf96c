//! # Validation Report Types
//!
//! Structured findings produced by the cart validation engine.
//!
//! ## Errors As Data
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Why findings, not exceptions?                          │
//! │                                                                         │
//! │  validate(cart)                                                         │
//! │       │                                                                 │
//! │       ├── rule 1 ── error?  ──► push Finding, KEEP GOING                │
//! │       ├── rule 2 ── warning? ─► push Finding, KEEP GOING                │
//! │       ├── ...                                                           │
//! │       └── rule N                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ValidationReport { valid, errors[], warnings[], totals }               │
//! │                                                                         │
//! │  The caller gets the COMPLETE problem list in one round trip.           │
//! │  No short-circuit: a shopper fixing their cart should not discover      │
//! │  problems one at a time.                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Finding Codes
// =============================================================================

/// Machine-readable code attached to each validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    /// Cart has zero items; item-level rules are skipped.
    EmptyCart,
    /// Product or variant missing, inactive, or mismatched.
    ProductUnavailable,
    /// Quantity violates shape or per-product min/max limits.
    QuantityOutOfRange,
    /// Requested quantity exceeds what the ledger can hold for this cart.
    InsufficientStock,
    /// Cumulative purchases would exceed the per-customer cap.
    PurchaseLimitExceeded,
    /// Two products in the cart exclude each other.
    IncompatibleProducts,
    /// A required companion product is missing from the cart.
    MissingRequiredProduct,
    /// Address missing or structurally incomplete.
    AddressIncomplete,
    /// Shipping method inactive, out of zone, or bounds violated.
    ShippingUnavailable,
    /// Payment method inactive, out of country, or bounds violated.
    PaymentMethodUnavailable,
    /// Coupon failed one of its checks (see [`CouponReason`]).
    CouponInvalid,
    /// Global order value/item-count bounds violated.
    OrderLimitExceeded,
    /// Warning: stored line price differed from catalog and was repaired.
    PriceChanged,
    /// Warning: request admitted while other carts hold reserved units.
    PartiallyReserved,
    /// Warning: no ledger row yet; checked against the legacy stock field.
    LegacyStockFallback,
    /// Warning: no configured delivery zone covers the address country.
    DeliveryZoneUncovered,
}

/// Sub-reason attached to `CouponInvalid` findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponReason {
    Expired,
    NotStarted,
    LimitReached,
    AlreadyUsed,
    MinValueNotMet,
    NotApplicable,
}

impl CouponReason {
    /// Human-readable fragment for finding messages.
    pub fn describe(&self) -> &'static str {
        match self {
            CouponReason::Expired => "coupon has expired",
            CouponReason::NotStarted => "coupon is not active yet",
            CouponReason::LimitReached => "coupon usage limit reached",
            CouponReason::AlreadyUsed => "coupon already used by this customer",
            CouponReason::MinValueNotMet => "cart does not meet the coupon minimum order value",
            CouponReason::NotApplicable => "coupon does not apply to this cart",
        }
    }
}

// =============================================================================
// Finding
// =============================================================================

/// One structured validation finding (error or warning).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub code: ValidationCode,
    pub message: String,
    /// Cart item this finding points at, when item-scoped.
    pub affected_item_id: Option<String>,
}

impl Finding {
    /// Creates a cart-scoped finding.
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Finding {
            code,
            message: message.into(),
            affected_item_id: None,
        }
    }

    /// Creates an item-scoped finding.
    pub fn for_item(
        code: ValidationCode,
        message: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Finding {
            code,
            message: message.into(),
            affected_item_id: Some(item_id.into()),
        }
    }
}

// =============================================================================
// Cart Totals
// =============================================================================

/// Recomputed monetary totals for a validated cart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartTotals {
    pub item_count: usize,
    pub total_quantity: i64,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

// =============================================================================
// Validation Report
// =============================================================================

/// Outcome of a full cart validation pass.
///
/// `valid` is true iff `errors` is empty - warnings never block checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub totals: CartTotals,
    /// Promotions applied to the totals during this pass.
    pub applied_promotions: Vec<String>,
}

impl ValidationReport {
    /// Creates an empty (so far valid) report.
    pub fn new() -> Self {
        ValidationReport {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            totals: CartTotals::default(),
            applied_promotions: Vec::new(),
        }
    }

    /// Records a blocking error.
    pub fn error(&mut self, finding: Finding) {
        self.valid = false;
        self.errors.push(finding);
    }

    /// Records a non-blocking warning.
    pub fn warning(&mut self, finding: Finding) {
        self.warnings.push(finding);
    }

    /// True when any error carries the given code.
    pub fn has_error(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|f| f.code == code)
    }

    /// True when any warning carries the given code.
    pub fn has_warning(&self, code: ValidationCode) -> bool {
        self.warnings.iter().any(|f| f.code == code)
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accumulates_without_short_circuit() {
        let mut report = ValidationReport::new();
        assert!(report.valid);

        report.error(Finding::new(ValidationCode::EmptyCart, "cart is empty"));
        report.warning(Finding::for_item(
            ValidationCode::PriceChanged,
            "price updated",
            "item-1",
        ));
        report.error(Finding::new(
            ValidationCode::OrderLimitExceeded,
            "below minimum order value",
        ));

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.has_error(ValidationCode::EmptyCart));
        assert!(report.has_warning(ValidationCode::PriceChanged));
    }

    #[test]
    fn test_finding_serialization_shape() {
        let finding = Finding::for_item(ValidationCode::InsufficientStock, "only 3 left", "i-9");
        let json = serde_json::to_value(&finding).unwrap();

        assert_eq!(json["code"], "insufficient_stock");
        assert_eq!(json["affected_item_id"], "i-9");
    }
}
