//! # The Cart Validation Rule Set
//!
//! Fourteen rules, run in order, never short-circuiting: the caller gets
//! the complete problem list in one round trip. The only rule that skips
//! anything is the empty-cart check, which makes the item-level rules
//! vacuous rather than misleading.
//!
//! ## Rule Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   1. non-empty cart              8. shipping address (+formats)        │
//! │   2. existence & visibility      9. billing address                    │
//! │   3. quantity shape             10. shipping method                    │
//! │   4. stock availability         11. payment method                    │
//! │   5. per-customer limit         12. coupon                            │
//! │   6. price consistency          13. promotions (discounts only)       │
//! │   7. product compatibility      14. global order bounds               │
//! │                                                                         │
//! │  Order matters only for the warning/price-repair side effects, not    │
//! │  for correctness.                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All functions here are pure over the [`ValidationContext`] snapshot;
//! the repairs they suggest are applied by the caller afterwards.

use crate::config::EngineConfig;
use crate::validate::context::{ItemContext, ValidationContext};
use soko_core::validation::{missing_address_fields, phone_matches_country, postal_matches_country};
use soko_core::{
    Address, CartTotals, CouponReason, Finding, Money, RelationKind, ValidationCode,
    ValidationReport,
};

/// A stale price snapshot the caller should write back.
#[derive(Debug, Clone)]
pub struct PriceRepair {
    pub item_id: String,
    pub price_cents: i64,
}

/// Runs the full rule set over one snapshot.
///
/// Returns the report plus the price repairs to apply (the engine's only
/// permitted cart mutation).
pub fn run(ctx: &ValidationContext, config: &EngineConfig) -> (ValidationReport, Vec<PriceRepair>) {
    let mut report = ValidationReport::new();
    let mut repairs = Vec::new();

    // Rule 1: non-empty cart. Terminal for item-level rules (they simply
    // have nothing to iterate), everything cart-level still runs.
    if ctx.items.is_empty() {
        report.error(Finding::new(ValidationCode::EmptyCart, "cart has no items"));
    }

    for item_ctx in &ctx.items {
        check_existence(item_ctx, &mut report); // Rule 2
        check_quantity(item_ctx, &mut report); // Rule 3
        check_stock(item_ctx, &mut report); // Rule 4
        check_customer_limit(item_ctx, &mut report); // Rule 5
        check_price(item_ctx, &mut report, &mut repairs); // Rule 6
    }

    check_compatibility(ctx, &mut report); // Rule 7

    let requires_shipping = ctx.requires_shipping();
    if requires_shipping {
        check_shipping_address(ctx, &mut report); // Rule 8
    }
    check_billing_address(ctx, &mut report); // Rule 9

    // Subtotal over repaired (current) prices
    let subtotal: i64 = ctx
        .items
        .iter()
        .map(|i| i.current_price_cents() * i.item.quantity)
        .sum();

    let shipping_cents = if requires_shipping {
        check_shipping_method(ctx, subtotal, &mut report) // Rule 10
    } else {
        0
    };

    // Rules 12/13 are evaluated before 11 so the payment bounds see the
    // discounted total; their findings keep their place in the report.
    let (coupon_findings, coupon_discount) = evaluate_coupon(ctx, subtotal);
    let (applied_promotions, promo_discount) = evaluate_promotions(ctx, subtotal);

    let discount = (coupon_discount + promo_discount)
        .min(Money::from_cents(subtotal))
        .cents();
    let total = subtotal - discount + shipping_cents + ctx.cart.tax_cents;

    check_payment_method(ctx, total, &mut report); // Rule 11
    for finding in coupon_findings {
        report.error(finding); // Rule 12
    }
    check_global_bounds(ctx, total, config, &mut report); // Rule 14

    report.totals = CartTotals {
        item_count: ctx.items.len(),
        total_quantity: ctx.items.iter().map(|i| i.item.quantity).sum(),
        subtotal_cents: subtotal,
        tax_cents: ctx.cart.tax_cents,
        shipping_cents,
        discount_cents: discount,
        total_cents: total,
    };
    report.applied_promotions = applied_promotions;

    (report, repairs)
}

// =============================================================================
// Rule 2: Existence & Visibility
// =============================================================================

fn check_existence(item_ctx: &ItemContext, report: &mut ValidationReport) {
    let item = &item_ctx.item;

    let Some(product) = &item_ctx.product else {
        report.error(Finding::for_item(
            ValidationCode::ProductUnavailable,
            format!("product {} does not exist", item.product_id),
            &item.id,
        ));
        return;
    };

    if !product.is_active {
        report.error(Finding::for_item(
            ValidationCode::ProductUnavailable,
            format!("product {} is no longer available", product.name),
            &item.id,
        ));
    }

    if let Some(variant_id) = &item.variant_id {
        match &item_ctx.variant {
            None => {
                report.error(Finding::for_item(
                    ValidationCode::ProductUnavailable,
                    format!("variant {variant_id} does not exist"),
                    &item.id,
                ));
            }
            Some(variant) => {
                if variant.product_id != item.product_id {
                    report.error(Finding::for_item(
                        ValidationCode::ProductUnavailable,
                        format!("variant {} does not belong to product {}", variant.id, item.product_id),
                        &item.id,
                    ));
                } else if !variant.is_active {
                    report.error(Finding::for_item(
                        ValidationCode::ProductUnavailable,
                        format!("variant {} is no longer available", variant.name),
                        &item.id,
                    ));
                }
            }
        }
    }
}

// =============================================================================
// Rule 3: Quantity Shape
// =============================================================================

fn check_quantity(item_ctx: &ItemContext, report: &mut ValidationReport) {
    let item = &item_ctx.item;

    if item.quantity < 1 {
        report.error(Finding::for_item(
            ValidationCode::QuantityOutOfRange,
            "quantity must be at least 1",
            &item.id,
        ));
        return;
    }

    let Some(product) = &item_ctx.product else {
        return; // existence already flagged
    };

    if item.quantity < product.min_purchase_qty {
        report.error(Finding::for_item(
            ValidationCode::QuantityOutOfRange,
            format!(
                "minimum purchase quantity for {} is {}",
                product.name, product.min_purchase_qty
            ),
            &item.id,
        ));
    }
    if item.quantity > product.max_purchase_qty {
        report.error(Finding::for_item(
            ValidationCode::QuantityOutOfRange,
            format!(
                "maximum purchase quantity for {} is {}",
                product.name, product.max_purchase_qty
            ),
            &item.id,
        ));
    }
}

// =============================================================================
// Rule 4: Stock Availability
// =============================================================================

/// The hard bound counts the cart's OWN active hold back in - a shopper
/// is never penalized for units they already reserved. A request that
/// clears the bound only thanks to that hold, while other carts also hold
/// units, is flagged "partially reserved" as a warning.
fn check_stock(item_ctx: &ItemContext, report: &mut ValidationReport) {
    let item = &item_ctx.item;

    match &item_ctx.stock {
        Some(stock) => {
            let own = item_ctx.own_reserved;
            let other_reserved = (stock.reserved_quantity - own).max(0);
            let effective_available = stock.available_quantity() + own;

            if item.quantity > effective_available {
                report.error(Finding::for_item(
                    ValidationCode::InsufficientStock,
                    format!(
                        "requested {} but only {} available",
                        item.quantity, effective_available
                    ),
                    &item.id,
                ));
            } else if other_reserved > 0 && item.quantity > stock.available_quantity() {
                report.warning(Finding::for_item(
                    ValidationCode::PartiallyReserved,
                    format!(
                        "{} units are reserved by other carts; the request is covered by this cart's own hold",
                        other_reserved
                    ),
                    &item.id,
                ));
            }
        }
        None => {
            // No ledger row yet: check the legacy flat stock field and say so
            let Some(product) = &item_ctx.product else {
                return;
            };
            let legacy = product.stock_quantity.unwrap_or(0);

            report.warning(Finding::for_item(
                ValidationCode::LegacyStockFallback,
                format!("no stock record for {}; checked legacy stock field", product.name),
                &item.id,
            ));

            if item.quantity > legacy {
                report.error(Finding::for_item(
                    ValidationCode::InsufficientStock,
                    format!("requested {} but only {} in stock", item.quantity, legacy),
                    &item.id,
                ));
            }
        }
    }
}

// =============================================================================
// Rule 5: Per-Customer Cumulative Limit
// =============================================================================

fn check_customer_limit(item_ctx: &ItemContext, report: &mut ValidationReport) {
    let Some(product) = &item_ctx.product else {
        return;
    };
    let Some(limit) = product.customer_purchase_limit else {
        return;
    };

    let would_own = item_ctx.already_purchased + item_ctx.item.quantity;
    if would_own > limit {
        report.error(Finding::for_item(
            ValidationCode::PurchaseLimitExceeded,
            format!(
                "{} is limited to {} per customer ({} already purchased)",
                product.name, limit, item_ctx.already_purchased
            ),
            &item_ctx.item.id,
        ));
    }
}

// =============================================================================
// Rule 6: Price Consistency
// =============================================================================

/// A stale snapshot is a warning, never an error - the engine silently
/// repairs the stored price and the totals use the current one.
fn check_price(
    item_ctx: &ItemContext,
    report: &mut ValidationReport,
    repairs: &mut Vec<PriceRepair>,
) {
    if item_ctx.product.is_none() {
        return;
    }

    let current = item_ctx.current_price_cents();
    let stored = item_ctx.item.unit_price_cents;

    if stored != current {
        report.warning(Finding::for_item(
            ValidationCode::PriceChanged,
            format!(
                "price changed from {} to {} since the item was added",
                Money::from_cents(stored),
                Money::from_cents(current)
            ),
            &item_ctx.item.id,
        ));
        repairs.push(PriceRepair {
            item_id: item_ctx.item.id.clone(),
            price_cents: current,
        });
    }
}

// =============================================================================
// Rule 7: Product Compatibility
// =============================================================================

fn check_compatibility(ctx: &ValidationContext, report: &mut ValidationReport) {
    for relation in &ctx.relations {
        let holder = ctx
            .items
            .iter()
            .find(|i| i.item.product_id == relation.product_id);
        let related = ctx
            .items
            .iter()
            .find(|i| i.item.product_id == relation.related_product_id);

        match relation.relation {
            RelationKind::Excludes => {
                if let (Some(a), Some(b)) = (holder, related) {
                    report.error(Finding::for_item(
                        ValidationCode::IncompatibleProducts,
                        format!(
                            "items {} and {} cannot be purchased together",
                            a.item.id, b.item.id
                        ),
                        &a.item.id,
                    ));
                }
            }
            RelationKind::Requires => {
                if holder.is_some() && related.is_none() {
                    report.error(Finding::for_item(
                        ValidationCode::MissingRequiredProduct,
                        format!(
                            "product {} requires product {} in the cart",
                            relation.product_id, relation.related_product_id
                        ),
                        &holder.map(|h| h.item.id.clone()).unwrap_or_default(),
                    ));
                }
            }
        }
    }
}

// =============================================================================
// Rules 8 & 9: Addresses
// =============================================================================

fn check_address_structure(
    address: &Address,
    label: &str,
    report: &mut ValidationReport,
) {
    let missing = missing_address_fields(address);
    if !missing.is_empty() {
        report.error(Finding::new(
            ValidationCode::AddressIncomplete,
            format!("{label} address is missing: {}", missing.join(", ")),
        ));
    }

    if let Some(false) = phone_matches_country(&address.phone, &address.country) {
        report.error(Finding::new(
            ValidationCode::AddressIncomplete,
            format!(
                "{label} address phone number is not valid for {}",
                address.country
            ),
        ));
    }
    if let Some(false) = postal_matches_country(&address.postal_code, &address.country) {
        report.error(Finding::new(
            ValidationCode::AddressIncomplete,
            format!(
                "{label} address postal code is not valid for {}",
                address.country
            ),
        ));
    }
}

fn check_shipping_address(ctx: &ValidationContext, report: &mut ValidationReport) {
    let Some(address) = &ctx.shipping_address else {
        report.error(Finding::new(
            ValidationCode::AddressIncomplete,
            "shipping address is required",
        ));
        return;
    };

    check_address_structure(address, "shipping", report);

    // Zone coverage gaps are configuration problems, not shopper
    // problems - warn instead of hard-blocking
    if ctx.any_zone_covers_country == Some(false) {
        report.warning(Finding::new(
            ValidationCode::DeliveryZoneUncovered,
            format!("no delivery zone is configured for {}", address.country),
        ));
    }
}

fn check_billing_address(ctx: &ValidationContext, report: &mut ValidationReport) {
    if ctx.cart.same_as_shipping {
        return;
    }

    match &ctx.billing_address {
        Some(address) => check_address_structure(address, "billing", report),
        None => report.error(Finding::new(
            ValidationCode::AddressIncomplete,
            "billing address is required unless marked same as shipping",
        )),
    }
}

// =============================================================================
// Rule 10: Shipping Method
// =============================================================================

/// Returns the shipping cost the totals should carry (zero when the
/// method is unusable - the errors already say why).
fn check_shipping_method(
    ctx: &ValidationContext,
    subtotal: i64,
    report: &mut ValidationReport,
) -> i64 {
    let Some(method) = &ctx.shipping_method else {
        report.error(Finding::new(
            ValidationCode::ShippingUnavailable,
            "no shipping method selected",
        ));
        return 0;
    };

    let mut usable = true;

    if !method.is_active {
        report.error(Finding::new(
            ValidationCode::ShippingUnavailable,
            format!("shipping method {} is not available", method.name),
        ));
        usable = false;
    }

    if let Some(address) = &ctx.shipping_address {
        if !ctx.method_zone_countries.iter().any(|c| c == &address.country) {
            report.error(Finding::new(
                ValidationCode::ShippingUnavailable,
                format!(
                    "shipping method {} does not deliver to {}",
                    method.name, address.country
                ),
            ));
            usable = false;
        }
    }

    if subtotal < method.min_order_cents {
        report.error(Finding::new(
            ValidationCode::ShippingUnavailable,
            format!(
                "shipping method {} requires a minimum order of {}",
                method.name,
                Money::from_cents(method.min_order_cents)
            ),
        ));
        usable = false;
    }

    let weight = ctx.total_weight_grams();
    if weight > method.max_weight_grams {
        report.error(Finding::new(
            ValidationCode::ShippingUnavailable,
            format!(
                "cart weight {}g exceeds the {}g limit of {}",
                weight, method.max_weight_grams, method.name
            ),
        ));
        usable = false;
    }

    if usable {
        method.price_cents
    } else {
        0
    }
}

// =============================================================================
// Rule 11: Payment Method
// =============================================================================

fn check_payment_method(ctx: &ValidationContext, total: i64, report: &mut ValidationReport) {
    let Some(method) = &ctx.payment_method else {
        report.error(Finding::new(
            ValidationCode::PaymentMethodUnavailable,
            "no payment method selected",
        ));
        return;
    };

    if !method.is_active {
        report.error(Finding::new(
            ValidationCode::PaymentMethodUnavailable,
            format!("payment method {} is not available", method.name),
        ));
    }

    if let Some(address) = &ctx.shipping_address {
        if !ctx.payment_countries.is_empty()
            && !ctx.payment_countries.iter().any(|c| c == &address.country)
        {
            report.error(Finding::new(
                ValidationCode::PaymentMethodUnavailable,
                format!(
                    "payment method {} is not available in {}",
                    method.name, address.country
                ),
            ));
        }
    }

    if total < method.min_amount_cents {
        report.error(Finding::new(
            ValidationCode::PaymentMethodUnavailable,
            format!(
                "payment method {} requires a total of at least {}",
                method.name,
                Money::from_cents(method.min_amount_cents)
            ),
        ));
    }
    if let Some(max) = method.max_amount_cents {
        if total > max {
            report.error(Finding::new(
                ValidationCode::PaymentMethodUnavailable,
                format!(
                    "payment method {} accepts at most {}",
                    method.name,
                    Money::from_cents(max)
                ),
            ));
        }
    }

    // Mobile-money methods need a valid local number on file
    if method.requires_local_phone {
        let phone_ok = ctx
            .shipping_address
            .as_ref()
            .map(|a| phone_matches_country(&a.phone, &a.country) != Some(false))
            .unwrap_or(false);
        if !phone_ok {
            report.error(Finding::new(
                ValidationCode::PaymentMethodUnavailable,
                format!(
                    "payment method {} requires a valid local phone number",
                    method.name
                ),
            ));
        }
    }
}

// =============================================================================
// Rule 12: Coupon
// =============================================================================

/// Evaluates the applied coupon. Findings accumulate (no short-circuit);
/// the discount only counts when NOTHING failed.
fn evaluate_coupon(ctx: &ValidationContext, subtotal: i64) -> (Vec<Finding>, Money) {
    let Some(code) = &ctx.cart.coupon_code else {
        return (Vec::new(), Money::zero());
    };

    let mut findings = Vec::new();
    let coupon_finding = |reason: CouponReason| {
        Finding::new(
            ValidationCode::CouponInvalid,
            format!("coupon {code}: {}", reason.describe()),
        )
    };

    let Some(coupon) = &ctx.coupon else {
        return (
            vec![Finding::new(
                ValidationCode::CouponInvalid,
                format!("coupon {code} does not exist"),
            )],
            Money::zero(),
        );
    };

    if !coupon.is_active {
        findings.push(coupon_finding(CouponReason::NotApplicable));
    }
    if let Some(starts_at) = coupon.starts_at {
        if ctx.now < starts_at {
            findings.push(coupon_finding(CouponReason::NotStarted));
        }
    }
    if let Some(ends_at) = coupon.ends_at {
        if ctx.now > ends_at {
            findings.push(coupon_finding(CouponReason::Expired));
        }
    }
    if coupon.limit_reached() {
        findings.push(coupon_finding(CouponReason::LimitReached));
    }
    if subtotal < coupon.min_order_cents {
        findings.push(coupon_finding(CouponReason::MinValueNotMet));
    }
    if !ctx.coupon_products.is_empty() {
        let any_eligible = ctx
            .items
            .iter()
            .any(|i| ctx.coupon_products.contains(&i.item.product_id));
        if !any_eligible {
            findings.push(coupon_finding(CouponReason::NotApplicable));
        }
    }
    if coupon.per_customer_once && ctx.coupon_used_by_customer {
        findings.push(coupon_finding(CouponReason::AlreadyUsed));
    }

    if findings.is_empty() {
        let discount = coupon.discount_for(Money::from_cents(subtotal));
        (findings, discount)
    } else {
        (findings, Money::zero())
    }
}

// =============================================================================
// Rule 13: Promotions
// =============================================================================

/// Promotions never produce errors - only discount effects on totals.
fn evaluate_promotions(ctx: &ValidationContext, subtotal: i64) -> (Vec<String>, Money) {
    let mut applied = Vec::new();
    let mut discount = Money::zero();
    let subtotal = Money::from_cents(subtotal);

    for promotion in &ctx.promotions {
        if promotion.applies(subtotal, ctx.now) {
            discount += promotion.discount_for(subtotal);
            applied.push(promotion.id.clone());
        }
    }

    (applied, discount)
}

// =============================================================================
// Rule 14: Global Order Bounds
// =============================================================================

fn check_global_bounds(
    ctx: &ValidationContext,
    total: i64,
    config: &EngineConfig,
    report: &mut ValidationReport,
) {
    // An empty cart already failed rule 1; bounds on zero would only
    // repeat the noise
    if ctx.items.is_empty() {
        return;
    }

    if config.min_order_cents > 0 && total < config.min_order_cents {
        report.error(Finding::new(
            ValidationCode::OrderLimitExceeded,
            format!(
                "order total {} is below the minimum of {}",
                Money::from_cents(total),
                Money::from_cents(config.min_order_cents)
            ),
        ));
    }

    if let Some(max) = config.max_order_cents {
        if total > max {
            report.error(Finding::new(
                ValidationCode::OrderLimitExceeded,
                format!(
                    "order total {} exceeds the maximum of {}",
                    Money::from_cents(total),
                    Money::from_cents(max)
                ),
            ));
        }
    }

    if ctx.items.len() > config.max_cart_items {
        report.error(Finding::new(
            ValidationCode::OrderLimitExceeded,
            format!(
                "cart has {} distinct items; the maximum is {}",
                ctx.items.len(),
                config.max_cart_items
            ),
        ));
    }
}
