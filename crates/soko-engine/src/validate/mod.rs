//! # Cart Validation Engine
//!
//! A cart is valid only if EVERY rule passes; failures accumulate as
//! structured errors, non-fatal findings as warnings, and the caller gets
//! the complete report in one round trip.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate_cart(cart_id) → ValidationReport                              │
//! │                                                                         │
//! │  • safe to call repeatedly at any point in the cart's life              │
//! │  • never mutates reservation state                                      │
//! │  • the ONLY side effects: stale price snapshots on cart items are      │
//! │    silently repaired, and the recomputed totals land on the cart row   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod rules;

pub use context::{ItemContext, ValidationContext};
pub use rules::PriceRepair;

use tracing::{debug, info};

use crate::error::EngineResult;
use crate::Engine;
use soko_core::ValidationReport;

impl Engine {
    /// Validates a cart against the full rule set.
    ///
    /// See the module docs for the contract; see [`rules`] for the rule
    /// set itself.
    pub async fn validate_cart(&self, cart_id: &str) -> EngineResult<ValidationReport> {
        let ctx = ValidationContext::load(self, cart_id).await?;
        let (report, repairs) = rules::run(&ctx, self.config());

        for repair in &repairs {
            self.db()
                .carts()
                .repair_item_price(&repair.item_id, repair.price_cents)
                .await?;
            debug!(item_id = %repair.item_id, price_cents = repair.price_cents, "Price snapshot repaired");
        }

        self.db()
            .carts()
            .update_totals(
                cart_id,
                report.totals.subtotal_cents,
                report.totals.shipping_cents,
                report.totals.discount_cents,
                report.totals.total_cents,
            )
            .await?;

        info!(
            cart_id = %cart_id,
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Cart validated"
        );
        Ok(report)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::reservations::ReserveRequest;
    use crate::testutil::{add_item, seed_cart, seed_stock, test_engine};
    use crate::{Engine, EngineConfig};
    use soko_core::{
        Address, Coupon, DiscountType, PaymentMethod, ProductRelation, Promotion, RelationKind,
        ShippingMethod, ValidationCode,
    };
    use soko_db::{Database, DbConfig};

    /// Builds a cart that passes the full rule set:
    /// two in-stock products, a complete Kenyan address, a zone-matched
    /// shipping method and an active mobile-money payment method.
    async fn valid_fixture(engine: &Engine) -> String {
        seed_stock(engine, "p10", 10).await;
        seed_stock(engine, "p11", 10).await;

        let catalog = engine.db().catalog();
        catalog
            .insert_address(&Address {
                id: "addr-1".to_string(),
                full_name: "Wanjiku Kamau".to_string(),
                line1: "Moi Avenue 12".to_string(),
                line2: None,
                city: "Nairobi".to_string(),
                region: "Nairobi".to_string(),
                postal_code: "00100".to_string(),
                country: "KE".to_string(),
                phone: "0712345678".to_string(),
            })
            .await
            .unwrap();
        catalog
            .insert_zone("zone-ea", "East Africa", &["KE", "UG", "TZ"])
            .await
            .unwrap();
        catalog
            .insert_shipping_method(&ShippingMethod {
                id: "ship-std".to_string(),
                zone_id: "zone-ea".to_string(),
                name: "Standard".to_string(),
                is_active: true,
                price_cents: 200,
                min_order_cents: 0,
                max_weight_grams: 100_000,
            })
            .await
            .unwrap();
        catalog
            .insert_payment_method(
                &PaymentMethod {
                    code: "mpesa".to_string(),
                    name: "M-Pesa".to_string(),
                    is_active: true,
                    min_amount_cents: 0,
                    max_amount_cents: None,
                    requires_local_phone: true,
                },
                &["KE"],
            )
            .await
            .unwrap();

        seed_cart(engine, "vc").await;
        sqlx::query(
            "UPDATE carts SET shipping_address_id = 'addr-1', same_as_shipping = 1, \
             shipping_method_id = 'ship-std', payment_method_code = 'mpesa' WHERE id = 'vc'",
        )
        .execute(engine.db().pool())
        .await
        .unwrap();

        add_item(engine, "vc", "p10", 1, 1000).await;
        add_item(engine, "vc", "p11", 1, 1000).await;
        "vc".to_string()
    }

    #[tokio::test]
    async fn test_fully_configured_cart_is_valid() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert!(report.errors.is_empty());

        assert_eq!(report.totals.subtotal_cents, 2000);
        assert_eq!(report.totals.shipping_cents, 200);
        assert_eq!(report.totals.total_cents, 2200);

        // Totals landed on the cart row
        let cart = engine.db().carts().get(&cart_id).await.unwrap().unwrap();
        assert_eq!(cart.subtotal_cents, 2000);
        assert_eq!(cart.total_cents, 2200);
    }

    #[tokio::test]
    async fn test_incompatible_pair_blocks_until_one_is_removed() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        engine
            .db()
            .catalog()
            .insert_relation(&ProductRelation {
                product_id: "p10".to_string(),
                related_product_id: "p11".to_string(),
                relation: RelationKind::Excludes,
            })
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        let incompatible: Vec<_> = report
            .errors
            .iter()
            .filter(|f| f.code == ValidationCode::IncompatibleProducts)
            .collect();
        assert_eq!(incompatible.len(), 1);

        // The error names both item ids
        let items = engine.db().carts().items(&cart_id).await.unwrap();
        for item in &items {
            assert!(incompatible[0].message.contains(&item.id));
        }

        // Removing either item clears the failure
        sqlx::query("DELETE FROM cart_items WHERE cart_id = 'vc' AND product_id = 'p11'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn test_required_companion_missing() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;
        seed_stock(&engine, "p12", 10).await;

        engine
            .db()
            .catalog()
            .insert_relation(&ProductRelation {
                product_id: "p10".to_string(),
                related_product_id: "p12".to_string(),
                relation: RelationKind::Requires,
            })
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        assert!(report.has_error(ValidationCode::MissingRequiredProduct));

        // Adding the companion satisfies the rule
        add_item(&engine, &cart_id, "p12", 1, 1000).await;
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn test_stale_price_warns_and_repairs() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        sqlx::query("UPDATE cart_items SET unit_price_cents = 900 WHERE product_id = 'p10'")
            .execute(engine.db().pool())
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid); // warning, not error
        assert!(report.has_warning(ValidationCode::PriceChanged));
        // Totals use the current catalog price
        assert_eq!(report.totals.subtotal_cents, 2000);

        // Snapshot silently repaired
        let items = engine.db().carts().items(&cart_id).await.unwrap();
        assert!(items.iter().all(|i| i.unit_price_cents == 1000));

        // A second pass is clean
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.has_warning(ValidationCode::PriceChanged));
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_an_error() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        sqlx::query("UPDATE cart_items SET quantity = 15 WHERE product_id = 'p10'")
            .execute(engine.db().pool())
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        assert!(report.has_error(ValidationCode::InsufficientStock));
    }

    #[tokio::test]
    async fn test_empty_cart_is_terminal_for_item_rules() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;
        sqlx::query("DELETE FROM cart_items WHERE cart_id = 'vc'")
            .execute(engine.db().pool())
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.has_error(ValidationCode::EmptyCart));

        // The report serializes in the shape collaborators consume
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["errors"][0]["code"], "empty_cart");
    }

    #[tokio::test]
    async fn test_legacy_stock_fallback_warns() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        // p20 has only the legacy flat stock field, no ledger row
        crate::testutil::seed_product(&engine, "p20", 1000, 5).await;
        add_item(&engine, &cart_id, "p20", 3, 1000).await;

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert!(report.has_warning(ValidationCode::LegacyStockFallback));

        // Beyond the legacy count it becomes a real error
        sqlx::query("UPDATE cart_items SET quantity = 8 WHERE product_id = 'p20'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        assert!(report.has_error(ValidationCode::InsufficientStock));
    }

    #[tokio::test]
    async fn test_own_hold_admits_request_with_partially_reserved_warning() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;
        seed_cart(&engine, "rival").await;

        // Our cart holds 4, a rival holds 6 → available 0
        engine
            .reserve_stock(ReserveRequest {
                cart_id: cart_id.clone(),
                user_id: None,
                product_id: "p10".to_string(),
                variant_id: None,
                quantity: 4,
                ttl: None,
            })
            .await
            .unwrap();
        engine
            .reserve_stock(ReserveRequest {
                cart_id: "rival".to_string(),
                user_id: None,
                product_id: "p10".to_string(),
                variant_id: None,
                quantity: 6,
                ttl: None,
            })
            .await
            .unwrap();
        sqlx::query("UPDATE cart_items SET quantity = 4 WHERE product_id = 'p10'")
            .execute(engine.db().pool())
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        // Covered by our own hold → not an error, but flagged
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert!(report.has_warning(ValidationCode::PartiallyReserved));

        // More than the hold covers → hard error
        sqlx::query("UPDATE cart_items SET quantity = 5 WHERE product_id = 'p10'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.has_error(ValidationCode::InsufficientStock));
    }

    #[tokio::test]
    async fn test_address_and_payment_failures_accumulate() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        // Break the phone: invalid for KE, and M-Pesa requires a local one
        sqlx::query("UPDATE addresses SET phone = '12345' WHERE id = 'addr-1'")
            .execute(engine.db().pool())
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        // No short-circuit: both rules report in the same pass
        assert!(report.has_error(ValidationCode::AddressIncomplete));
        assert!(report.has_error(ValidationCode::PaymentMethodUnavailable));
    }

    #[tokio::test]
    async fn test_inactive_shipping_method_and_zone_mismatch() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        sqlx::query("UPDATE shipping_methods SET is_active = 0 WHERE id = 'ship-std'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.has_error(ValidationCode::ShippingUnavailable));
        // Unusable method contributes no shipping cost
        assert_eq!(report.totals.shipping_cents, 0);

        // Reactivate but ship to a country outside the zone
        sqlx::query("UPDATE shipping_methods SET is_active = 1 WHERE id = 'ship-std'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        sqlx::query("UPDATE addresses SET country = 'DE', phone = '+4915123456789' WHERE id = 'addr-1'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.has_error(ValidationCode::ShippingUnavailable));
        // No configured zone covers DE at all → configuration warning too
        assert!(report.has_warning(ValidationCode::DeliveryZoneUncovered));
    }

    #[tokio::test]
    async fn test_coupon_window_and_discount() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        engine
            .db()
            .coupons()
            .insert(&Coupon {
                code: "SAVE15".to_string(),
                discount_type: DiscountType::Percentage,
                value: 1500,
                min_order_cents: 0,
                usage_limit: None,
                used_count: 0,
                starts_at: None,
                ends_at: Some(Utc::now() - chrono::Duration::days(1)),
                is_active: true,
                per_customer_once: false,
            })
            .await
            .unwrap();
        sqlx::query("UPDATE carts SET coupon_code = 'SAVE15' WHERE id = 'vc'")
            .execute(engine.db().pool())
            .await
            .unwrap();

        // Expired → error, no discount
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.has_error(ValidationCode::CouponInvalid));
        assert_eq!(report.totals.discount_cents, 0);

        // Reopen the window → 15% of 2000
        sqlx::query("UPDATE coupons SET ends_at = NULL WHERE code = 'SAVE15'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert_eq!(report.totals.discount_cents, 300);
        assert_eq!(report.totals.total_cents, 2000 - 300 + 200);
    }

    #[tokio::test]
    async fn test_coupon_per_customer_once() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        // Authenticated owner who already redeemed the coupon
        sqlx::query("UPDATE carts SET guest_id = NULL, user_id = 'u1', coupon_code = 'ONCE' WHERE id = 'vc'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        engine
            .db()
            .coupons()
            .insert(&Coupon {
                code: "ONCE".to_string(),
                discount_type: DiscountType::Fixed,
                value: 100,
                min_order_cents: 0,
                usage_limit: None,
                used_count: 1,
                starts_at: None,
                ends_at: None,
                is_active: true,
                per_customer_once: true,
            })
            .await
            .unwrap();
        let mut conn = engine.db().pool().acquire().await.unwrap();
        engine
            .db()
            .coupons()
            .redeem(&mut conn, "ONCE", "some-old-order", Some("u1"))
            .await
            .unwrap();
        drop(conn);

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|f| f.code == ValidationCode::CouponInvalid
                && f.message.contains("already used")));
    }

    #[tokio::test]
    async fn test_purchase_limit_counts_history() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        sqlx::query("UPDATE carts SET guest_id = NULL, user_id = 'u1' WHERE id = 'vc'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        sqlx::query("UPDATE products SET customer_purchase_limit = 5 WHERE id = 'p10'")
            .execute(engine.db().pool())
            .await
            .unwrap();

        // u1 already owns 3 from a past order
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO orders (id, order_ref, user_id, inventory_state, created_at, updated_at) \
             VALUES ('o-old', 'ref-old', 'u1', 'committed', ?1, ?1)",
        )
        .bind(now)
        .execute(engine.db().pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price_cents) \
             VALUES ('oi-old', 'o-old', 'p10', 3, 1000)",
        )
        .execute(engine.db().pool())
        .await
        .unwrap();

        // 3 owned + 3 requested > 5
        sqlx::query("UPDATE cart_items SET quantity = 3 WHERE product_id = 'p10'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.has_error(ValidationCode::PurchaseLimitExceeded));

        // 3 owned + 2 requested = 5 is fine
        sqlx::query("UPDATE cart_items SET quantity = 2 WHERE product_id = 'p10'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn test_promotions_discount_without_errors() {
        let engine = test_engine().await;
        let cart_id = valid_fixture(&engine).await;

        engine
            .db()
            .catalog()
            .insert_promotion(&Promotion {
                id: "promo-10".to_string(),
                name: "Ten percent off".to_string(),
                discount_type: DiscountType::Percentage,
                value: 1000,
                min_order_cents: 1000,
                starts_at: None,
                ends_at: None,
                is_active: true,
            })
            .await
            .unwrap();

        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert_eq!(report.applied_promotions, vec!["promo-10".to_string()]);
        assert_eq!(report.totals.discount_cents, 200); // 10% of 2000
    }

    #[tokio::test]
    async fn test_global_order_bounds() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = Engine::new(db, EngineConfig::default().order_bounds(5000, Some(100_000)));
        let cart_id = valid_fixture(&engine).await;

        // Total 2200 < minimum 5000
        let report = engine.validate_cart(&cart_id).await.unwrap();
        assert!(!report.valid);
        assert!(report.has_error(ValidationCode::OrderLimitExceeded));
    }
}
