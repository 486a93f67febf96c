//! # soko-engine: Inventory Reservation & Cart-Checkout Concurrency Engine
//!
//! Tracks per-SKU stock, temporarily reserves units while a shopper is in
//! cart/checkout, validates carts against the full rule set, and
//! atomically converts reservations into permanent stock deductions (or
//! restores them on cancellation/return).
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  client adds item                                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_cart ── stock/compat/address/method/coupon rules              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  reserve_stock ── key lock ── guarded ledger UPDATE ── reservation row  │
//! │       │                                                                 │
//! │       │   (cart mutates freely while the reservation is ACTIVE;         │
//! │       │    the sweeper reclaims holds whose TTL elapses)                 │
//! │       ▼                                                                 │
//! │  validate_cart (full re-check at checkout)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  commit_checkout ── sorted multi-key locks ── ONE transaction:          │
//! │       reservation CAS → reduce → release → order + coupon + cart        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  external payment/cancel event ── restore_order (idempotent)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`keylock`] - per-(product, variant) mutual exclusion
//! - [`ledger`] - stock availability, lazy seeding, restock
//! - [`reservations`] - reservation lifecycle and cart merge
//! - [`validate`] - the cart validation rule set
//! - [`checkout`] - all-or-nothing commit and idempotent restore
//! - [`sweeper`] - background expiry sweep and reconciliation
//! - [`config`] - engine tunables
//! - [`error`] - the error taxonomy

pub mod checkout;
pub mod config;
pub mod error;
pub mod keylock;
pub mod ledger;
pub mod reservations;
pub mod sweeper;
pub mod validate;

pub use checkout::{
    AdjustmentKind, CheckoutItem, CheckoutSource, CommitOutcome, RestoreOutcome, StockAdjustment,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use keylock::{KeyGuard, KeyLockRegistry};
pub use ledger::Availability;
pub use reservations::{ReleaseTarget, ReserveRequest};
pub use sweeper::{SweepReport, Sweeper, SweeperHandle};

use std::sync::Arc;

use soko_db::Database;

// =============================================================================
// Engine
// =============================================================================

/// The engine service object.
///
/// Constructed once at startup and passed by reference (or cheap clone -
/// it wraps a pool handle, an `Arc`'d lock registry and an `Arc`'d
/// config). All process-wide coordination lives inside this value; there
/// is no global mutable state.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    locks: Arc<KeyLockRegistry>,
    config: Arc<EngineConfig>,
}

impl Engine {
    /// Creates an engine over an initialized database.
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Engine {
            db,
            locks: KeyLockRegistry::new(),
            config: Arc::new(config),
        }
    }

    /// The backing database handle.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The per-key lock registry.
    pub(crate) fn locks(&self) -> &Arc<KeyLockRegistry> {
        &self.locks
    }
}

// =============================================================================
// Test Utilities
// =============================================================================

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use soko_core::{Cart, CartItem, Product, StockKey, StockRecord, StockStatus};
    use soko_db::DbConfig;

    /// Engine over a fresh in-memory database.
    pub async fn test_engine() -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, EngineConfig::default())
    }

    /// Seeds a product; `legacy_stock` feeds the lazy ledger seeding path.
    pub async fn seed_product(engine: &Engine, id: &str, price_cents: i64, legacy_stock: i64) {
        let now = Utc::now();
        engine
            .db()
            .catalog()
            .insert_product(&Product {
                id: id.to_string(),
                sku: format!("SKU-{id}"),
                name: format!("Product {id}"),
                price_cents,
                weight_grams: 250,
                requires_shipping: true,
                is_active: true,
                stock_quantity: Some(legacy_stock),
                min_purchase_qty: 1,
                max_purchase_qty: 999,
                customer_purchase_limit: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    /// Seeds a product plus an explicit stock ledger row.
    pub async fn seed_stock(engine: &Engine, product_id: &str, stock_level: i64) -> StockKey {
        seed_product(engine, product_id, 1000, stock_level).await;
        let key = StockKey::product(product_id);
        engine
            .db()
            .stock()
            .insert_ignore(&StockRecord {
                id: Uuid::new_v4().to_string(),
                product_id: product_id.to_string(),
                variant_id: None,
                stock_level,
                reserved_quantity: 0,
                reorder_level: 0,
                low_stock_threshold: 5,
                status: StockStatus::Active,
                last_updated: Utc::now(),
            })
            .await
            .unwrap();
        key
    }

    /// Seeds an active guest cart.
    pub async fn seed_cart(engine: &Engine, id: &str) -> Cart {
        let now = Utc::now();
        let cart = Cart {
            id: id.to_string(),
            user_id: None,
            guest_id: Some(format!("guest-{id}")),
            is_active: true,
            expires_at: now + chrono::Duration::minutes(30),
            coupon_code: None,
            shipping_address_id: None,
            billing_address_id: None,
            same_as_shipping: false,
            shipping_method_id: None,
            payment_method_code: None,
            subtotal_cents: 0,
            tax_cents: 0,
            shipping_cents: 0,
            discount_cents: 0,
            total_cents: 0,
            created_at: now,
            updated_at: now,
        };
        engine.db().carts().insert(&cart).await.unwrap();
        cart
    }

    /// Adds a line item to a cart.
    pub async fn add_item(
        engine: &Engine,
        cart_id: &str,
        product_id: &str,
        quantity: i64,
        unit_price_cents: i64,
    ) -> CartItem {
        let item = CartItem {
            id: Uuid::new_v4().to_string(),
            cart_id: cart_id.to_string(),
            product_id: product_id.to_string(),
            variant_id: None,
            quantity,
            unit_price_cents,
            added_at: Utc::now(),
        };
        let mut conn = engine.db().pool().acquire().await.unwrap();
        engine
            .db()
            .carts()
            .insert_item(&mut conn, &item)
            .await
            .unwrap();
        item
    }
}
