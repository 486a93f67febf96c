//! # Checkout Commit Coordinator
//!
//! Converts a validated cart (or an ad-hoc item list) into an order.
//!
//! ## All-Or-Nothing Commit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  commit_checkout(cart, order_ref)                                       │
//! │                                                                         │
//! │  1. duplicate order_ref?  → idempotent no-op result                     │
//! │  2. acquire ALL key locks, sorted   (no deadlock between commits)       │
//! │  3. BEGIN                                                               │
//! │     per line item:                                                      │
//! │       reservation CAS active → completed   (loser aborts)               │
//! │       reduce stock_level   (guarded)                                    │
//! │       release reserved     (paired - invariant holds at lock release)   │
//! │     insert order (inventory_state = committed) + item snapshots         │
//! │     coupon redemption keyed by order id (counts at most once)           │
//! │     deactivate the source cart                                          │
//! │  4. COMMIT                                                              │
//! │                                                                         │
//! │  ANY item failing → the transaction drops → EVERY prior mutation in    │
//! │  this commit rolls back. Partial commits cannot be observed.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The restore path is the mirror image, guarded by the order's
//! `inventory_state` compare-and-set so repeated external notifications
//! cannot double-restore.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use soko_core::validation::validate_quantity;
use soko_core::{InventoryState, Money, Order, OrderItem, ReservationStatus, StockKey};

// =============================================================================
// Request / Response Types
// =============================================================================

/// What is being committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckoutSource {
    /// A persisted cart (items, coupon and owner read from it).
    Cart(String),
    /// An ad-hoc item list with no backing cart or reservations.
    Items {
        items: Vec<CheckoutItem>,
        user_id: Option<String>,
    },
}

/// One ad-hoc checkout line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// Direction of a ledger adjustment made by commit/restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Reduced,
    Restored,
}

/// One ledger adjustment applied by a commit or restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub kind: AdjustmentKind,
}

/// Result of [`Engine::commit_checkout`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub order_id: String,
    pub order_ref: String,
    pub order_committed: bool,
    /// True when this call found the order already committed (retry).
    pub already_committed: bool,
    pub adjustments: Vec<StockAdjustment>,
}

/// Result of [`Engine::restore_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub order_id: String,
    pub order_ref: String,
    /// True when this call found the order already restored (retry).
    pub already_restored: bool,
    pub adjustments: Vec<StockAdjustment>,
}

/// Internal normalized commit line.
struct CommitLine {
    key: StockKey,
    quantity: i64,
    unit_price_cents: i64,
}

// =============================================================================
// Engine Operations
// =============================================================================

impl Engine {
    /// Commits a checkout: permanent stock deductions, order row, coupon
    /// accounting, cart deactivation - all or nothing.
    ///
    /// Idempotent against duplicate completion events: a retried call with
    /// the same `order_ref` returns the existing order untouched.
    pub async fn commit_checkout(
        &self,
        source: CheckoutSource,
        order_ref: &str,
    ) -> EngineResult<CommitOutcome> {
        // Fast path for retried notifications
        if let Some(existing) = self.db().orders().get_by_ref(order_ref).await? {
            debug!(order_ref = %order_ref, "Duplicate commit; returning existing order");
            return Ok(CommitOutcome {
                order_id: existing.id,
                order_ref: order_ref.to_string(),
                order_committed: true,
                already_committed: true,
                adjustments: Vec::new(),
            });
        }

        let (lines, cart, user_id, coupon_code) = self.resolve_source(&source).await?;
        if lines.is_empty() {
            return Err(EngineError::InvalidQuantity { requested: 0 });
        }
        for line in &lines {
            validate_quantity(line.quantity).map_err(|_| EngineError::InvalidQuantity {
                requested: line.quantity,
            })?;
        }

        let keys: Vec<StockKey> = lines.iter().map(|l| l.key.clone()).collect();
        for key in &keys {
            self.ensure_stock_record(key).await?;
        }

        // Resolve the coupon before the transaction opens; a stale code on
        // the cart must not abort the commit, it just grants nothing
        let coupon = match &coupon_code {
            Some(code) => self.db().coupons().get(code).await?,
            None => None,
        };

        let _guards = self
            .locks()
            .acquire_many(&keys, self.config().lock_wait)
            .await?;

        let now = Utc::now();
        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;

        // Re-check under the transaction: a racing duplicate may have
        // landed between the fast path and the lock acquisition.
        if let Some(existing) = self.db().orders().get_by_ref_in(&mut tx, order_ref).await? {
            drop(tx);
            return Ok(CommitOutcome {
                order_id: existing.id,
                order_ref: order_ref.to_string(),
                order_committed: true,
                already_committed: true,
                adjustments: Vec::new(),
            });
        }

        let mut adjustments = Vec::with_capacity(lines.len());
        for line in &lines {
            self.commit_line(&mut tx, cart.as_deref(), line, now).await?;
            adjustments.push(StockAdjustment {
                product_id: line.key.product_id.clone(),
                variant_id: line.key.variant_id.clone(),
                quantity: line.quantity,
                kind: AdjustmentKind::Reduced,
            });
        }

        let subtotal: i64 = lines.iter().map(|l| l.unit_price_cents * l.quantity).sum();
        let discount = coupon
            .as_ref()
            .map(|c| c.discount_for(Money::from_cents(subtotal)).cents())
            .unwrap_or(0);

        let order = Order {
            id: Uuid::new_v4().to_string(),
            order_ref: order_ref.to_string(),
            cart_id: cart.as_deref().map(str::to_string),
            user_id: user_id.clone(),
            coupon_code: coupon_code.clone(),
            subtotal_cents: subtotal,
            discount_cents: discount,
            total_cents: subtotal - discount,
            inventory_state: InventoryState::Committed,
            created_at: now,
            updated_at: now,
        };
        self.db().orders().insert(&mut tx, &order).await?;

        for line in &lines {
            self.db()
                .orders()
                .insert_item(
                    &mut tx,
                    &OrderItem {
                        id: Uuid::new_v4().to_string(),
                        order_id: order.id.clone(),
                        product_id: line.key.product_id.clone(),
                        variant_id: line.key.variant_id.clone(),
                        quantity: line.quantity,
                        unit_price_cents: line.unit_price_cents,
                    },
                )
                .await?;
        }

        // used_count moves at most once per order id, even across retries
        if let Some(c) = &coupon {
            self.db()
                .coupons()
                .redeem(&mut tx, &c.code, &order.id, user_id.as_deref())
                .await?;
        }

        if let Some(cart_id) = cart.as_deref() {
            self.db().carts().deactivate(&mut tx, cart_id).await?;
        }

        tx.commit().await.map_err(soko_db::DbError::from)?;

        info!(
            order_id = %order.id,
            order_ref = %order_ref,
            items = lines.len(),
            total_cents = order.total_cents,
            "Checkout committed"
        );
        Ok(CommitOutcome {
            order_id: order.id,
            order_ref: order_ref.to_string(),
            order_committed: true,
            already_committed: false,
            adjustments,
        })
    }

    /// Restores stock for a cancelled/returned order.
    ///
    /// Idempotent: guarded by the order's inventory_state compare-and-set,
    /// so repeated status-change notifications restore at most once.
    pub async fn restore_order(&self, order_ref: &str) -> EngineResult<RestoreOutcome> {
        let order = self
            .db()
            .orders()
            .get_by_ref(order_ref)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_ref))?;

        match order.inventory_state {
            InventoryState::Restored => {
                debug!(order_ref = %order_ref, "Duplicate restore; no-op");
                return Ok(RestoreOutcome {
                    order_id: order.id,
                    order_ref: order_ref.to_string(),
                    already_restored: true,
                    adjustments: Vec::new(),
                });
            }
            InventoryState::Pending => {
                return Err(EngineError::invalid_state("Order", order_ref, "pending"));
            }
            InventoryState::Committed => {}
        }

        let items = self.db().orders().items(&order.id).await?;
        let keys: Vec<StockKey> = items.iter().map(|i| i.key()).collect();
        let _guards = self
            .locks()
            .acquire_many(&keys, self.config().lock_wait)
            .await?;

        let now = Utc::now();
        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;

        let won = self
            .db()
            .orders()
            .transition_inventory_state(
                &mut tx,
                order_ref,
                InventoryState::Committed,
                InventoryState::Restored,
            )
            .await?;

        if !won {
            // A concurrent restore got here first
            drop(tx);
            return Ok(RestoreOutcome {
                order_id: order.id,
                order_ref: order_ref.to_string(),
                already_restored: true,
                adjustments: Vec::new(),
            });
        }

        let mut adjustments = Vec::with_capacity(items.len());
        for item in &items {
            self.db()
                .stock()
                .increase(&mut tx, &item.key(), item.quantity, now)
                .await?;
            adjustments.push(StockAdjustment {
                product_id: item.product_id.clone(),
                variant_id: item.variant_id.clone(),
                quantity: item.quantity,
                kind: AdjustmentKind::Restored,
            });
        }

        tx.commit().await.map_err(soko_db::DbError::from)?;

        info!(order_ref = %order_ref, items = items.len(), "Order stock restored");
        Ok(RestoreOutcome {
            order_id: order.id,
            order_ref: order_ref.to_string(),
            already_restored: false,
            adjustments,
        })
    }

    /// Normalizes a checkout source into commit lines.
    async fn resolve_source(
        &self,
        source: &CheckoutSource,
    ) -> EngineResult<(Vec<CommitLine>, Option<String>, Option<String>, Option<String>)> {
        match source {
            CheckoutSource::Cart(cart_id) => {
                let cart = self
                    .db()
                    .carts()
                    .get(cart_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Cart", cart_id))?;
                if !cart.is_active {
                    return Err(EngineError::invalid_state("Cart", cart_id, "inactive"));
                }

                let lines = self
                    .db()
                    .carts()
                    .items(cart_id)
                    .await?
                    .into_iter()
                    .map(|item| CommitLine {
                        key: item.key(),
                        quantity: item.quantity,
                        unit_price_cents: item.unit_price_cents,
                    })
                    .collect();

                Ok((lines, Some(cart_id.clone()), cart.user_id, cart.coupon_code))
            }
            CheckoutSource::Items { items, user_id } => {
                let lines = items
                    .iter()
                    .map(|item| CommitLine {
                        key: StockKey {
                            product_id: item.product_id.clone(),
                            variant_id: item.variant_id.clone(),
                        },
                        quantity: item.quantity,
                        unit_price_cents: item.unit_price_cents,
                    })
                    .collect();

                Ok((lines, None, user_id.clone(), None))
            }
        }
    }

    /// Commits one line inside the open transaction.
    ///
    /// Reservation-backed lines: CAS the reservation, reduce, release the
    /// full hold. Unreserved lines: reduce guarded by AVAILABLE stock so
    /// they cannot eat into other carts' holds.
    async fn commit_line(
        &self,
        tx: &mut sqlx::SqliteConnection,
        cart_id: Option<&str>,
        line: &CommitLine,
        now: chrono::DateTime<Utc>,
    ) -> EngineResult<()> {
        let reservation = match cart_id {
            Some(cart_id) => {
                self.db()
                    .reservations()
                    .find_active_for_item(tx, cart_id, &line.key)
                    .await?
            }
            None => None,
        };

        match reservation {
            Some(reservation) => {
                if reservation.quantity < line.quantity {
                    return Err(EngineError::invalid_state(
                        "Reservation",
                        &reservation.id,
                        format!(
                            "holding {} of {} requested",
                            reservation.quantity, line.quantity
                        ),
                    ));
                }

                if !self
                    .db()
                    .reservations()
                    .transition(tx, &reservation.id, ReservationStatus::Completed)
                    .await?
                {
                    // Lost the CAS to a concurrent cancel/expire
                    return Err(EngineError::invalid_state(
                        "Reservation",
                        &reservation.id,
                        "terminal",
                    ));
                }

                if !self.db().stock().reduce(tx, &line.key, line.quantity, now).await? {
                    let available = self
                        .db()
                        .stock()
                        .get_in(tx, &line.key)
                        .await?
                        .map(|r| r.available_quantity())
                        .unwrap_or(0);
                    return Err(EngineError::InsufficientStock {
                        key: line.key.to_string(),
                        available,
                        requested: line.quantity,
                    });
                }

                // Pair the reduce with releasing the reservation's whole
                // hold - the invariant holds when the key lock drops.
                self.db()
                    .stock()
                    .release(tx, &line.key, reservation.quantity, now)
                    .await?;
            }
            None => {
                if !self
                    .db()
                    .stock()
                    .reduce_available(tx, &line.key, line.quantity, now)
                    .await?
                {
                    let available = self
                        .db()
                        .stock()
                        .get_in(tx, &line.key)
                        .await?
                        .map(|r| r.available_quantity())
                        .unwrap_or(0);
                    return Err(EngineError::InsufficientStock {
                        key: line.key.to_string(),
                        available,
                        requested: line.quantity,
                    });
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservations::ReserveRequest;
    use crate::testutil::{add_item, seed_cart, seed_stock, test_engine};
    use soko_core::{Coupon, DiscountType};

    fn reserve(cart_id: &str, product_id: &str, quantity: i64) -> ReserveRequest {
        ReserveRequest {
            cart_id: cart_id.to_string(),
            user_id: None,
            product_id: product_id.to_string(),
            variant_id: None,
            quantity,
            ttl: None,
        }
    }

    #[tokio::test]
    async fn test_commit_reserved_cart_deducts_and_releases() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p42", 10).await;
        seed_cart(&engine, "cart-a").await;
        add_item(&engine, "cart-a", "p42", 4, 1000).await;
        engine.reserve_stock(reserve("cart-a", "p42", 4)).await.unwrap();

        let outcome = engine
            .commit_checkout(CheckoutSource::Cart("cart-a".to_string()), "ref-1")
            .await
            .unwrap();
        assert!(outcome.order_committed);
        assert!(!outcome.already_committed);
        assert_eq!(outcome.adjustments.len(), 1);

        // stock_level=6, reserved=0
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.stock_level, 6);
        assert_eq!(record.reserved_quantity, 0);
        assert!(record.is_consistent());

        // Cart is gone from circulation
        assert!(!engine.db().carts().get("cart-a").await.unwrap().unwrap().is_active);

        let order = engine.db().orders().get_by_ref("ref-1").await.unwrap().unwrap();
        assert_eq!(order.inventory_state, InventoryState::Committed);
        assert_eq!(order.subtotal_cents, 4000);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let engine = test_engine().await;
        let key1 = seed_stock(&engine, "p1", 10).await;
        let key2 = seed_stock(&engine, "p2", 10).await;
        let key3 = seed_stock(&engine, "p3", 10).await;
        seed_cart(&engine, "cart").await;
        add_item(&engine, "cart", "p1", 2, 1000).await;
        add_item(&engine, "cart", "p2", 5, 1000).await;
        add_item(&engine, "cart", "p3", 1, 1000).await;

        // Item 2 has no reservation and someone else drained its stock
        let mut conn = engine.db().pool().acquire().await.unwrap();
        engine
            .db()
            .stock()
            .reduce(&mut conn, &key2, 8, Utc::now())
            .await
            .unwrap();
        drop(conn);

        let err = engine
            .commit_checkout(CheckoutSource::Cart("cart".to_string()), "ref-fail")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));

        // Items 1 and 3 show no ledger change
        for key in [&key1, &key3] {
            let record = engine.db().stock().get(key).await.unwrap().unwrap();
            assert_eq!(record.stock_level, 10);
            assert_eq!(record.reserved_quantity, 0);
        }
        // No order landed
        assert!(engine.db().orders().get_by_ref("ref-fail").await.unwrap().is_none());
        // Cart still active
        assert!(engine.db().carts().get("cart").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_commit_is_idempotent_per_order_ref() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "cart").await;
        add_item(&engine, "cart", "p1", 3, 1000).await;
        engine.reserve_stock(reserve("cart", "p1", 3)).await.unwrap();

        let first = engine
            .commit_checkout(CheckoutSource::Cart("cart".to_string()), "ref-dup")
            .await
            .unwrap();
        let second = engine
            .commit_checkout(CheckoutSource::Cart("cart".to_string()), "ref-dup")
            .await
            .unwrap();

        assert!(!first.already_committed);
        assert!(second.already_committed);
        assert_eq!(first.order_id, second.order_id);

        // Stock deducted exactly once
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.stock_level, 7);
    }

    #[tokio::test]
    async fn test_coupon_counted_once_across_retries() {
        let engine = test_engine().await;
        seed_stock(&engine, "p1", 10).await;
        let mut cart = seed_cart(&engine, "cart").await;
        add_item(&engine, "cart", "p1", 2, 1000).await;
        engine.reserve_stock(reserve("cart", "p1", 2)).await.unwrap();

        engine
            .db()
            .coupons()
            .insert(&Coupon {
                code: "SAVE10".to_string(),
                discount_type: DiscountType::Percentage,
                value: 1000,
                min_order_cents: 0,
                usage_limit: Some(100),
                used_count: 0,
                starts_at: None,
                ends_at: None,
                is_active: true,
                per_customer_once: false,
            })
            .await
            .unwrap();
        sqlx::query("UPDATE carts SET coupon_code = 'SAVE10' WHERE id = 'cart'")
            .execute(engine.db().pool())
            .await
            .unwrap();
        cart.coupon_code = Some("SAVE10".to_string());

        engine
            .commit_checkout(CheckoutSource::Cart(cart.id.clone()), "ref-c")
            .await
            .unwrap();
        engine
            .commit_checkout(CheckoutSource::Cart(cart.id), "ref-c")
            .await
            .unwrap();

        let coupon = engine.db().coupons().get("SAVE10").await.unwrap().unwrap();
        assert_eq!(coupon.used_count, 1);

        let order = engine.db().orders().get_by_ref("ref-c").await.unwrap().unwrap();
        assert_eq!(order.discount_cents, 200); // 10% of 2000
        assert_eq!(order.total_cents, 1800);
    }

    #[tokio::test]
    async fn test_adhoc_commit_respects_other_reservations() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "other").await;
        engine.reserve_stock(reserve("other", "p1", 8)).await.unwrap();

        // Only 2 available; an ad-hoc order of 5 must fail outright
        let err = engine
            .commit_checkout(
                CheckoutSource::Items {
                    items: vec![CheckoutItem {
                        product_id: "p1".to_string(),
                        variant_id: None,
                        quantity: 5,
                        unit_price_cents: 1000,
                    }],
                    user_id: None,
                },
                "ref-adhoc",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { available: 2, .. }));

        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.stock_level, 10);
        assert_eq!(record.reserved_quantity, 8);
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "cart").await;
        add_item(&engine, "cart", "p1", 4, 1000).await;
        engine.reserve_stock(reserve("cart", "p1", 4)).await.unwrap();
        engine
            .commit_checkout(CheckoutSource::Cart("cart".to_string()), "ref-r")
            .await
            .unwrap();

        let first = engine.restore_order("ref-r").await.unwrap();
        assert!(!first.already_restored);
        assert_eq!(first.adjustments.len(), 1);

        // Retried notification restores nothing further
        let second = engine.restore_order("ref-r").await.unwrap();
        assert!(second.already_restored);
        assert!(second.adjustments.is_empty());

        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.stock_level, 10);
        assert_eq!(record.reserved_quantity, 0);
    }

    #[tokio::test]
    async fn test_restore_unknown_order() {
        let engine = test_engine().await;
        let err = engine.restore_order("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
