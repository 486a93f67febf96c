//! # Reservation Store
//!
//! Reservation lifecycle: create, renew, cancel, and the guest → user
//! cart merge.
//!
//! ## Create Is One Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reserve_stock(cart, key, qty)                                          │
//! │                                                                         │
//! │  1. validate qty            → InvalidQuantity                           │
//! │  2. ensure stock record     → NotFound (product/variant missing)        │
//! │  3. acquire key lock        → LockTimeout after bounded wait            │
//! │  4. BEGIN                                                               │
//! │     guarded ledger reserve  → InsufficientStock (nothing written)       │
//! │     insert reservation row                                              │
//! │     extend cart expiry      (cart lifetime covers its reservations)     │
//! │  5. COMMIT                                                              │
//! │                                                                         │
//! │  A failure after the ledger increment rolls the increment back - the   │
//! │  reservation row and the reserved_quantity move together or not at all.│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use soko_core::validation::validate_quantity;
use soko_core::{Reservation, ReservationStatus, StockKey};

// =============================================================================
// Request Types
// =============================================================================

/// Input for [`Engine::reserve_stock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub cart_id: String,
    /// Owning user; None for guest carts.
    pub user_id: Option<String>,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    /// Override for the configured TTL (rarely needed).
    pub ttl: Option<chrono::Duration>,
}

impl ReserveRequest {
    /// The stock key this request reserves against.
    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }
}

/// What to release in [`Engine::release_stock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReleaseTarget {
    /// Cancel a reservation (idempotent on terminal states).
    Reservation(String),
    /// Release a raw held quantity for a key.
    Quantity { key: StockKey, quantity: i64 },
}

// =============================================================================
// Engine Operations
// =============================================================================

impl Engine {
    /// Reserves stock for a cart and persists the reservation.
    ///
    /// ## Errors
    /// - `InvalidQuantity` - qty ≤ 0 or beyond the hard cap
    /// - `NotFound` - product/variant/cart missing
    /// - `InsufficientStock` - qty > available; the ledger is unchanged
    /// - `LockTimeout` - the key stayed contended past the bounded wait
    pub async fn reserve_stock(&self, req: ReserveRequest) -> EngineResult<Reservation> {
        validate_quantity(req.quantity).map_err(|_| EngineError::InvalidQuantity {
            requested: req.quantity,
        })?;

        let key = req.key();
        self.ensure_stock_record(&key).await?;

        let cart = self
            .db()
            .carts()
            .get(&req.cart_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Cart", &req.cart_id))?;
        if !cart.is_active {
            return Err(EngineError::invalid_state("Cart", &cart.id, "inactive"));
        }

        let _guard = self.locks().acquire(&key, self.config().lock_wait).await?;

        let now = Utc::now();
        let ttl = req.ttl.unwrap_or(self.config().reservation_ttl);
        let row = Reservation {
            id: Uuid::new_v4().to_string(),
            cart_id: req.cart_id.clone(),
            user_id: req.user_id.clone(),
            product_id: req.product_id.clone(),
            variant_id: req.variant_id.clone(),
            quantity: req.quantity,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at: now + ttl,
        };

        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;

        if !self
            .db()
            .stock()
            .reserve(&mut tx, &key, req.quantity, now)
            .await?
        {
            // Guard failed; report how much actually remains
            let available = self
                .db()
                .stock()
                .get_in(&mut tx, &key)
                .await?
                .map(|r| r.available_quantity())
                .unwrap_or(0);
            return Err(EngineError::InsufficientStock {
                key: key.to_string(),
                available,
                requested: req.quantity,
            });
        }

        self.db().reservations().insert(&mut tx, &row).await?;
        // A cart must outlive its reservations
        self.db()
            .carts()
            .extend_expiry(&mut tx, &req.cart_id, row.expires_at)
            .await?;

        tx.commit().await.map_err(soko_db::DbError::from)?;

        info!(
            reservation_id = %row.id,
            cart_id = %row.cart_id,
            key = %key,
            quantity = row.quantity,
            "Stock reserved"
        );
        Ok(row)
    }

    /// Releases held stock, by reservation or by raw key+quantity.
    pub async fn release_stock(&self, target: ReleaseTarget) -> EngineResult<()> {
        match target {
            ReleaseTarget::Reservation(id) => self.cancel_reservation(&id).await,
            ReleaseTarget::Quantity { key, quantity } => {
                self.release_quantity(&key, quantity).await
            }
        }
    }

    /// Cancels a reservation and returns its hold to availability.
    ///
    /// Idempotent: cancelling an already-terminal reservation is a no-op,
    /// not an error. Exactly one of {cancel, expire, commit} ever wins the
    /// status transition, so the ledger release cannot double-apply.
    pub async fn cancel_reservation(&self, reservation_id: &str) -> EngineResult<()> {
        let Some(reservation) = self.db().reservations().get(reservation_id).await? else {
            return Err(EngineError::not_found("Reservation", reservation_id));
        };

        if reservation.status.is_terminal() {
            debug!(id = %reservation_id, status = ?reservation.status, "Cancel on terminal reservation is a no-op");
            return Ok(());
        }

        let key = reservation.key();
        let _guard = self.locks().acquire(&key, self.config().lock_wait).await?;

        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;

        let won = self
            .db()
            .reservations()
            .transition(&mut tx, reservation_id, ReservationStatus::Cancelled)
            .await?;

        if won {
            self.db()
                .stock()
                .release(&mut tx, &key, reservation.quantity, Utc::now())
                .await?;
        }

        tx.commit().await.map_err(soko_db::DbError::from)?;

        if won {
            info!(id = %reservation_id, key = %key, quantity = reservation.quantity, "Reservation cancelled");
        }
        Ok(())
    }

    /// Extends an ACTIVE reservation's expiry (cart update/merge path).
    ///
    /// ## Errors
    /// - `NotFound` - no such reservation
    /// - `InvalidState` - the reservation is terminal
    pub async fn renew_reservation(
        &self,
        reservation_id: &str,
        ttl: Option<chrono::Duration>,
    ) -> EngineResult<Reservation> {
        let Some(reservation) = self.db().reservations().get(reservation_id).await? else {
            return Err(EngineError::not_found("Reservation", reservation_id));
        };

        if reservation.status.is_terminal() {
            return Err(EngineError::invalid_state(
                "Reservation",
                reservation_id,
                format!("{:?}", reservation.status).to_lowercase(),
            ));
        }

        let expires_at = Utc::now() + ttl.unwrap_or(self.config().reservation_ttl);

        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;

        if !self
            .db()
            .reservations()
            .renew(&mut tx, reservation_id, expires_at)
            .await?
        {
            // Raced to a terminal state between the read and the update
            return Err(EngineError::invalid_state(
                "Reservation",
                reservation_id,
                "terminal",
            ));
        }

        self.db()
            .carts()
            .extend_expiry(&mut tx, &reservation.cart_id, expires_at)
            .await?;

        tx.commit().await.map_err(soko_db::DbError::from)?;

        debug!(id = %reservation_id, %expires_at, "Reservation renewed");
        Ok(Reservation {
            expires_at,
            ..reservation
        })
    }

    /// Folds a guest cart into an authenticated user's cart.
    ///
    /// ## Atomicity
    /// All key locks are taken in sorted order, then everything happens in
    /// ONE transaction: destination reservations are created (or bumped)
    /// before the source reservations are cancelled, and the held quantity
    /// transfers without ever touching the ledger - so a failure at any
    /// point leaves stock neither double-reserved nor silently released.
    pub async fn merge_carts(&self, source_cart_id: &str, dest_cart_id: &str) -> EngineResult<()> {
        let source = self
            .db()
            .carts()
            .get(source_cart_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Cart", source_cart_id))?;
        let dest = self
            .db()
            .carts()
            .get(dest_cart_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Cart", dest_cart_id))?;

        if !dest.is_active {
            return Err(EngineError::invalid_state("Cart", dest_cart_id, "inactive"));
        }

        let source_items = self.db().carts().items(source_cart_id).await?;
        let source_reservations = self
            .db()
            .reservations()
            .list_active_for_cart(source_cart_id)
            .await?;
        let dest_items = self.db().carts().items(dest_cart_id).await?;

        let keys: Vec<StockKey> = source_items
            .iter()
            .map(|i| i.key())
            .chain(source_reservations.iter().map(|r| r.key()))
            .collect();
        for key in &keys {
            self.ensure_stock_record(key).await?;
        }
        let _guards = self
            .locks()
            .acquire_many(&keys, self.config().lock_wait)
            .await?;

        let now = Utc::now();
        let expires_at = now + self.config().reservation_ttl;
        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;

        // Move the holds: destination first, source cancelled after
        for src in &source_reservations {
            let key = src.key();
            let dest_existing = self
                .db()
                .reservations()
                .find_active_for_item(&mut tx, dest_cart_id, &key)
                .await?;

            match dest_existing {
                Some(existing) => {
                    self.db()
                        .reservations()
                        .add_quantity(&mut tx, &existing.id, src.quantity)
                        .await?;
                    self.db()
                        .reservations()
                        .renew(&mut tx, &existing.id, expires_at)
                        .await?;
                }
                None => {
                    self.db()
                        .reservations()
                        .insert(
                            &mut tx,
                            &Reservation {
                                id: Uuid::new_v4().to_string(),
                                cart_id: dest_cart_id.to_string(),
                                user_id: dest.user_id.clone(),
                                product_id: src.product_id.clone(),
                                variant_id: src.variant_id.clone(),
                                quantity: src.quantity,
                                status: ReservationStatus::Active,
                                created_at: now,
                                expires_at,
                            },
                        )
                        .await?;
                }
            }

            let cancelled = self
                .db()
                .reservations()
                .transition(&mut tx, &src.id, ReservationStatus::Cancelled)
                .await?;

            if !cancelled {
                // The sweeper expired the source (and released its hold)
                // between our scan and this transaction; the destination
                // row now needs a fresh ledger hold of its own.
                if !self
                    .db()
                    .stock()
                    .reserve(&mut tx, &key, src.quantity, now)
                    .await?
                {
                    let available = self
                        .db()
                        .stock()
                        .get_in(&mut tx, &key)
                        .await?
                        .map(|r| r.available_quantity())
                        .unwrap_or(0);
                    return Err(EngineError::InsufficientStock {
                        key: key.to_string(),
                        available,
                        requested: src.quantity,
                    });
                }
            }
        }

        // Fold the line items
        for src_item in &source_items {
            let dest_match = dest_items.iter().find(|d| d.key() == src_item.key());
            match dest_match {
                Some(dest_item) => {
                    self.db()
                        .carts()
                        .add_item_quantity(&mut tx, &dest_item.id, src_item.quantity)
                        .await?;
                }
                None => {
                    let mut moved = src_item.clone();
                    moved.id = Uuid::new_v4().to_string();
                    moved.cart_id = dest_cart_id.to_string();
                    self.db().carts().insert_item(&mut tx, &moved).await?;
                }
            }
        }

        self.db().carts().delete_items(&mut tx, source_cart_id).await?;
        self.db().carts().deactivate(&mut tx, source_cart_id).await?;
        self.db()
            .carts()
            .extend_expiry(&mut tx, dest_cart_id, expires_at)
            .await?;

        tx.commit().await.map_err(soko_db::DbError::from)?;

        info!(
            source = %source.id,
            dest = %dest.id,
            items = source_items.len(),
            reservations = source_reservations.len(),
            "Carts merged"
        );
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{add_item, seed_cart, seed_stock, test_engine};

    fn request(cart_id: &str, product_id: &str, quantity: i64) -> ReserveRequest {
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
    async fn test_reserve_then_fail_then_release_scenario() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p42", 10).await;
        seed_cart(&engine, "cart-a").await;
        seed_cart(&engine, "cart-b").await;

        // Reserve 4 for cart A → reserved=4, available=6
        let res_a = engine
            .reserve_stock(request("cart-a", "p42", 4))
            .await
            .unwrap();
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 4);
        assert_eq!(record.available_quantity(), 6);

        // Reserve 7 for cart B → fails (7 > 6), ledger unchanged
        let err = engine
            .reserve_stock(request("cart-b", "p42", 7))
            .await
            .unwrap_err();
        assert!(
            matches!(err, EngineError::InsufficientStock { available: 6, requested: 7, .. })
        );
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 4);

        // Release cart A's reservation → reserved=0, available=10
        engine.cancel_reservation(&res_a.id).await.unwrap();
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 0);
        assert_eq!(record.available_quantity(), 10);
    }

    #[tokio::test]
    async fn test_reserve_rejects_bad_quantities() {
        let engine = test_engine().await;
        seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;

        for qty in [0, -3, 1000] {
            let err = engine.reserve_stock(request("c1", "p1", qty)).await.unwrap_err();
            assert!(matches!(err, EngineError::InvalidQuantity { .. }));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserves_have_exactly_one_winner() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;
        seed_cart(&engine, "c2").await;

        // 6 + 7 > 10: exactly one may win, never both
        let e1 = engine.clone();
        let e2 = engine.clone();
        let t1 = tokio::spawn(async move { e1.reserve_stock(request("c1", "p1", 6)).await });
        let t2 = tokio::spawn(async move { e2.reserve_stock(request("c2", "p1", 7)).await });

        let r1 = t1.await.unwrap();
        let r2 = t2.await.unwrap();

        assert_eq!(r1.is_ok() as u8 + r2.is_ok() as u8, 1, "exactly one winner");
        let loser = if r1.is_err() { r1.unwrap_err() } else { r2.unwrap_err() };
        assert!(matches!(loser, EngineError::InsufficientStock { .. }));

        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert!(record.is_consistent());
        assert!(record.available_quantity() >= 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;

        let res = engine.reserve_stock(request("c1", "p1", 3)).await.unwrap();
        engine.cancel_reservation(&res.id).await.unwrap();
        // Second cancel: no-op, and no double release
        engine.cancel_reservation(&res.id).await.unwrap();

        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 0);
        assert_eq!(record.available_quantity(), 10);

        let stored = engine.db().reservations().get(&res.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_renew_extends_and_rejects_terminal() {
        let engine = test_engine().await;
        seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;

        let res = engine.reserve_stock(request("c1", "p1", 2)).await.unwrap();
        let renewed = engine
            .renew_reservation(&res.id, Some(chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert!(renewed.expires_at > res.expires_at);

        engine.cancel_reservation(&res.id).await.unwrap();
        let err = engine.renew_reservation(&res.id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_merge_transfers_holds_without_ledger_change() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "guest").await;
        seed_cart(&engine, "user").await;

        add_item(&engine, "guest", "p1", 4, 1000).await;
        let src_res = engine.reserve_stock(request("guest", "p1", 4)).await.unwrap();

        engine.merge_carts("guest", "user").await.unwrap();

        // Ledger hold transferred, not duplicated
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 4);

        // Source reservation cancelled, destination active
        let src = engine.db().reservations().get(&src_res.id).await.unwrap().unwrap();
        assert_eq!(src.status, ReservationStatus::Cancelled);
        let dest_active = engine
            .db()
            .reservations()
            .list_active_for_cart("user")
            .await
            .unwrap();
        assert_eq!(dest_active.len(), 1);
        assert_eq!(dest_active[0].quantity, 4);

        // Items moved, source cart deactivated
        assert_eq!(engine.db().carts().items("user").await.unwrap().len(), 1);
        assert!(engine.db().carts().items("guest").await.unwrap().is_empty());
        assert!(!engine.db().carts().get("guest").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_merge_folds_quantities_into_existing_lines() {
        let engine = test_engine().await;
        seed_stock(&engine, "p1", 20).await;
        seed_cart(&engine, "guest").await;
        seed_cart(&engine, "user").await;

        add_item(&engine, "guest", "p1", 2, 1000).await;
        add_item(&engine, "user", "p1", 3, 1000).await;
        engine.reserve_stock(request("guest", "p1", 2)).await.unwrap();
        engine.reserve_stock(request("user", "p1", 3)).await.unwrap();

        engine.merge_carts("guest", "user").await.unwrap();

        let items = engine.db().carts().items("user").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 5);

        let dest_active = engine
            .db()
            .reservations()
            .list_active_for_cart("user")
            .await
            .unwrap();
        assert_eq!(dest_active.len(), 1);
        assert_eq!(dest_active[0].quantity, 5);
    }
}
