//! # Expiry Sweeper
//!
//! Background task that reclaims stale holds and audits the ledger.
//!
//! ## Why A Sweeper?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  A reservation holds real units. If the shopper walks away, nothing    │
//! │  else ever touches that cart again - lazy is_expired() checks alone    │
//! │  would leave the stock wrongly reserved indefinitely.                  │
//! │                                                                         │
//! │  Every tick (default 60s), independent of user traffic:                │
//! │                                                                         │
//! │  1. ACTIVE reservations with expires_at < now                          │
//! │        → CAS to EXPIRED, release the hold     (per-key lock held)      │
//! │  2. Active carts with expires_at < now                                 │
//! │        → expire their reservations, deactivate the cart                │
//! │        (cart expiry cascades to reservation expiry - the two TTLs      │
//! │         cannot drift apart silently)                                   │
//! │  3. Reconcile reserved_quantity against SUM(ACTIVE reservations)       │
//! │        → divergence is logged as a consistency violation               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::EngineResult;
use crate::Engine;
use soko_core::{Reservation, ReservationStatus};
use soko_db::repository::StockDivergence;

// =============================================================================
// Sweep Report
// =============================================================================

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Reservations moved ACTIVE → EXPIRED this cycle.
    pub expired_reservations: usize,
    /// Carts deactivated for passing their expiry.
    pub expired_carts: usize,
    /// Keys whose ledger disagrees with their ACTIVE reservation sum.
    pub divergences: Vec<StockDivergence>,
}

// =============================================================================
// Engine Operations
// =============================================================================

impl Engine {
    /// Runs one sweep cycle immediately.
    ///
    /// Also callable on demand (tests, admin endpoint); the background
    /// sweeper just invokes this on its ticker.
    pub async fn sweep_now(&self) -> EngineResult<SweepReport> {
        let now = Utc::now();
        let batch = self.config().sweep_batch;
        let mut report = SweepReport::default();

        // 1. Overdue reservations
        let overdue = self.db().reservations().list_expired(now, batch).await?;
        for reservation in &overdue {
            if self.expire_reservation(reservation).await? {
                report.expired_reservations += 1;
            }
        }

        // 2. Overdue carts cascade to their reservations
        let stale_carts = self.db().carts().list_expired_active(now, batch).await?;
        for cart in &stale_carts {
            let held = self
                .db()
                .reservations()
                .list_active_for_cart(&cart.id)
                .await?;
            for reservation in &held {
                if self.expire_reservation(reservation).await? {
                    report.expired_reservations += 1;
                }
            }

            let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;
            self.db().carts().deactivate(&mut tx, &cart.id).await?;
            tx.commit().await.map_err(soko_db::DbError::from)?;
            report.expired_carts += 1;
            debug!(cart_id = %cart.id, "Expired cart deactivated");
        }

        // 3. Reconciliation audit
        report.divergences = self.reconcile().await?;

        if report.expired_reservations > 0 || report.expired_carts > 0 {
            info!(
                expired_reservations = report.expired_reservations,
                expired_carts = report.expired_carts,
                "Sweep cycle reclaimed stale holds"
            );
        }
        Ok(report)
    }

    /// Compares the ledger's reserved_quantity against the sum of ACTIVE
    /// reservations for every key.
    ///
    /// Divergence means the invariant machinery has a hole; it is reported
    /// and logged at error level, never repaired silently.
    pub async fn reconcile(&self) -> EngineResult<Vec<StockDivergence>> {
        let divergences = self.db().stock().divergences().await?;

        for divergence in &divergences {
            error!(
                product_id = %divergence.product_id,
                variant_id = ?divergence.variant_id,
                ledger_reserved = divergence.ledger_reserved,
                active_reserved = divergence.active_reserved,
                "Stock consistency violation: ledger disagrees with reservations"
            );
        }

        Ok(divergences)
    }

    /// Expires one reservation, returning its hold to availability.
    ///
    /// Returns whether THIS call performed the transition (a concurrent
    /// cancel/commit may have won the CAS first).
    async fn expire_reservation(&self, reservation: &Reservation) -> EngineResult<bool> {
        let key = reservation.key();
        let _guard = self.locks().acquire(&key, self.config().lock_wait).await?;

        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;

        let won = self
            .db()
            .reservations()
            .transition(&mut tx, &reservation.id, ReservationStatus::Expired)
            .await?;

        if won {
            self.db()
                .stock()
                .release(&mut tx, &key, reservation.quantity, Utc::now())
                .await?;
        }

        tx.commit().await.map_err(soko_db::DbError::from)?;

        if won {
            debug!(
                reservation_id = %reservation.id,
                key = %key,
                quantity = reservation.quantity,
                "Reservation expired, stock released"
            );
        }
        Ok(won)
    }
}

// =============================================================================
// Background Sweeper
// =============================================================================

/// The periodic background sweeper.
///
/// ## Usage
/// ```rust,ignore
/// let handle = Sweeper::spawn(engine.clone());
/// // ... on shutdown:
/// handle.shutdown().await;
/// ```
pub struct Sweeper;

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweeper on the engine's configured interval.
    pub fn spawn(engine: Engine) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = engine.config().sweep_interval;

        info!(interval_secs = interval.as_secs(), "Starting expiry sweeper");
        let task = tokio::spawn(Self::run(engine, shutdown_rx));

        SweeperHandle { shutdown_tx, task }
    }

    async fn run(engine: Engine, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(engine.config().sweep_interval);
        // The immediate first tick catches holds that expired while the
        // process was down.
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match engine.sweep_now().await {
                        Ok(report) => {
                            if !report.divergences.is_empty() {
                                warn!(
                                    divergent_keys = report.divergences.len(),
                                    "Sweep found ledger divergences"
                                );
                            }
                        }
                        Err(err) => {
                            // A failed cycle is retried on the next tick;
                            // the sweeper itself never dies
                            error!(error = %err, "Sweep cycle failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Convenience: spawn straight off the engine.
impl Engine {
    /// Spawns the background expiry sweeper for this engine.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        Sweeper::spawn(self.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservations::ReserveRequest;
    use crate::testutil::{seed_cart, seed_stock, test_engine};

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

    async fn force_expire_reservation(engine: &Engine, id: &str) {
        sqlx::query("UPDATE reservations SET expires_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - chrono::Duration::minutes(1))
            .bind(id)
            .execute(engine.db().pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_and_releases_stock() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;

        let res = engine.reserve_stock(reserve("c1", "p1", 4)).await.unwrap();
        force_expire_reservation(&engine, &res.id).await;

        let report = engine.sweep_now().await.unwrap();
        assert_eq!(report.expired_reservations, 1);

        let stored = engine.db().reservations().get(&res.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Expired);

        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 0);
        assert_eq!(record.available_quantity(), 10);

        // A second sweep finds nothing to do
        let report = engine.sweep_now().await.unwrap();
        assert_eq!(report.expired_reservations, 0);
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_reservations_alone() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;

        let res = engine.reserve_stock(reserve("c1", "p1", 3)).await.unwrap();
        let report = engine.sweep_now().await.unwrap();

        assert_eq!(report.expired_reservations, 0);
        let stored = engine.db().reservations().get(&res.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Active);
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 3);
    }

    #[tokio::test]
    async fn test_cart_expiry_cascades_to_reservations() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;

        let res = engine.reserve_stock(reserve("c1", "p1", 5)).await.unwrap();

        // Push the CART past its expiry; the reservation itself is fresh
        sqlx::query("UPDATE carts SET expires_at = ?1 WHERE id = 'c1'")
            .bind(Utc::now() - chrono::Duration::minutes(1))
            .execute(engine.db().pool())
            .await
            .unwrap();

        let report = engine.sweep_now().await.unwrap();
        assert_eq!(report.expired_carts, 1);
        assert_eq!(report.expired_reservations, 1);

        assert!(!engine.db().carts().get("c1").await.unwrap().unwrap().is_active);
        let stored = engine.db().reservations().get(&res.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Expired);
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 0);
    }

    #[tokio::test]
    async fn test_reconcile_reports_divergence() {
        let engine = test_engine().await;
        seed_stock(&engine, "p1", 10).await;

        // Manufacture a divergence behind the engine's back
        sqlx::query("UPDATE stock_records SET reserved_quantity = 3")
            .execute(engine.db().pool())
            .await
            .unwrap();

        let divergences = engine.reconcile().await.unwrap();
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].ledger_reserved, 3);
        assert_eq!(divergences[0].active_reserved, 0);
    }

    #[tokio::test]
    async fn test_background_sweeper_runs_and_shuts_down() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("soko_engine=debug")
            .try_init();

        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 10).await;
        seed_cart(&engine, "c1").await;

        let res = engine.reserve_stock(reserve("c1", "p1", 2)).await.unwrap();
        force_expire_reservation(&engine, &res.id).await;

        // Interval's first tick fires immediately
        let handle = Sweeper::spawn(engine.clone());
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.shutdown().await;

        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity, 0);
    }
}
