//! # Stock Ledger Operations
//!
//! Availability checks, lazy record seeding, restock, and raw quantity
//! release. Reservation-paired mutations live in [`crate::reservations`]
//! and [`crate::checkout`]; this module owns the operations that stand on
//! their own.
//!
//! ## Lazy Seeding
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  A stock record is created on FIRST REFERENCE to a (product, variant): │
//! │                                                                         │
//! │  get(key)                                                               │
//! │    ├── row exists   → done                                              │
//! │    └── no row       → read product (legacy stock_quantity field)        │
//! │                       INSERT OR IGNORE seeded row                       │
//! │                       re-read (a racing seeder may have won - fine)     │
//! │                                                                         │
//! │  Records are never hard-deleted while the owning product exists.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use soko_core::validation::validate_quantity;
use soko_core::{StockKey, StockRecord, StockStatus};

/// Availability snapshot for one stock key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    /// Whether the requested quantity fits in available stock.
    pub available: bool,
    /// Units a shopper may still add to a cart.
    pub available_quantity: i64,
    /// Whether availability has dropped below the low-stock threshold.
    pub is_low_stock: bool,
    /// Current ledger status.
    pub status: StockStatus,
}

impl Engine {
    /// Gets the stock record for a key, creating it on first reference.
    ///
    /// Seeded from the product's legacy flat stock field. Fails with
    /// NotFound when the product (or stated variant) does not exist.
    pub(crate) async fn ensure_stock_record(&self, key: &StockKey) -> EngineResult<StockRecord> {
        if let Some(record) = self.db().stock().get(key).await? {
            return Ok(record);
        }

        let product = self
            .db()
            .catalog()
            .product(&key.product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Product", &key.product_id))?;

        if let Some(variant_id) = &key.variant_id {
            let variant = self
                .db()
                .catalog()
                .variant(variant_id)
                .await?
                .ok_or_else(|| EngineError::not_found("ProductVariant", variant_id))?;
            if variant.product_id != key.product_id {
                return Err(EngineError::not_found("ProductVariant", variant_id));
            }
        }

        let stock_level = product.stock_quantity.unwrap_or(0).max(0);
        debug!(key = %key, stock_level, "Seeding stock record from legacy stock field");

        self.db()
            .stock()
            .insert_ignore(&StockRecord {
                id: Uuid::new_v4().to_string(),
                product_id: key.product_id.clone(),
                variant_id: key.variant_id.clone(),
                stock_level,
                reserved_quantity: 0,
                reorder_level: 0,
                low_stock_threshold: 5,
                status: if stock_level > 0 {
                    StockStatus::Active
                } else {
                    StockStatus::OutOfStock
                },
                last_updated: Utc::now(),
            })
            .await?;

        // A racing creator may have inserted first; either way the row is
        // there now.
        self.db()
            .stock()
            .get(key)
            .await?
            .ok_or_else(|| EngineError::not_found("StockRecord", key.to_string()))
    }

    /// Checks whether `quantity` units of a key are available.
    ///
    /// Read-only aside from the lazy record seeding; safe to call from
    /// product pages at any rate.
    pub async fn check_availability(
        &self,
        key: &StockKey,
        quantity: i64,
    ) -> EngineResult<Availability> {
        let record = self.ensure_stock_record(key).await?;

        Ok(Availability {
            available: quantity > 0
                && record.status != StockStatus::Discontinued
                && quantity <= record.available_quantity(),
            available_quantity: record.available_quantity(),
            is_low_stock: record.is_low_stock(),
            status: record.status,
        })
    }

    /// Restocks `quantity` units (admin restock / supplier delivery).
    pub async fn restock(&self, key: &StockKey, quantity: i64) -> EngineResult<StockRecord> {
        validate_quantity(quantity).map_err(|_| EngineError::InvalidQuantity {
            requested: quantity,
        })?;
        self.ensure_stock_record(key).await?;

        let _guard = self.locks().acquire(key, self.config().lock_wait).await?;

        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;
        self.db()
            .stock()
            .increase(&mut tx, key, quantity, Utc::now())
            .await?;
        tx.commit().await.map_err(soko_db::DbError::from)?;

        let record = self
            .db()
            .stock()
            .get(key)
            .await?
            .ok_or_else(|| EngineError::not_found("StockRecord", key.to_string()))?;

        info!(key = %key, quantity, stock_level = record.stock_level, "Restocked");
        Ok(record)
    }

    /// Releases `quantity` reserved units by key, without a reservation.
    ///
    /// Escape hatch for callers that tracked a hold outside a reservation
    /// row. Over-release clamps at zero (and is logged by the repository).
    pub(crate) async fn release_quantity(&self, key: &StockKey, quantity: i64) -> EngineResult<()> {
        validate_quantity(quantity).map_err(|_| EngineError::InvalidQuantity {
            requested: quantity,
        })?;

        let _guard = self.locks().acquire(key, self.config().lock_wait).await?;

        let mut tx = self.db().pool().begin().await.map_err(soko_db::DbError::from)?;
        self.db()
            .stock()
            .release(&mut tx, key, quantity, Utc::now())
            .await?;
        tx.commit().await.map_err(soko_db::DbError::from)?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_product, seed_stock, test_engine};

    #[tokio::test]
    async fn test_lazy_seeding_from_legacy_stock() {
        let engine = test_engine().await;
        seed_product(&engine, "p1", 1000, 12).await;
        let key = StockKey::product("p1");

        // No ledger row yet
        assert!(engine.db().stock().get(&key).await.unwrap().is_none());

        let availability = engine.check_availability(&key, 5).await.unwrap();
        assert!(availability.available);
        assert_eq!(availability.available_quantity, 12);

        // Row now exists, seeded from the legacy field
        let record = engine.db().stock().get(&key).await.unwrap().unwrap();
        assert_eq!(record.stock_level, 12);
        assert_eq!(record.reserved_quantity, 0);
    }

    #[tokio::test]
    async fn test_check_availability_unknown_product() {
        let engine = test_engine().await;
        let err = engine
            .check_availability(&StockKey::product("ghost"), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_low_stock_flag() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 4).await;

        let availability = engine.check_availability(&key, 2).await.unwrap();
        assert!(availability.available);
        assert!(availability.is_low_stock); // 4 <= threshold 5
    }

    #[tokio::test]
    async fn test_restock_increases_level() {
        let engine = test_engine().await;
        let key = seed_stock(&engine, "p1", 3).await;

        let record = engine.restock(&key, 7).await.unwrap();
        assert_eq!(record.stock_level, 10);
        assert_eq!(record.status, StockStatus::Active);

        let err = engine.restock(&key, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity { .. }));
    }
}
