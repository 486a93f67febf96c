//! # Stock Ledger Repository
//!
//! Database operations for per-(product, variant) stock records.
//!
//! ## Guarded Mutation Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Why guarded UPDATEs?                                 │
//! │                                                                         │
//! │  ❌ WRONG: read-check-write (races between instances)                   │
//! │     SELECT available FROM stock_records ...                             │
//! │     if available >= qty { UPDATE ... SET reserved = reserved + qty }    │
//! │                                                                         │
//! │  ✅ CORRECT: the check IS the write                                     │
//! │     UPDATE stock_records                                                │
//! │     SET reserved_quantity = reserved_quantity + ?                       │
//! │     WHERE ... AND stock_level - reserved_quantity >= ?                  │
//! │                                                                         │
//! │  rows_affected == 0  →  insufficient stock (or missing row)             │
//! │                                                                         │
//! │  Two processes can both reach this statement; SQLite serializes the    │
//! │  writes, so at most one passes the guard. The in-process key lock      │
//! │  orders callers, the guard makes the outcome correct regardless.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutator recomputes `status` in the same statement:
//! `out_of_stock` when available ≤ 0, else `active`. The manual
//! `discontinued` flag is never touched by ledger operations.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::variant_key;
use soko_core::{StockKey, StockRecord};

/// A key whose ledger `reserved_quantity` disagrees with the sum of its
/// ACTIVE reservations. Divergence is a monitored anomaly, never repaired
/// silently.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct StockDivergence {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub ledger_reserved: i64,
    pub active_reserved: i64,
}

/// Repository for stock ledger database operations.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "id, product_id, variant_id, stock_level, reserved_quantity, \
     reorder_level, low_stock_threshold, status, last_updated";

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Gets the stock record for a key.
    pub async fn get(&self, key: &StockKey) -> DbResult<Option<StockRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM stock_records \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2"
        );
        let record = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(&key.product_id)
            .bind(variant_key(&key.variant_id))
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Gets the stock record for a key inside an open transaction.
    pub async fn get_in(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
    ) -> DbResult<Option<StockRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM stock_records \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2"
        );
        let record = sqlx::query_as::<_, StockRecord>(&sql)
            .bind(&key.product_id)
            .bind(variant_key(&key.variant_id))
            .fetch_optional(&mut *conn)
            .await?;

        Ok(record)
    }

    /// Inserts a stock record, ignoring a concurrent insert of the same key.
    ///
    /// Used for lazy creation on first reference: two racing creators both
    /// succeed, one row wins, both re-read it afterwards.
    pub async fn insert_ignore(&self, record: &StockRecord) -> DbResult<()> {
        debug!(key = %record.key(), stock = record.stock_level, "Seeding stock record");

        sqlx::query(
            "INSERT OR IGNORE INTO stock_records ( \
                id, product_id, variant_id, stock_level, reserved_quantity, \
                reorder_level, low_stock_threshold, status, last_updated \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&record.id)
        .bind(&record.product_id)
        .bind(&record.variant_id)
        .bind(record.stock_level)
        .bind(record.reserved_quantity)
        .bind(record.reorder_level)
        .bind(record.low_stock_threshold)
        .bind(record.status)
        .bind(record.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reserves `qty` units: increments reserved_quantity iff the key has
    /// that many available.
    ///
    /// ## Returns
    /// * `Ok(true)` - reserved
    /// * `Ok(false)` - guard failed: not enough available (or no such row)
    pub async fn reserve(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE stock_records SET \
                reserved_quantity = reserved_quantity + ?3, \
                status = CASE \
                    WHEN status = 'discontinued' THEN status \
                    WHEN stock_level - (reserved_quantity + ?3) <= 0 THEN 'out_of_stock' \
                    ELSE 'active' \
                END, \
                last_updated = ?4 \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2 \
               AND stock_level - reserved_quantity >= ?3",
        )
        .bind(&key.product_id)
        .bind(variant_key(&key.variant_id))
        .bind(qty)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let reserved = result.rows_affected() > 0;
        debug!(key = %key, qty, reserved, "Ledger reserve");
        Ok(reserved)
    }

    /// Releases `qty` reserved units, clamping at zero.
    ///
    /// Over-release never errors (defensive clamp) but indicates an
    /// upstream bug, so it is logged loudly.
    pub async fn release(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let current: Option<i64> = sqlx::query_scalar(
            "SELECT reserved_quantity FROM stock_records \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2",
        )
        .bind(&key.product_id)
        .bind(variant_key(&key.variant_id))
        .fetch_optional(&mut *conn)
        .await?;

        let Some(reserved) = current else {
            return Err(DbError::not_found("StockRecord", key.to_string()));
        };

        if qty > reserved {
            warn!(
                key = %key,
                qty,
                reserved,
                "Over-release clamped to zero; upstream release accounting is off"
            );
        }

        sqlx::query(
            "UPDATE stock_records SET \
                reserved_quantity = MAX(0, reserved_quantity - ?3), \
                status = CASE \
                    WHEN status = 'discontinued' THEN status \
                    WHEN stock_level - MAX(0, reserved_quantity - ?3) <= 0 THEN 'out_of_stock' \
                    ELSE 'active' \
                END, \
                last_updated = ?4 \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2",
        )
        .bind(&key.product_id)
        .bind(variant_key(&key.variant_id))
        .bind(qty)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(key = %key, qty, "Ledger release");
        Ok(())
    }

    /// Permanently deducts `qty` units from stock_level.
    ///
    /// Does NOT touch reserved_quantity - the checkout coordinator pairs
    /// every reduce with a matching release to keep the ledger invariant.
    ///
    /// ## Returns
    /// * `Ok(true)` - deducted
    /// * `Ok(false)` - guard failed: stock_level < qty
    pub async fn reduce(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE stock_records SET \
                stock_level = stock_level - ?3, \
                status = CASE \
                    WHEN status = 'discontinued' THEN status \
                    WHEN (stock_level - ?3) - reserved_quantity <= 0 THEN 'out_of_stock' \
                    ELSE 'active' \
                END, \
                last_updated = ?4 \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2 \
               AND stock_level >= ?3",
        )
        .bind(&key.product_id)
        .bind(variant_key(&key.variant_id))
        .bind(qty)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let reduced = result.rows_affected() > 0;
        debug!(key = %key, qty, reduced, "Ledger reduce");
        Ok(reduced)
    }

    /// Permanently deducts `qty` units, guarded by AVAILABLE quantity.
    ///
    /// Used for ad-hoc (reservation-less) checkout lines: the deduction
    /// may not consume units held by other carts' reservations.
    pub async fn reduce_available(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE stock_records SET \
                stock_level = stock_level - ?3, \
                status = CASE \
                    WHEN status = 'discontinued' THEN status \
                    WHEN (stock_level - ?3) - reserved_quantity <= 0 THEN 'out_of_stock' \
                    ELSE 'active' \
                END, \
                last_updated = ?4 \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2 \
               AND stock_level - reserved_quantity >= ?3",
        )
        .bind(&key.product_id)
        .bind(variant_key(&key.variant_id))
        .bind(qty)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let reduced = result.rows_affected() > 0;
        debug!(key = %key, qty, reduced, "Ledger reduce (available-guarded)");
        Ok(reduced)
    }

    /// Restocks `qty` units.
    pub async fn increase(
        &self,
        conn: &mut SqliteConnection,
        key: &StockKey,
        qty: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE stock_records SET \
                stock_level = stock_level + ?3, \
                status = CASE \
                    WHEN status = 'discontinued' THEN status \
                    WHEN (stock_level + ?3) - reserved_quantity <= 0 THEN 'out_of_stock' \
                    ELSE 'active' \
                END, \
                last_updated = ?4 \
             WHERE product_id = ?1 AND COALESCE(variant_id, '') = ?2",
        )
        .bind(&key.product_id)
        .bind(variant_key(&key.variant_id))
        .bind(qty)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("StockRecord", key.to_string()));
        }

        debug!(key = %key, qty, "Ledger increase");
        Ok(())
    }

    /// Finds every key whose ledger reserved_quantity disagrees with the
    /// sum of its ACTIVE reservations.
    ///
    /// The two representations are redundant by design; divergence means
    /// the invariant machinery has a hole and is surfaced as an anomaly.
    pub async fn divergences(&self) -> DbResult<Vec<StockDivergence>> {
        let rows = sqlx::query_as::<_, StockDivergence>(
            "SELECT * FROM ( \
                SELECT s.product_id AS product_id, \
                       s.variant_id AS variant_id, \
                       s.reserved_quantity AS ledger_reserved, \
                       COALESCE((SELECT SUM(r.quantity) FROM reservations r \
                                 WHERE r.product_id = s.product_id \
                                   AND COALESCE(r.variant_id, '') = COALESCE(s.variant_id, '') \
                                   AND r.status = 'active'), 0) AS active_reserved \
                FROM stock_records s \
             ) WHERE ledger_reserved <> active_reserved",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Helper to generate a new stock record ID.
pub fn generate_stock_record_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
