//! # Coupon Repository
//!
//! Database operations for coupons and their redemption accounting.
//!
//! ## Exactly-Once Usage Counting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  used_count may move at most once per order, no matter how many times  │
//! │  the commit is retried:                                                 │
//! │                                                                         │
//! │  1. INSERT OR IGNORE INTO coupon_redemptions (order_id, ...)           │
//! │  2. rows_affected == 1?  →  first time: UPDATE used_count + 1          │
//! │     rows_affected == 0?  →  retry: counter untouched                    │
//! │                                                                         │
//! │  The membership row IS the idempotency key (order_id is its PK).       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use soko_core::Coupon;

/// Repository for coupon database operations.
#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "code, discount_type, value, min_order_cents, usage_limit, \
     used_count, starts_at, ends_at, is_active, per_customer_once";

impl CouponRepository {
    /// Creates a new CouponRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Gets a coupon by code.
    pub async fn get(&self, code: &str) -> DbResult<Option<Coupon>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM coupons WHERE code = ?1");
        let coupon = sqlx::query_as::<_, Coupon>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(coupon)
    }

    /// Inserts a coupon (seeding/collaborator surface).
    pub async fn insert(&self, coupon: &Coupon) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO coupons ( \
                code, discount_type, value, min_order_cents, usage_limit, \
                used_count, starts_at, ends_at, is_active, per_customer_once \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&coupon.code)
        .bind(coupon.discount_type)
        .bind(coupon.value)
        .bind(coupon.min_order_cents)
        .bind(coupon.usage_limit)
        .bind(coupon.used_count)
        .bind(coupon.starts_at)
        .bind(coupon.ends_at)
        .bind(coupon.is_active)
        .bind(coupon.per_customer_once)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Restricts a coupon to a product (seeding/collaborator surface).
    pub async fn restrict_to_product(&self, code: &str, product_id: &str) -> DbResult<()> {
        sqlx::query("INSERT OR IGNORE INTO coupon_products (code, product_id) VALUES (?1, ?2)")
            .bind(code)
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Lists the product ids a coupon is restricted to (empty = unrestricted).
    pub async fn restricted_products(&self, code: &str) -> DbResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT product_id FROM coupon_products WHERE code = ?1")
                .bind(code)
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }

    /// Records a redemption for an order and bumps used_count - exactly
    /// once per order id.
    ///
    /// ## Returns
    /// * `Ok(true)` - first redemption for this order; counter moved
    /// * `Ok(false)` - this order already redeemed; counter untouched
    pub async fn redeem(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
        order_id: &str,
        user_id: Option<&str>,
    ) -> DbResult<bool> {
        let now = Utc::now();

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO coupon_redemptions (order_id, coupon_code, user_id, redeemed_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(order_id)
        .bind(code)
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            sqlx::query("UPDATE coupons SET used_count = used_count + 1 WHERE code = ?1")
                .bind(code)
                .execute(&mut *conn)
                .await?;
        }

        debug!(code = %code, order_id = %order_id, counted = inserted, "Coupon redemption");
        Ok(inserted)
    }

    /// Whether a customer has ever redeemed a coupon (per-customer-once).
    pub async fn redeemed_by(&self, code: &str, user_id: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupon_redemptions WHERE coupon_code = ?1 AND user_id = ?2",
        )
        .bind(code)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
