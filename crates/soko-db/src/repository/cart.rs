//! # Cart Repository
//!
//! Database operations for carts and their line items.
//!
//! The engine treats carts as request-owned state: no cross-request
//! locking applies to cart rows themselves (that discipline lives on the
//! stock ledger and on Reservation.status).

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use soko_core::{Cart, CartItem};

/// Repository for cart database operations.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

const CART_COLUMNS: &str = "id, user_id, guest_id, is_active, expires_at, coupon_code, \
     shipping_address_id, billing_address_id, same_as_shipping, \
     shipping_method_id, payment_method_code, subtotal_cents, tax_cents, \
     shipping_cents, discount_cents, total_cents, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, cart_id, product_id, variant_id, quantity, unit_price_cents, added_at";

impl CartRepository {
    /// Creates a new CartRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Gets a cart by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Cart>> {
        let sql = format!("SELECT {CART_COLUMNS} FROM carts WHERE id = ?1");
        let cart = sqlx::query_as::<_, Cart>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(cart)
    }

    /// Inserts a cart.
    pub async fn insert(&self, cart: &Cart) -> DbResult<()> {
        debug!(id = %cart.id, "Inserting cart");

        sqlx::query(
            "INSERT INTO carts ( \
                id, user_id, guest_id, is_active, expires_at, coupon_code, \
                shipping_address_id, billing_address_id, same_as_shipping, \
                shipping_method_id, payment_method_code, subtotal_cents, tax_cents, \
                shipping_cents, discount_cents, total_cents, created_at, updated_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        )
        .bind(&cart.id)
        .bind(&cart.user_id)
        .bind(&cart.guest_id)
        .bind(cart.is_active)
        .bind(cart.expires_at)
        .bind(&cart.coupon_code)
        .bind(&cart.shipping_address_id)
        .bind(&cart.billing_address_id)
        .bind(cart.same_as_shipping)
        .bind(&cart.shipping_method_id)
        .bind(&cart.payment_method_code)
        .bind(cart.subtotal_cents)
        .bind(cart.tax_cents)
        .bind(cart.shipping_cents)
        .bind(cart.discount_cents)
        .bind(cart.total_cents)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets all line items for a cart.
    pub async fn items(&self, cart_id: &str) -> DbResult<Vec<CartItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM cart_items WHERE cart_id = ?1 ORDER BY added_at"
        );
        let items = sqlx::query_as::<_, CartItem>(&sql)
            .bind(cart_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Inserts a line item.
    pub async fn insert_item(&self, conn: &mut SqliteConnection, item: &CartItem) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO cart_items ( \
                id, cart_id, product_id, variant_id, quantity, unit_price_cents, added_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&item.id)
        .bind(&item.cart_id)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.added_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Adds quantity to an existing line item (cart merge fold).
    pub async fn add_item_quantity(
        &self,
        conn: &mut SqliteConnection,
        item_id: &str,
        delta: i64,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE cart_items SET quantity = quantity + ?2 WHERE id = ?1")
            .bind(item_id)
            .bind(delta)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CartItem", item_id));
        }

        Ok(())
    }

    /// Repairs a stale price snapshot on a line item.
    ///
    /// The only cart mutation validation is allowed to make.
    pub async fn repair_item_price(&self, item_id: &str, price_cents: i64) -> DbResult<()> {
        debug!(item_id = %item_id, price_cents, "Repairing stale price snapshot");

        let result =
            sqlx::query("UPDATE cart_items SET unit_price_cents = ?2 WHERE id = ?1")
                .bind(item_id)
                .bind(price_cents)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CartItem", item_id));
        }

        Ok(())
    }

    /// Deletes all line items of a cart (merge source teardown).
    pub async fn delete_items(&self, conn: &mut SqliteConnection, cart_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = ?1")
            .bind(cart_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Marks a cart inactive (checkout commit, merge source, expiry).
    pub async fn deactivate(&self, conn: &mut SqliteConnection, cart_id: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query("UPDATE carts SET is_active = 0, updated_at = ?2 WHERE id = ?1")
            .bind(cart_id)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Pushes a cart's expiry forward, never backward.
    ///
    /// Reservation creation and renewal call this so the cart cannot
    /// expire while it still holds a live reservation.
    pub async fn extend_expiry(
        &self,
        conn: &mut SqliteConnection,
        cart_id: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE carts SET expires_at = ?2, updated_at = ?3 \
             WHERE id = ?1 AND expires_at < ?2",
        )
        .bind(cart_id)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Writes recomputed totals back to the cart row.
    pub async fn update_totals(
        &self,
        cart_id: &str,
        subtotal_cents: i64,
        shipping_cents: i64,
        discount_cents: i64,
        total_cents: i64,
    ) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE carts SET \
                subtotal_cents = ?2, shipping_cents = ?3, \
                discount_cents = ?4, total_cents = ?5, updated_at = ?6 \
             WHERE id = ?1",
        )
        .bind(cart_id)
        .bind(subtotal_cents)
        .bind(shipping_cents)
        .bind(discount_cents)
        .bind(total_cents)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Cart", cart_id));
        }

        Ok(())
    }

    /// Lists active carts whose expiry has passed (sweeper scan).
    pub async fn list_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Cart>> {
        let sql = format!(
            "SELECT {CART_COLUMNS} FROM carts \
             WHERE is_active = 1 AND expires_at < ?1 \
             ORDER BY expires_at LIMIT ?2"
        );
        let carts = sqlx::query_as::<_, Cart>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(carts)
    }
}

/// Helper to generate a new cart ID.
pub fn generate_cart_id() -> String {
    Uuid::new_v4().to_string()
}

/// Helper to generate a new cart item ID.
pub fn generate_cart_item_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
