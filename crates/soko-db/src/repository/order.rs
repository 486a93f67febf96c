//! # Order Repository
//!
//! Database operations for committed orders and their line items.
//!
//! ## Inventory State Is Compare-And-Set
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  External "order status changed" notifications are retried at-least-   │
//! │  once. The stock effect per order per direction must be exactly-once:  │
//! │                                                                         │
//! │    pending ──commit──► committed ──restore──► restored                  │
//! │                                                                         │
//! │  Each arrow is UPDATE ... WHERE inventory_state = ?from. A repeated    │
//! │  notification finds the state already advanced and becomes a no-op.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use soko_core::{InventoryState, Order, OrderItem};

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

const ORDER_COLUMNS: &str = "id, order_ref, cart_id, user_id, coupon_code, subtotal_cents, \
     discount_cents, total_cents, inventory_state, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, variant_id, quantity, unit_price_cents";

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order by its external reference (the idempotency key).
    pub async fn get_by_ref(&self, order_ref: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_ref = ?1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_ref)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    /// Same lookup inside an open transaction (duplicate-commit check).
    pub async fn get_by_ref_in(
        &self,
        conn: &mut SqliteConnection,
        order_ref: &str,
    ) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_ref = ?1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_ref)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(order)
    }

    /// Inserts an order row.
    pub async fn insert(&self, conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, order_ref = %order.order_ref, "Inserting order");

        sqlx::query(
            "INSERT INTO orders ( \
                id, order_ref, cart_id, user_id, coupon_code, subtotal_cents, \
                discount_cents, total_cents, inventory_state, created_at, updated_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&order.id)
        .bind(&order.order_ref)
        .bind(&order.cart_id)
        .bind(&order.user_id)
        .bind(&order.coupon_code)
        .bind(order.subtotal_cents)
        .bind(order.discount_cents)
        .bind(order.total_cents)
        .bind(order.inventory_state)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts an order line item snapshot.
    pub async fn insert_item(&self, conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO order_items ( \
                id, order_id, product_id, variant_id, quantity, unit_price_cents \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&item.id)
        .bind(&item.order_id)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Gets all line items for an order.
    pub async fn items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1");
        let items = sqlx::query_as::<_, OrderItem>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Compare-and-set on inventory_state.
    ///
    /// ## Returns
    /// `Ok(true)` when this caller performed the `from → to` transition.
    pub async fn transition_inventory_state(
        &self,
        conn: &mut SqliteConnection,
        order_ref: &str,
        from: InventoryState,
        to: InventoryState,
    ) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE orders SET inventory_state = ?3, updated_at = ?4 \
             WHERE order_ref = ?1 AND inventory_state = ?2",
        )
        .bind(order_ref)
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let won = result.rows_affected() > 0;
        debug!(order_ref = %order_ref, ?from, ?to, won, "Inventory state transition");
        Ok(won)
    }

    /// Sums historical non-cancelled purchase quantity of a product by one
    /// customer (per-customer purchase limit check).
    ///
    /// Restored orders were cancelled/returned, so they don't count.
    pub async fn purchased_quantity(&self, user_id: &str, product_id: &str) -> DbResult<i64> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(oi.quantity) FROM order_items oi \
             INNER JOIN orders o ON o.id = oi.order_id \
             WHERE o.user_id = ?1 AND oi.product_id = ?2 \
               AND o.inventory_state <> 'restored'",
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum.unwrap_or(0))
    }
}

/// Helper to generate a new order ID.
pub fn generate_order_id() -> String {
    Uuid::new_v4().to_string()
}

/// Helper to generate a new order item ID.
pub fn generate_order_item_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
