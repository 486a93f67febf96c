//! # Reservation Repository
//!
//! Database operations for stock reservations.
//!
//! ## Status Transitions Are Compare-And-Swap
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cancel, expire and commit can race for the same reservation.          │
//! │  Each transition is:                                                    │
//! │                                                                         │
//! │    UPDATE reservations SET status = ?new                                │
//! │    WHERE id = ? AND status = 'active'                                   │
//! │                                                                         │
//! │  rows_affected == 1  →  this caller won; apply the ledger effect        │
//! │  rows_affected == 0  →  someone else won; do NOT touch the ledger       │
//! │                                                                         │
//! │  Exactly one of {cancel, expire, commit} ever pairs its transition      │
//! │  with a ledger release.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use crate::variant_key;
use soko_core::{Reservation, ReservationStatus, StockKey};

/// Repository for reservation database operations.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str =
    "id, cart_id, user_id, product_id, variant_id, quantity, status, created_at, expires_at";

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// Gets a reservation by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Reservation>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM reservations WHERE id = ?1");
        let row = sqlx::query_as::<_, Reservation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    /// Inserts a reservation row (part of the create transaction).
    pub async fn insert(&self, conn: &mut SqliteConnection, row: &Reservation) -> DbResult<()> {
        debug!(id = %row.id, cart_id = %row.cart_id, qty = row.quantity, "Inserting reservation");

        sqlx::query(
            "INSERT INTO reservations ( \
                id, cart_id, user_id, product_id, variant_id, \
                quantity, status, created_at, expires_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&row.id)
        .bind(&row.cart_id)
        .bind(&row.user_id)
        .bind(&row.product_id)
        .bind(&row.variant_id)
        .bind(row.quantity)
        .bind(row.status)
        .bind(row.created_at)
        .bind(row.expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Compare-and-swap: ACTIVE → `to`.
    ///
    /// ## Returns
    /// * `Ok(true)` - this caller won the transition
    /// * `Ok(false)` - the reservation was not ACTIVE (someone else won,
    ///   or it never existed)
    pub async fn transition(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        to: ReservationStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = ?2 WHERE id = ?1 AND status = 'active'",
        )
        .bind(id)
        .bind(to)
        .execute(&mut *conn)
        .await?;

        let won = result.rows_affected() > 0;
        debug!(id = %id, to = ?to, won, "Reservation transition");
        Ok(won)
    }

    /// Extends the expiry of an ACTIVE reservation.
    ///
    /// ## Returns
    /// `Ok(true)` when the row was ACTIVE and renewed.
    pub async fn renew(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET expires_at = ?2 WHERE id = ?1 AND status = 'active'",
        )
        .bind(id)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Adds quantity to an ACTIVE reservation (cart merge fold).
    pub async fn add_quantity(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET quantity = quantity + ?2 \
             WHERE id = ?1 AND status = 'active'",
        )
        .bind(id)
        .bind(delta)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists all ACTIVE reservations for a cart.
    pub async fn list_active_for_cart(&self, cart_id: &str) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE cart_id = ?1 AND status = 'active' ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, Reservation>(&sql)
            .bind(cart_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Finds the cart's ACTIVE reservation for one stock key, if any.
    pub async fn find_active_for_item(
        &self,
        conn: &mut SqliteConnection,
        cart_id: &str,
        key: &StockKey,
    ) -> DbResult<Option<Reservation>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE cart_id = ?1 AND product_id = ?2 \
               AND COALESCE(variant_id, '') = ?3 AND status = 'active' \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, Reservation>(&sql)
            .bind(cart_id)
            .bind(&key.product_id)
            .bind(variant_key(&key.variant_id))
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row)
    }

    /// Sums the cart's own ACTIVE holds for one stock key.
    ///
    /// Validation uses this so a cart is not penalized for units it
    /// already holds itself.
    pub async fn active_quantity_for(&self, cart_id: &str, key: &StockKey) -> DbResult<i64> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(quantity) FROM reservations \
             WHERE cart_id = ?1 AND product_id = ?2 \
               AND COALESCE(variant_id, '') = ?3 AND status = 'active'",
        )
        .bind(cart_id)
        .bind(&key.product_id)
        .bind(variant_key(&key.variant_id))
        .fetch_one(&self.pool)
        .await?;

        Ok(sum.unwrap_or(0))
    }

    /// Lists ACTIVE reservations whose expiry has passed (sweeper scan).
    pub async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM reservations \
             WHERE status = 'active' AND expires_at < ?1 \
             ORDER BY expires_at LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, Reservation>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

/// Helper to generate a new reservation ID.
pub fn generate_reservation_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn seed(db: &Database) -> Reservation {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO products (id, sku, name, price_cents, created_at, updated_at) \
             VALUES ('p1', 'SKU-1', 'Product 1', 1000, ?1, ?1)",
        )
        .bind(now)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query("INSERT INTO carts (id, expires_at, created_at, updated_at) VALUES ('c1', ?1, ?1, ?1)")
            .bind(now)
            .execute(db.pool())
            .await
            .unwrap();

        let row = Reservation {
            id: generate_reservation_id(),
            cart_id: "c1".to_string(),
            user_id: None,
            product_id: "p1".to_string(),
            variant_id: None,
            quantity: 3,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at: now + chrono::Duration::minutes(30),
        };
        let mut conn = db.pool().acquire().await.unwrap();
        db.reservations().insert(&mut conn, &row).await.unwrap();
        row
    }

    #[tokio::test]
    async fn test_transition_is_single_winner() {
        let db = test_db().await;
        let row = seed(&db).await;
        let repo = db.reservations();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(repo
            .transition(&mut conn, &row.id, ReservationStatus::Cancelled)
            .await
            .unwrap());
        // Second transition out of a terminal state must lose
        assert!(!repo
            .transition(&mut conn, &row.id, ReservationStatus::Completed)
            .await
            .unwrap());
        drop(conn);

        let stored = repo.get(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_renew_only_touches_active() {
        let db = test_db().await;
        let row = seed(&db).await;
        let repo = db.reservations();
        let later = Utc::now() + chrono::Duration::hours(2);

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(repo.renew(&mut conn, &row.id, later).await.unwrap());

        repo.transition(&mut conn, &row.id, ReservationStatus::Expired)
            .await
            .unwrap();
        assert!(!repo.renew(&mut conn, &row.id, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_scan_picks_only_overdue_active() {
        let db = test_db().await;
        let row = seed(&db).await;
        let repo = db.reservations();

        // Nothing overdue yet
        assert!(repo.list_expired(Utc::now(), 100).await.unwrap().is_empty());

        // Push expiry into the past
        sqlx::query("UPDATE reservations SET expires_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - chrono::Duration::minutes(1))
            .bind(&row.id)
            .execute(db.pool())
            .await
            .unwrap();

        let overdue = repo.list_expired(Utc::now(), 100).await.unwrap();
        assert_eq!(overdue.len(), 1);

        // Terminal rows never show up in the scan
        let mut conn = db.pool().acquire().await.unwrap();
        repo.transition(&mut conn, &row.id, ReservationStatus::Expired)
            .await
            .unwrap();
        drop(conn);
        assert!(repo.list_expired(Utc::now(), 100).await.unwrap().is_empty());
    }
}
