//! # Domain Types
//!
//! Core domain types for the inventory reservation engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   StockRecord   │   │   Reservation   │   │      Cart       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  stock_level    │◄──┤  quantity       │◄──┤  items          │       │
//! │  │  reserved_qty   │   │  status         │   │  expires_at     │       │
//! │  │  available()    │   │  expires_at     │   │  coupon_code    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Order       │   │     Coupon      │   │  Reference data │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  order_ref      │   │  usage_limit    │   │  Product        │       │
//! │  │  inventory_state│   │  window         │   │  Address        │       │
//! │  └─────────────────┘   └─────────────────┘   │  ShippingMethod │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business key where one exists: (product_id, variant_id) for stock,
//!   `order_ref` for orders, `code` for coupons

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Stock Key
// =============================================================================

/// The identity of one lockable, independently-tracked stock resource.
///
/// ## Ordering
/// `StockKey` is `Ord` so multi-key operations (checkout, merge) can
/// acquire locks in a deterministic order and never deadlock each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    /// Product UUID.
    pub product_id: String,

    /// Variant UUID, or `None` for the product's base stock.
    pub variant_id: Option<String>,
}

impl StockKey {
    /// Creates a key for a product without a variant.
    pub fn product(product_id: impl Into<String>) -> Self {
        StockKey {
            product_id: product_id.into(),
            variant_id: None,
        }
    }

    /// Creates a key for a specific (product, variant) pair.
    pub fn variant(product_id: impl Into<String>, variant_id: impl Into<String>) -> Self {
        StockKey {
            product_id: product_id.into(),
            variant_id: Some(variant_id.into()),
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant_id {
            Some(v) => write!(f, "{}:{}", self.product_id, v),
            None => write!(f, "{}", self.product_id),
        }
    }
}

// =============================================================================
// Stock Record
// =============================================================================

/// Stock availability status, recomputed on every ledger mutation.
///
/// `Discontinued` is a manual flag - the ledger operations never set or
/// clear it, only flip between `Active` and `OutOfStock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    /// Units are available for sale.
    Active,
    /// Available quantity has reached zero.
    OutOfStock,
    /// Manually withdrawn from sale (kept for history).
    Discontinued,
}

/// Per-(product, variant) stock ledger row.
///
/// ## Invariant
/// `0 ≤ reserved_quantity ≤ stock_level` under correct operation, and
/// `available_quantity = max(0, stock_level - reserved_quantity)`.
/// A reserved_quantity above stock_level is a consistency bug, never a
/// valid state - the reconciler reports it as an anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Product this row tracks.
    pub product_id: String,

    /// Variant this row tracks, or `None` for base product stock.
    pub variant_id: Option<String>,

    /// Total physical units owned, independent of reservations.
    pub stock_level: i64,

    /// Units temporarily held against in-progress carts.
    pub reserved_quantity: i64,

    /// Restock trigger point (informational).
    pub reorder_level: i64,

    /// Threshold below which availability is flagged as low.
    pub low_stock_threshold: i64,

    /// Derived availability status.
    pub status: StockStatus,

    /// When this row was last mutated.
    pub last_updated: DateTime<Utc>,
}

impl StockRecord {
    /// The lockable key identifying this row.
    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }

    /// Units a shopper may still add to a cart.
    #[inline]
    pub fn available_quantity(&self) -> i64 {
        (self.stock_level - self.reserved_quantity).max(0)
    }

    /// Whether availability has dropped below the low-stock threshold.
    pub fn is_low_stock(&self) -> bool {
        self.available_quantity() <= self.low_stock_threshold
    }

    /// Checks the ledger invariant. A `false` here is a consistency bug.
    pub fn is_consistent(&self) -> bool {
        self.reserved_quantity >= 0
            && self.stock_level >= 0
            && self.reserved_quantity <= self.stock_level
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// Lifecycle status of a reservation.
///
/// ## State Machine
/// ```text
/// ACTIVE ──► EXPIRED    (sweeper; stock auto-released)
///        ──► COMPLETED  (checkout commit)
///        ──► CANCELLED  (explicit release)
///
/// Terminal states never revert.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding stock for an in-progress cart.
    Active,
    /// TTL elapsed; stock returned by the sweeper.
    Expired,
    /// Converted into a permanent stock deduction at checkout.
    Completed,
    /// Explicitly released (item removed, cart merged, ...).
    Cancelled,
}

impl ReservationStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

/// A time-bounded hold of N units for one cart.
///
/// The row is owned by its cart (cascade-deleted with it), but the
/// stock-side effect (the reserved_quantity increment) is independent
/// state: deleting a reservation without releasing its hold is a
/// correctness bug, which is why every terminal transition goes through
/// the engine and pairs the status change with the ledger release.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Reservation {
    pub id: String,
    pub cart_id: String,
    /// Owning user, or `None` for a guest cart.
    pub user_id: Option<String>,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// The stock key this reservation holds units against.
    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }

    /// Whether the reservation's TTL has elapsed at `now`.
    ///
    /// This is a lazy check only - the sweeper is what actually moves
    /// overdue reservations to `Expired` and returns their stock.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at < now
    }
}

// =============================================================================
// Cart
// =============================================================================

/// A shopping cart owned by a user or a guest session (never both).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Cart {
    pub id: String,
    pub user_id: Option<String>,
    pub guest_id: Option<String>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub coupon_code: Option<String>,
    pub shipping_address_id: Option<String>,
    pub billing_address_id: Option<String>,
    pub same_as_shipping: bool,
    pub shipping_method_id: Option<String>,
    pub payment_method_code: Option<String>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Returns the cart total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item in a cart.
///
/// ## Snapshot Pattern
/// `unit_price_cents` is frozen at add time. A later mismatch against the
/// current catalog price is a validation *warning*, not an error, and the
/// validation engine silently repairs the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CartItem {
    pub id: String,
    pub cart_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    /// Unit price in cents at time of adding (frozen).
    pub unit_price_cents: i64,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    /// The stock key this line draws from.
    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }

    /// Line total before discounts (unit price × quantity).
    #[inline]
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity
    }
}

// =============================================================================
// Catalog Reference Data
// =============================================================================

/// A sellable product as seen by the engine.
///
/// Catalog CRUD lives elsewhere; the engine only reads the fields that
/// drive availability, purchase limits, and shipping weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub weight_grams: i64,
    pub requires_shipping: bool,
    pub is_active: bool,
    /// Legacy flat stock field; seeds the stock ledger on first reference.
    pub stock_quantity: Option<i64>,
    pub min_purchase_qty: i64,
    pub max_purchase_qty: i64,
    /// Per-customer cumulative purchase cap for limited products.
    pub customer_purchase_limit: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

/// A purchasable variant of a product (size, color, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub name: String,
    /// Price override in cents; falls back to the product price when None.
    pub price_cents: Option<i64>,
    pub is_active: bool,
}

/// Pairwise relationship between two products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The two products may not share a cart.
    Excludes,
    /// The related product must accompany this one in the cart.
    Requires,
}

/// One directed product relationship edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductRelation {
    pub product_id: String,
    pub related_product_id: String,
    pub relation: RelationKind,
}

/// A shipping or billing address snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Address {
    pub id: String,
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code (e.g., "KE").
    pub country: String,
    pub phone: String,
}

/// A shipping method, scoped to a delivery zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ShippingMethod {
    pub id: String,
    pub zone_id: String,
    pub name: String,
    pub is_active: bool,
    pub price_cents: i64,
    /// Minimum cart subtotal this method accepts.
    pub min_order_cents: i64,
    /// Maximum total cart weight this method carries.
    pub max_weight_grams: i64,
}

/// A payment method as seen by cart validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PaymentMethod {
    /// Stable business code (e.g., "mpesa", "card").
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub min_amount_cents: i64,
    /// Upper bound on the payable total; None means unbounded.
    pub max_amount_cents: Option<i64>,
    /// Mobile-money methods need a valid local phone number on file.
    pub requires_local_phone: bool,
}

// =============================================================================
// Coupons & Promotions
// =============================================================================

/// How a discount value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `value` is basis points off the subtotal (1500 = 15%).
    Percentage,
    /// `value` is a fixed amount in cents.
    Fixed,
}

/// A discount code with usage accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Coupon {
    pub code: String,
    pub discount_type: DiscountType,
    /// Basis points for Percentage, cents for Fixed.
    pub value: i64,
    pub min_order_cents: i64,
    /// Total redemptions allowed; None means unlimited.
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Each customer may redeem at most once.
    pub per_customer_once: bool,
}

impl Coupon {
    /// Discount this coupon grants on `subtotal`, capped at the subtotal.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        let raw = match self.discount_type {
            DiscountType::Percentage => subtotal.percentage_bps(self.value.max(0) as u32),
            DiscountType::Fixed => Money::from_cents(self.value.max(0)),
        };
        raw.min(subtotal)
    }

    /// Whether the validity window contains `now`.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.starts_at {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.ends_at {
            if now > end {
                return false;
            }
        }
        true
    }

    /// Whether the usage limit has been reached.
    pub fn limit_reached(&self) -> bool {
        matches!(self.usage_limit, Some(limit) if self.used_count >= limit)
    }
}

/// An automatic promotion discovered and applied during validation.
///
/// Promotions never produce validation errors - only discount effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Promotion {
    pub id: String,
    pub name: String,
    pub discount_type: DiscountType,
    pub value: i64,
    pub min_order_cents: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Promotion {
    /// Whether this promotion applies to a cart with the given subtotal.
    pub fn applies(&self, subtotal: Money, now: DateTime<Utc>) -> bool {
        if !self.is_active || subtotal.cents() < self.min_order_cents {
            return false;
        }
        if let Some(start) = self.starts_at {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.ends_at {
            if now > end {
                return false;
            }
        }
        true
    }

    /// Discount this promotion grants on `subtotal`, capped at the subtotal.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        let raw = match self.discount_type {
            DiscountType::Percentage => subtotal.percentage_bps(self.value.max(0) as u32),
            DiscountType::Fixed => Money::from_cents(self.value.max(0)),
        };
        raw.min(subtotal)
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Inventory adjustment state of an order.
///
/// ## Why an explicit enum?
/// Reduce/restore must be exactly-once per order per direction. The state
/// is a queryable column with compare-and-set transitions, so a repeated
/// "order status changed" notification can never double-apply stock
/// effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum InventoryState {
    /// No stock effect applied yet.
    Pending,
    /// Stock permanently deducted at checkout commit.
    Committed,
    /// Stock returned after cancellation or return.
    Restored,
}

/// A committed order, as far as the engine cares about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    /// External idempotency key (payment/order reference).
    pub order_ref: String,
    pub cart_id: Option<String>,
    pub user_id: Option<String>,
    pub coupon_code: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub inventory_state: InventoryState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line item snapshot on a committed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl OrderItem {
    /// The stock key this line was committed against.
    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
