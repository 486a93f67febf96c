//! # soko-core: Pure Business Logic for the Soko Storefront Engine
//!
//! This crate is the **heart** of the inventory reservation engine. It
//! contains domain types and business rules as pure functions with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Soko Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Storefront collaborators (HTTP/CRUD)            │   │
//! │  │    catalog, addresses, payments, order-status events            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 soko-engine (locks, checkout, sweeper)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                ★ soko-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  report   │  │ validation│  │   │
//! │  │   │  Stock    │  │   Money   │  │  Finding  │  │   rules   │  │   │
//! │  │   │  Cart     │  │ Discounts │  │  Totals   │  │  formats  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (StockRecord, Reservation, Cart, Coupon, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Field validation error types
//! - [`report`] - Cart validation findings and totals
//! - [`validation`] - Pure field validators (quantity, address, formats)
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use soko_core::Money` instead of
// `use soko_core::money::Money`

pub use error::ValidationError;
pub use money::Money;
pub use report::{CartTotals, CouponReason, Finding, ValidationCode, ValidationReport};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default reservation lifetime in minutes.
///
/// A reservation created (or renewed) without an explicit TTL holds its
/// stock for this long before the sweeper releases it.
pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 30;

/// Maximum distinct line items allowed in a single cart.
///
/// ## Business Reason
/// Prevents runaway carts and ensures reasonable order sizes.
/// Configurable per deployment through the engine config.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single item in a cart.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;
