//! # soko-db: Database Layer for the Soko Engine
//!
//! All SQLite access for the inventory reservation engine lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  soko-engine (locks, validation, checkout, sweeper)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  soko-db (THIS CRATE)                                                   │
//! │  ├── pool        - SqlitePool + DbConfig (WAL, foreign keys)            │
//! │  ├── migrations  - embedded schema migrations                           │
//! │  ├── error       - DbError with constraint categorization              │
//! │  └── repository  - one repository per aggregate                         │
//! │       ├── stock        guarded ledger mutations                        │
//! │       ├── reservation  CAS status transitions                          │
//! │       ├── cart         carts + line items                              │
//! │       ├── order        orders + inventory_state CAS                    │
//! │       ├── coupon       exactly-once redemption accounting              │
//! │       └── catalog      read-side reference data                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL mode, foreign keys, CHECK constraints)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Discipline
//! Mutating repository methods take `&mut SqliteConnection` so the engine
//! can compose several mutations (ledger + reservation row, or a whole
//! checkout) into ONE transaction. Read methods run against the pool.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

/// Binds an optional variant id the way the key indexes expect.
///
/// The stock/reservation key indexes are built on
/// `COALESCE(variant_id, '')`, so lookups bind the empty string for the
/// base-product case.
pub(crate) fn variant_key(variant_id: &Option<String>) -> String {
    variant_id.clone().unwrap_or_default()
}
