//! # Repository Layer
//!
//! One repository per aggregate. Each repository owns the SQL for its
//! tables and nothing else.
//!
//! ## Transaction Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Read methods          →  run against the pool (&self.pool)            │
//! │  Mutating methods      →  take &mut SqliteConnection                   │
//! │                                                                         │
//! │  Why? The engine composes mutations across repositories into ONE       │
//! │  transaction:                                                           │
//! │                                                                         │
//! │    let mut tx = db.pool().begin().await?;                               │
//! │    stock.reserve(&mut tx, &key, qty).await?;                            │
//! │    reservations.insert(&mut tx, &row).await?;                           │
//! │    tx.commit().await?;     // both or neither                           │
//! │                                                                         │
//! │  Dropping the transaction without commit rolls everything back.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod order;
pub mod reservation;
pub mod stock;

pub use cart::CartRepository;
pub use catalog::CatalogRepository;
pub use coupon::CouponRepository;
pub use order::OrderRepository;
pub use reservation::ReservationRepository;
pub use stock::{StockDivergence, StockRepository};
