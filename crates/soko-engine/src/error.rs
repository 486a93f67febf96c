//! # Engine Error Types
//!
//! The error taxonomy surfaced to callers of the engine.
//!
//! ## Propagation Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Cart validation rule failures  →  NEVER errors. Collected as data     │
//! │                                    in a ValidationReport so the        │
//! │                                    caller gets the full list at once.  │
//! │                                                                         │
//! │  Resource errors (lock timeout,  →  Abort the single operation and     │
//! │  storage failure)                   surface as a result-error; the     │
//! │                                     caller decides retry vs. user.     │
//! │                                                                         │
//! │  ConsistencyViolation            →  The invariant is ALREADY broken.   │
//! │                                     Halt and alert; never silently     │
//! │                                     recover.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use soko_core::ValidationError;
use soko_db::DbError;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Product/variant/reservation/cart/order cannot be found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Requested quantity exceeds what the key can hold for this caller.
    ///
    /// ## User Workflow
    /// ```text
    /// ReserveStock(qty: 7)
    ///      │
    ///      ▼
    /// Guarded UPDATE: available = 6
    ///      │
    ///      ▼
    /// InsufficientStock { key, available: 6, requested: 7 }
    ///      │
    ///      ▼
    /// UI shows: "Only 6 left in stock"
    /// ```
    #[error("Insufficient stock for {key}: available {available}, requested {requested}")]
    InsufficientStock {
        key: String,
        available: i64,
        requested: i64,
    },

    /// Quantity is zero, negative, or beyond the hard cap.
    #[error("Invalid quantity: {requested}")]
    InvalidQuantity { requested: i64 },

    /// The target is in a state that forbids the operation
    /// (e.g., committing a cancelled reservation).
    #[error("{entity} {id} is {state}, cannot perform operation")]
    InvalidState {
        entity: String,
        id: String,
        state: String,
    },

    /// Bounded wait for a key lock expired.
    ///
    /// HTTP-facing callers have their own request timeouts; blocking
    /// indefinitely would just move the failure somewhere less visible.
    #[error("Timed out waiting for stock lock on {key}")]
    LockTimeout { key: String },

    /// The ledger invariant has been observed broken.
    ///
    /// Always logged at error level and surfaced - never auto-recovered.
    #[error("Stock consistency violation on {key}: {detail}")]
    ConsistencyViolation { key: String, detail: String },

    /// Input shape validation failed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage failure.
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

impl EngineError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        EngineError::InvalidState {
            entity: entity.into(),
            id: id.into(),
            state: state.into(),
        }
    }
}

/// Convenience type alias for Results with EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================
