//! # Key Lock Registry
//!
//! Per-(product, variant) mutual exclusion for stock mutations.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       KeyLockRegistry                                   │
//! │                                                                         │
//! │  table: Mutex<HashMap<StockKey, LockSlot>>                              │
//! │                                                                         │
//! │  acquire("p42")                                                         │
//! │       │                                                                 │
//! │       ├── slot exists? bump refcount, clone Arc<tokio::Mutex>           │
//! │       ├── no slot? insert one on demand                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  timeout(lock_wait, mutex.lock_owned())                                 │
//! │       │                                                                 │
//! │       ├── acquired  → KeyGuard (releases + unrefs on drop)              │
//! │       └── timed out → unref, EngineError::LockTimeout                   │
//! │                                                                         │
//! │  Refcount hits zero → slot removed. The table only ever holds keys     │
//! │  with a live holder or waiter, so it cannot grow with the catalog.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scope
//! This registry serializes mutators *within one process*. Correctness
//! across processes does not rest on it: every ledger mutation in soko-db
//! is a guarded conditional UPDATE, so two instances racing past each
//! other still cannot both pass the availability check. The lock's job is
//! ordering and fairness, not last-line safety.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use soko_core::StockKey;

/// One entry in the lock table.
struct LockSlot {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters. Entry is evicted when this reaches zero.
    refs: usize,
}

/// Reference-counted registry of per-key async locks.
///
/// Created once per engine and shared via `Arc`.
pub struct KeyLockRegistry {
    table: Mutex<HashMap<StockKey, LockSlot>>,
}

impl KeyLockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(KeyLockRegistry {
            table: Mutex::new(HashMap::new()),
        })
    }

    /// Acquires the lock for one key, waiting at most `wait`.
    ///
    /// Waiters are served in FIFO-or-better order by the underlying tokio
    /// mutex. On timeout the reference taken for this caller is dropped
    /// so the slot cannot leak.
    pub async fn acquire(
        self: &Arc<Self>,
        key: &StockKey,
        wait: Duration,
    ) -> EngineResult<KeyGuard> {
        let lock = {
            let mut table = self.table.lock().expect("lock table poisoned");
            let slot = table.entry(key.clone()).or_insert_with(|| LockSlot {
                lock: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            slot.refs += 1;
            Arc::clone(&slot.lock)
        };

        match timeout(wait, lock.lock_owned()).await {
            Ok(permit) => {
                debug!(key = %key, "Key lock acquired");
                Ok(KeyGuard {
                    registry: Arc::clone(self),
                    key: key.clone(),
                    permit: Some(permit),
                })
            }
            Err(_) => {
                self.unref(key);
                warn!(key = %key, wait_ms = wait.as_millis() as u64, "Key lock wait timed out");
                Err(EngineError::LockTimeout {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Acquires locks for several keys in deterministic (sorted) order.
    ///
    /// Sorting is what prevents two concurrent multi-item commits from
    /// deadlocking each other: both always walk the keys the same way.
    /// Duplicate keys are collapsed first.
    pub async fn acquire_many(
        self: &Arc<Self>,
        keys: &[StockKey],
        wait: Duration,
    ) -> EngineResult<Vec<KeyGuard>> {
        let mut sorted: Vec<StockKey> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            // Guards acquired so far drop (and release) on the error path
            guards.push(self.acquire(key, wait).await?);
        }

        Ok(guards)
    }

    /// Number of keys currently tracked (holders or waiters).
    pub fn len(&self) -> usize {
        self.table.lock().expect("lock table poisoned").len()
    }

    /// True when no key is held or waited on.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unref(&self, key: &StockKey) {
        let mut table = self.table.lock().expect("lock table poisoned");
        if let Some(slot) = table.get_mut(key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                table.remove(key);
            }
        }
    }
}

impl std::fmt::Debug for KeyLockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLockRegistry")
            .field("keys", &self.len())
            .finish()
    }
}

/// Holds one key's lock; releasing is dropping.
///
/// The permit drops before the refcount, so a slot is only evicted once
/// nobody holds or waits on it.
pub struct KeyGuard {
    registry: Arc<KeyLockRegistry>,
    key: StockKey,
    permit: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    /// The key this guard serializes.
    pub fn key(&self) -> &StockKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.permit.take();
        self.registry.unref(&self.key);
        debug!(key = %self.key, "Key lock released");
    }
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
