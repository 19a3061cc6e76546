use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;

use crate::config::TransactionConfig;
use crate::ids::VertexId;
use crate::locking::lock::{CombinerLock, FakeLock, ReentrantTransactionLock, TransactionLock};
use crate::locking::tuple::{LockElement, LockKey, LockTuple};
use crate::schema::{Direction, Multiplicity, RelationType};

/// Per-transaction registry of uniqueness locks.
///
/// The lock map is created on first use so read-only and single-threaded
/// transactions never allocate it.
pub struct LockManager {
    enabled: bool,
    timeout: Duration,
    locks: OnceLock<DashMap<LockKey, Arc<ReentrantTransactionLock>>>,
}

impl LockManager {
    pub fn new(config: &TransactionConfig) -> Self {
        Self {
            enabled: config.acquire_locks && !config.single_threaded,
            timeout: config.lock_timeout(),
            locks: OnceLock::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_initialized(&self) -> bool {
        self.locks.get().is_some()
    }

    /// The lock for `key`; the same key always yields the same lock.
    pub fn get_lock(&self, key: impl Into<LockKey>) -> Arc<dyn TransactionLock> {
        if !self.enabled {
            return Arc::new(FakeLock);
        }
        let key = key.into();
        let name = key.to_string();
        let locks = self.locks.get_or_init(DashMap::new);
        let lock = locks
            .entry(key)
            .or_insert_with(|| Arc::new(ReentrantTransactionLock::new(name)))
            .clone();
        lock
    }

    pub fn combine(
        first: Arc<dyn TransactionLock>,
        second: Arc<dyn TransactionLock>,
    ) -> Arc<dyn TransactionLock> {
        Arc::new(CombinerLock::new(first, second))
    }

    /// Locks needed before adding a relation of `relation_type` between
    /// `out` and `counterpart`.
    ///
    /// SIMPLE locks `(out, type, counterpart)`. A type unique in a direction
    /// locks `(anchor, type, direction)` for each such direction.
    pub fn uniqueness_lock(
        &self,
        verify_uniqueness: bool,
        out: VertexId,
        relation_type: &RelationType,
        counterpart: LockElement,
    ) -> Arc<dyn TransactionLock> {
        let multiplicity = relation_type.multiplicity();
        if !verify_uniqueness || multiplicity == Multiplicity::Multi {
            return Arc::new(FakeLock);
        }
        let type_element = LockElement::Type(relation_type.id());
        if multiplicity == Multiplicity::Simple {
            return self.get_lock(LockTuple::new(vec![
                LockElement::Vertex(out),
                type_element,
                counterpart,
            ]));
        }
        let mut combined: Option<Arc<dyn TransactionLock>> = None;
        for dir in Direction::PROPER {
            if !multiplicity.is_unique(dir) {
                continue;
            }
            let anchor = match dir {
                Direction::Out => LockElement::Vertex(out),
                _ => counterpart.clone(),
            };
            let lock = self.get_lock(LockTuple::new(vec![
                anchor,
                type_element.clone(),
                LockElement::Direction(dir),
            ]));
            combined = Some(match combined {
                None => lock,
                Some(previous) => Self::combine(previous, lock),
            });
        }
        combined.unwrap_or_else(|| Arc::new(FakeLock))
    }

    pub fn clear(&self) {
        if let Some(locks) = self.locks.get() {
            locks.clear();
        }
    }
}
