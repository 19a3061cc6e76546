//! Element identifiers.
//!
//! Permanent identifiers are positive and handed out by an [`IdAllocator`]
//! at commit time. Temporary identifiers are negative and only meaningful
//! inside the transaction that issued them. `0` means "not yet assigned".

use std::sync::atomic::{AtomicI64, Ordering};

use crate::errors::BackendResult;

pub type VertexId = i64;
pub type RelationId = i64;
pub type TypeId = i64;

pub const UNASSIGNED: i64 = 0;

pub fn is_temporary(id: i64) -> bool {
    id < 0
}

pub fn is_permanent(id: i64) -> bool {
    id > 0
}

/// Source of permanent identifiers.
pub trait IdAllocator: Send + Sync {
    /// Returns a fresh permanent identifier.
    fn next_id(&self) -> BackendResult<i64>;

    /// Whether the vertex is owned by the system and may not be written to.
    fn is_unmodifiable(&self, _vertex: VertexId) -> bool {
        false
    }
}

/// Allocates permanent identifiers from a process-local counter.
#[derive(Debug)]
pub struct SequentialIdAllocator {
    next: AtomicI64,
}

impl SequentialIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first.max(1)),
        }
    }
}

impl Default for SequentialIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for SequentialIdAllocator {
    fn next_id(&self) -> BackendResult<i64> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Per-transaction pool of temporary identifiers.
#[derive(Debug)]
pub struct TemporaryIdPool {
    next: AtomicI64,
}

impl TemporaryIdPool {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(-1),
        }
    }

    pub fn next(&self) -> i64 {
        self.next.fetch_sub(1, Ordering::SeqCst)
    }
}

impl Default for TemporaryIdPool {
    fn default() -> Self {
        Self::new()
    }
}
