//! In-process uniqueness locks of a transaction.

pub mod lock;
pub mod manager;
pub mod tuple;

pub use lock::{CombinerLock, FakeLock, LockGuard, ReentrantTransactionLock, TransactionLock};
pub use manager::LockManager;
pub use tuple::{IndexLockTuple, LockElement, LockKey, LockTuple};
