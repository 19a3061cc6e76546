use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::errors::{Result, SeshatError};

/// Exclusive lock taken around a uniqueness check and the mutation it guards.
pub trait TransactionLock: Send + Sync {
    /// Blocks until the lock is held or `timeout` elapses.
    fn lock(&self, timeout: Duration) -> Result<()>;

    fn unlock(&self);

    /// Whether some thread currently holds the lock.
    fn in_use(&self) -> bool;
}

#[derive(Debug, Default)]
struct Holder {
    owner: Option<ThreadId>,
    holds: usize,
}

/// Reentrant lock owned by a thread, with a bounded wait.
#[derive(Debug)]
pub struct ReentrantTransactionLock {
    name: String,
    holder: Mutex<Holder>,
    released: Condvar,
}

impl ReentrantTransactionLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            holder: Mutex::new(Holder::default()),
            released: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TransactionLock for ReentrantTransactionLock {
    fn lock(&self, timeout: Duration) -> Result<()> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut holder = self.holder.lock();
        loop {
            match holder.owner {
                None => {
                    holder.owner = Some(me);
                    holder.holds = 1;
                    trace!("Acquired lock {}", self.name);
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    holder.holds += 1;
                    return Ok(());
                }
                Some(_) => {}
            }
            if self.released.wait_until(&mut holder, deadline).timed_out() && holder.owner.is_some() {
                return Err(SeshatError::LockTimeout {
                    tuple: self.name.clone(),
                    timeout,
                });
            }
        }
    }

    fn unlock(&self) {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        if holder.owner != Some(me) {
            trace!("Ignoring unlock of {} by a thread that does not hold it", self.name);
            return;
        }
        holder.holds -= 1;
        if holder.holds == 0 {
            holder.owner = None;
            trace!("Released lock {}", self.name);
            self.released.notify_one();
        }
    }

    fn in_use(&self) -> bool {
        self.holder.lock().owner.is_some()
    }
}

/// No-op lock for single-threaded transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeLock;

impl TransactionLock for FakeLock {
    fn lock(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn unlock(&self) {}

    fn in_use(&self) -> bool {
        false
    }
}

/// Two locks acquired and released as one unit. Locking the same
/// reentrant lock through both halves is fine.
pub struct CombinerLock {
    first: Arc<dyn TransactionLock>,
    second: Arc<dyn TransactionLock>,
}

impl CombinerLock {
    pub fn new(first: Arc<dyn TransactionLock>, second: Arc<dyn TransactionLock>) -> Self {
        Self { first, second }
    }
}

impl TransactionLock for CombinerLock {
    fn lock(&self, timeout: Duration) -> Result<()> {
        self.first.lock(timeout)?;
        if let Err(e) = self.second.lock(timeout) {
            self.first.unlock();
            return Err(e);
        }
        Ok(())
    }

    fn unlock(&self) {
        self.second.unlock();
        self.first.unlock();
    }

    fn in_use(&self) -> bool {
        self.first.in_use() || self.second.in_use()
    }
}

/// Held lock; released on drop.
#[must_use]
pub struct LockGuard {
    lock: Arc<dyn TransactionLock>,
}

impl LockGuard {
    pub fn acquire(lock: Arc<dyn TransactionLock>, timeout: Duration) -> Result<Self> {
        lock.lock(timeout)?;
        Ok(Self { lock })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
