//! Distributed overlap lock
//!
//! Keeps two invocations of the same workflow from running at once, while
//! letting that workflow's activities run side by side.

mod overlap;
mod store;

pub use overlap::{overlap_key, LockClass, LockGuard, OverlapLock, OverlapLockConfig};
pub use store::{InMemoryLockStore, LockError, LockStore, MutexToken};
