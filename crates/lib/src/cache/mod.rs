//! Build path state: the exclusive build lock and the step cache.

pub mod lock;
pub mod store;

pub use lock::{BuildLock, BuildLockError, LockMetadata};
pub use store::{BuildIdentity, CacheEntry, CacheError, CacheStore};
