//! Cache Module
//!
//! Cache keys, stored responses and the stores that hold them.

mod entry;
mod key;
mod registry;
mod response;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use key::{CacheKey, KeyBuilder, RequestIdentity};
pub use registry::{CacheRegistry, DEFAULT_CACHE};
pub use response::{forbids_storage, Buffered, CachedResponse};
pub use stats::{CacheStats, StatsRecorder};
pub use store::{CacheStore, MemoryStore};
