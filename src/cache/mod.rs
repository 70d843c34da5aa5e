//! Named response cache partitions for offline support.
//!
//! Entries are keyed by request identity (method + URL). Each worker version
//! owns a static partition seeded at install time and a dynamic partition
//! filled from live traffic.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, PartitionNames, RequestKey};
