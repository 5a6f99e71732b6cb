mod posts;
mod schema;
mod state;
mod types;

pub use posts::CACHE_TTL_HOURS;
pub use schema::Database;
pub use types::{CacheStats, CachedPost, StorageError};
