use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another instance of the application has locked the database
    #[error("Another instance of satchel appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StorageError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // Check for SQLite lock-related error messages
        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::InstanceLocked;
        }

        StorageError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A post held in the local article cache.
///
/// `document` is the full post object as received from the server, so
/// display fields this client does not model still survive a cache round
/// trip. The indexed columns (`created_at`, `cached_at`, `category_id`)
/// are denormalized out of the document at write time.
///
/// Timestamps are stored as SQLite datetime text (`YYYY-MM-DD HH:MM:SS`,
/// UTC) so they order lexicographically.
#[derive(Debug, Clone)]
pub struct CachedPost {
    pub id: i64,
    pub created_at: String,
    pub cached_at: String,
    pub category_id: Option<i64>,
    pub document: serde_json::Value,
}

impl CachedPost {
    /// Title pulled out of the stored document, if the server sent one.
    pub fn title(&self) -> Option<&str> {
        self.document.get("title").and_then(|v| v.as_str())
    }
}

/// Aggregate article-cache statistics
#[derive(Debug)]
pub struct CacheStats {
    pub total_posts: i64,
    pub oldest_entry: Option<String>,
    pub newest_entry: Option<String>,
}
