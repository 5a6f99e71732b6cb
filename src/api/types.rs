use serde::{Deserialize, Serialize};

/// One element of the `GET /bookmarks` response. The server wraps each
/// bookmarked post in an envelope; the sync engine only needs the ID.
#[derive(Debug, Deserialize)]
pub struct BookmarkEntry {
    pub post: PostRef,
}

#[derive(Debug, Deserialize)]
pub struct PostRef {
    pub id: i64,
}

/// Body of `POST /bookmarks`.
#[derive(Debug, Serialize)]
pub struct AddBookmark {
    pub post_id: i64,
}

/// Response of `GET /posts/sync?last_id=N`.
///
/// Posts stay as raw JSON documents: the cache stores them verbatim and
/// applies its own per-item validation, so one malformed post cannot
/// fail the whole batch decode.
#[derive(Debug, Deserialize)]
pub struct SyncBatch {
    pub posts: Vec<serde_json::Value>,
}
