//! Post cache refresh: pull new posts from the server into the local
//! store, then trim the store by age and size.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::session::Session;
use crate::storage::Database;

/// What one refresh pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Posts the server returned.
    pub fetched: usize,
    /// Posts written to the cache; malformed items are skipped.
    pub stored: usize,
    /// Entries dropped for exceeding the cache TTL.
    pub expired: u64,
    /// Entries dropped to respect the cache size cap.
    pub evicted: u64,
}

/// Fetch posts newer than the newest cached one, store them, and prune.
///
/// A fetch failure degrades to serving what is already cached. Only an
/// empty cache turns the failure into an error, because then there is
/// nothing to fall back to.
pub async fn refresh_posts(
    db: &Database,
    client: &ApiClient,
    session: &Session,
    max_cached: u64,
) -> Result<RefreshOutcome> {
    let mut outcome = RefreshOutcome::default();
    let last_id = db.latest_post_id().await?;

    if session.network_reachable() {
        match client.fetch_posts_since(session, last_id).await {
            Ok(posts) => {
                outcome.fetched = posts.len();
                outcome.stored = db.save_posts(&posts).await?;
                info!(
                    last_id,
                    fetched = outcome.fetched,
                    stored = outcome.stored,
                    "Refreshed post cache"
                );
            }
            Err(e) => {
                if db.cached_post_count().await? == 0 {
                    return Err(e).context("Post sync failed with an empty cache");
                }
                warn!(error = %e, "Post sync failed, serving cached posts");
            }
        }
    } else if db.cached_post_count().await? == 0 {
        anyhow::bail!("Offline with an empty post cache");
    } else {
        info!("Offline, serving cached posts");
    }

    outcome.expired = db.prune_expired().await?;
    outcome.evicted = db.prune_to_limit(max_cached).await?;
    Ok(outcome)
}
