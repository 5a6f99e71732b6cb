//! Server reconciliation: queue drain and snapshot adoption.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::queue::PendingOp;
use super::{BookmarkManager, BookmarkState};
use crate::api::ApiError;

impl BookmarkManager {
    /// Reconcile with the server: deliver queued operations first, then
    /// adopt the server's snapshot with undrained edits overlaid. Call
    /// on login and whenever connectivity returns.
    ///
    /// Without a session token this is a no-op; anonymous sessions have
    /// no server-side bookmarks to reconcile against.
    pub async fn refresh_from_server(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            debug!("Skipping bookmark refresh without a session token");
            return Ok(());
        }
        let mut state = self.state.lock().await;
        self.reconcile(&mut state).await
    }

    /// Deliver queued operations without fetching a snapshot.
    pub async fn drain_pending(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.drain_queued(&mut state).await
    }

    /// Adopt the server's snapshot without draining first. Queued edits
    /// still overlay the result.
    pub async fn fetch_and_replace(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.adopt_server_snapshot(&mut state).await
    }

    pub(super) async fn reconcile(&self, state: &mut BookmarkState) -> Result<()> {
        self.drain_queued(state).await?;
        self.adopt_server_snapshot(state).await
    }

    /// Best-effort delivery of every queued entry, adds before removes,
    /// each side in recording order. Entries that fail stay queued for
    /// the next drain; one failure never blocks the rest.
    async fn drain_queued(&self, state: &mut BookmarkState) -> Result<()> {
        if !self.session.is_authenticated() || !self.session.network_reachable() {
            return Ok(());
        }
        if state.pending.is_empty() {
            return Ok(());
        }

        let mut delivered = 0usize;
        let mut kept = 0usize;

        for id in state.pending.adds() {
            match self.client.add_bookmark(&self.session, id).await {
                // 409: the server already has it, which is the target state.
                Ok(()) | Err(ApiError::HttpStatus(409)) => {
                    state.pending.confirm(PendingOp::Add(id));
                    delivered += 1;
                }
                Err(e) => {
                    kept += 1;
                    warn!(post_id = id, error = %e, "Queued bookmark add not delivered");
                }
            }
        }

        for id in state.pending.removes() {
            match self.client.remove_bookmark(&self.session, id).await {
                // 404: already gone, which is the target state.
                Ok(()) | Err(ApiError::HttpStatus(404)) => {
                    state.pending.confirm(PendingOp::Remove(id));
                    delivered += 1;
                }
                Err(e) => {
                    kept += 1;
                    warn!(post_id = id, error = %e, "Queued bookmark remove not delivered");
                }
            }
        }

        if delivered > 0 {
            self.persist_pending(state).await?;
        }
        info!(delivered, kept, "Drained pending bookmark queue");
        Ok(())
    }

    /// Replace the mirror with the server's snapshot, overlaying any
    /// still-queued edits so an undrained change is not clobbered.
    async fn adopt_server_snapshot(&self, state: &mut BookmarkState) -> Result<()> {
        if !self.session.is_authenticated() || !self.session.network_reachable() {
            return Ok(());
        }

        let server_ids = match self.client.fetch_bookmarks(&self.session).await {
            Ok(ids) => ids,
            Err(e) => {
                // The local mirror stays authoritative until a snapshot
                // actually lands.
                warn!(error = %e, "Bookmark snapshot fetch failed, keeping local state");
                return Ok(());
            }
        };

        let mut saved: HashSet<i64> = server_ids.into_iter().collect();
        for op in state.pending.iter() {
            match op {
                PendingOp::Add(id) => {
                    saved.insert(*id);
                }
                PendingOp::Remove(id) => {
                    saved.remove(id);
                }
            }
        }

        debug!(
            count = saved.len(),
            overlaid = state.pending.len(),
            "Adopted server bookmark snapshot"
        );
        state.saved = saved;
        self.persist_saved(state).await?;
        self.publish(state);
        Ok(())
    }
}
