//! Offline-first bookmark state.
//!
//! The local mirror is authoritative for reads and is updated before any
//! network traffic. Every mutation is also recorded in a durable pending
//! queue; delivery to the server is attempted immediately when the
//! session allows and retried at the next reconciliation otherwise.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::session::Session;
use crate::storage::Database;

use self::queue::{PendingOp, PendingQueue, StoredQueue};

mod queue;
mod sync;

// client_state keys
const SAVED_KEY: &str = "bookmarks.saved";
const PENDING_KEY: &str = "bookmarks.pending";

#[derive(Debug, Default)]
struct BookmarkState {
    saved: HashSet<i64>,
    pending: PendingQueue,
    initialized: bool,
}

/// Bookmark store with optimistic local writes and queued delivery.
///
/// All state lives behind one async mutex, held across each logical
/// operation including its delivery attempt, so a toggle can never
/// interleave with a reconciliation. Reads go through a [`watch`]
/// channel instead and never contend with writers.
pub struct BookmarkManager {
    db: Database,
    client: ApiClient,
    session: Session,
    state: Mutex<BookmarkState>,
    view_tx: watch::Sender<Arc<HashSet<i64>>>,
}

impl BookmarkManager {
    pub fn new(db: Database, client: ApiClient, session: Session) -> Self {
        let (view_tx, _view_rx) = watch::channel(Arc::new(HashSet::new()));
        Self {
            db,
            client,
            session,
            state: Mutex::new(BookmarkState::default()),
            view_tx,
        }
    }

    /// Load persisted bookmark state and, when the session allows,
    /// reconcile with the server. Only the first call does work;
    /// repeats are no-ops until [`clear_local`](Self::clear_local).
    ///
    /// Network failures never fail initialization: the persisted state
    /// is served as-is and reconciliation waits for the next chance.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        state.saved = self.load_saved().await?;
        state.pending = self.load_pending().await?;
        state.initialized = true;
        self.publish(&state);
        info!(
            saved = state.saved.len(),
            pending = state.pending.len(),
            "Bookmark state loaded"
        );

        if self.session.is_authenticated() && self.session.network_reachable() {
            self.reconcile(&mut state).await?;
        }

        Ok(())
    }

    /// Whether a post is bookmarked, per the local mirror. Never blocks
    /// on in-flight mutations.
    pub fn is_bookmarked(&self, post_id: i64) -> bool {
        self.view_tx.borrow().contains(&post_id)
    }

    /// Subscribe to mirror updates. Each mutation publishes the full
    /// set of bookmarked IDs.
    pub fn watch(&self) -> watch::Receiver<Arc<HashSet<i64>>> {
        self.view_tx.subscribe()
    }

    /// All bookmarked post IDs, sorted for stable display.
    pub fn bookmarked_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.view_tx.borrow().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of queued, undelivered operations.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn add(&self, post_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        self.apply(&mut state, PendingOp::Add(post_id)).await
    }

    pub async fn remove(&self, post_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        self.apply(&mut state, PendingOp::Remove(post_id)).await
    }

    /// Flip a post's bookmark and return its new membership. The check
    /// and the write happen under one lock acquisition, so two racing
    /// toggles settle as strict toggle-then-toggle.
    pub async fn toggle(&self, post_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let op = if state.saved.contains(&post_id) {
            PendingOp::Remove(post_id)
        } else {
            PendingOp::Add(post_id)
        };
        self.apply(&mut state, op).await?;
        Ok(state.saved.contains(&post_id))
    }

    /// Forget all local bookmark state, including the persisted keys.
    /// Used at logout. The server is not contacted; its copy survives
    /// for the next login.
    pub async fn clear_local(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.saved.clear();
        state.pending.clear();
        state.initialized = false;
        self.db.delete_state(SAVED_KEY).await?;
        self.db.delete_state(PENDING_KEY).await?;
        self.publish(&state);
        info!("Cleared local bookmark state");
        Ok(())
    }

    /// Apply one mutation: update the mirror, persist, queue, then try
    /// to deliver right away if the session allows. Failures leave the
    /// entry queued for the next drain.
    async fn apply(&self, state: &mut BookmarkState, op: PendingOp) -> Result<()> {
        let changed = match op {
            PendingOp::Add(id) => state.saved.insert(id),
            PendingOp::Remove(id) => state.saved.remove(&id),
        };
        if !changed {
            return Ok(());
        }

        self.persist_saved(state).await?;
        self.publish(state);

        state.pending.record(op);
        self.persist_pending(state).await?;

        // record() may have cancelled an opposite queued entry instead
        // of queueing this one; then the server is already in the
        // target state and there is nothing to send.
        if !state.pending.contains(op) {
            return Ok(());
        }

        if self.session.is_authenticated() && self.session.network_reachable() {
            let result = match op {
                PendingOp::Add(id) => self.client.add_bookmark(&self.session, id).await,
                PendingOp::Remove(id) => self.client.remove_bookmark(&self.session, id).await,
            };
            match result {
                Ok(()) => {
                    if state.pending.confirm(op) {
                        self.persist_pending(state).await?;
                    }
                    debug!(post_id = op.post_id(), "Bookmark change delivered");
                }
                Err(e) => {
                    warn!(
                        post_id = op.post_id(),
                        error = %e,
                        "Bookmark delivery failed, entry stays queued"
                    );
                }
            }
        }

        Ok(())
    }

    /// Push the current mirror to watchers.
    fn publish(&self, state: &BookmarkState) {
        self.view_tx.send_replace(Arc::new(state.saved.clone()));
    }

    async fn load_saved(&self) -> Result<HashSet<i64>> {
        let Some(raw) = self.db.get_state(SAVED_KEY).await? else {
            return Ok(HashSet::new());
        };
        match serde_json::from_str::<Vec<i64>>(&raw) {
            Ok(ids) => Ok(ids.into_iter().collect()),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable saved-bookmark state");
                Ok(HashSet::new())
            }
        }
    }

    async fn load_pending(&self) -> Result<PendingQueue> {
        let Some(raw) = self.db.get_state(PENDING_KEY).await? else {
            return Ok(PendingQueue::default());
        };
        match serde_json::from_str::<StoredQueue>(&raw) {
            Ok(stored) => Ok(PendingQueue::from(stored)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable pending-queue state");
                Ok(PendingQueue::default())
            }
        }
    }

    async fn persist_saved(&self, state: &BookmarkState) -> Result<()> {
        let mut ids: Vec<i64> = state.saved.iter().copied().collect();
        ids.sort_unstable();
        let value = serde_json::to_string(&ids)?;
        self.db.set_state(SAVED_KEY, &value).await
    }

    async fn persist_pending(&self, state: &BookmarkState) -> Result<()> {
        let value = serde_json::to_string(&StoredQueue::from(&state.pending))?;
        self.db.set_state(PENDING_KEY, &value).await
    }
}
