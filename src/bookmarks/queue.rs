use serde::{Deserialize, Serialize};

/// A locally recorded bookmark intent not yet confirmed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Add(i64),
    Remove(i64),
}

impl PendingOp {
    pub fn post_id(&self) -> i64 {
        match self {
            PendingOp::Add(id) | PendingOp::Remove(id) => *id,
        }
    }

    fn cancels(&self, other: &PendingOp) -> bool {
        matches!(
            (self, other),
            (PendingOp::Add(a), PendingOp::Remove(b)) | (PendingOp::Remove(a), PendingOp::Add(b))
                if a == b
        )
    }
}

/// Insertion-ordered outbox of pending bookmark operations.
///
/// Holds at most one entry per post ID: recording an operation that is
/// already queued is a no-op, and recording the opposite of a queued
/// operation cancels the pair outright. The cancel is total because the
/// local mirror already reflects the final intent and the server never
/// saw either step, so there is nothing left to deliver — an offline
/// toggle-and-back leaves the queue empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingQueue {
    ops: Vec<PendingOp>,
}

impl PendingQueue {
    /// Record an intent, compacting against what is already queued.
    pub fn record(&mut self, op: PendingOp) {
        if self.ops.contains(&op) {
            return;
        }
        if let Some(pos) = self.ops.iter().position(|queued| queued.cancels(&op)) {
            self.ops.remove(pos);
            return;
        }
        self.ops.push(op);
    }

    /// True if this exact operation is queued.
    pub fn contains(&self, op: PendingOp) -> bool {
        self.ops.contains(&op)
    }

    /// Drop a delivered (or moot) entry. Returns true if it was queued.
    pub fn confirm(&mut self, op: PendingOp) -> bool {
        let before = self.ops.len();
        self.ops.retain(|queued| *queued != op);
        self.ops.len() != before
    }

    /// Queued add IDs in insertion order.
    pub fn adds(&self) -> Vec<i64> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PendingOp::Add(id) => Some(*id),
                PendingOp::Remove(_) => None,
            })
            .collect()
    }

    /// Queued remove IDs in insertion order.
    pub fn removes(&self) -> Vec<i64> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PendingOp::Remove(id) => Some(*id),
                PendingOp::Add(_) => None,
            })
            .collect()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

/// Persisted queue layout: the two ID lists the original client wrote,
/// each in insertion order.
///
/// Round-tripping through this layout drops the interleaving between
/// adds and removes, which is unobservable: a drain always delivers all
/// adds before any remove, and order within each side is preserved.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoredQueue {
    #[serde(default)]
    pub add: Vec<i64>,
    #[serde(default)]
    pub remove: Vec<i64>,
}

impl From<&PendingQueue> for StoredQueue {
    fn from(queue: &PendingQueue) -> Self {
        Self {
            add: queue.adds(),
            remove: queue.removes(),
        }
    }
}

impl From<StoredQueue> for PendingQueue {
    fn from(stored: StoredQueue) -> Self {
        // Loading through record() re-compacts, so a document that
        // somehow lists an ID on both sides collapses instead of
        // resurrecting a conflicting pair.
        let mut queue = PendingQueue::default();
        for id in stored.add {
            queue.record(PendingOp::Add(id));
        }
        for id in stored.remove {
            queue.record(PendingOp::Remove(id));
        }
        queue
    }
}
