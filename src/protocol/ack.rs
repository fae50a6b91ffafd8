//! Pending acknowledgment table.
//!
//! One entry per chunk index the sender is waiting on. Every entry ends in
//! exactly one of: resolved by an incoming `ack`, rejected by
//! [`AckTable::reject_all`], or rejected implicitly when the table is
//! dropped. No waiter can stay suspended after the owning channel goes away.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckRejection {
    SessionClosed,
    Cancelled(String),
    Reset,
}

type AckOutcome = Result<(), AckRejection>;

#[derive(Default)]
pub struct AckTable {
    waiters: Mutex<HashMap<u32, oneshot::Sender<AckOutcome>>>,
}

impl AckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `ack{index}`. Must be called before the chunk is
    /// sent so a fast acknowledgment cannot be missed. A previous waiter for
    /// the same index is rejected with [`AckRejection::Reset`].
    pub fn register(&self, index: u32) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.waiters.lock().insert(index, tx) {
            let _ = previous.send(Err(AckRejection::Reset));
        }
        AckWaiter { index, rx }
    }

    /// Deliver `ack{index}`. Returns false for duplicates and acks nobody
    /// waits for; those have no effect.
    pub fn resolve(&self, index: u32) -> bool {
        match self.waiters.lock().remove(&index) {
            Some(tx) => tx.send(Ok(())).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for `index` without notifying it.
    pub fn forget(&self, index: u32) {
        self.waiters.lock().remove(&index);
    }

    /// Reject every outstanding waiter. Returns how many were rejected.
    pub fn reject_all(&self, reason: AckRejection) -> usize {
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(reason.clone()));
        }
        count
    }

    pub fn outstanding(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Handle for one registered acknowledgment.
#[derive(Debug)]
pub struct AckWaiter {
    index: u32,
    rx: oneshot::Receiver<AckOutcome>,
}

impl AckWaiter {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Resolve once the acknowledgment arrives or the entry is rejected.
    /// Callers bound this with their own timeout.
    pub async fn received(self) -> AckOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AckRejection::Reset),
        }
    }
}
