//! In-flight action deduplication.
//!
//! `PendingActionGuard` holds the set of action ids that currently have a
//! live workflow. Acquisition is an atomic test-and-insert; release happens
//! on `Drop` of the returned slot, so every exit path of a workflow task
//! (success, `?`, panic) frees the id.
//!
//! The in-memory map is enough for a single-process deployment. Because
//! acquisition is expressed as insert-if-absent, a durable backing (a row
//! with a unique constraint) can replace the map without changing callers.

use crate::types::ActionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

type PendingMap = Arc<Mutex<HashMap<ActionId, Instant>>>;

/// Set of action ids with a workflow currently in flight.
///
/// Cheap to clone; all clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct PendingActionGuard {
    pending: PendingMap,
}

impl PendingActionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserve `id` for one workflow.
    ///
    /// Returns `None` without blocking when the id is already in flight.
    pub fn try_acquire(&self, id: &ActionId) -> Option<PendingSlot> {
        let mut pending = lock(&self.pending);
        if pending.contains_key(id) {
            debug!(action = %id, "Action already in flight, skipping");
            return None;
        }
        pending.insert(id.clone(), Instant::now());
        Some(PendingSlot {
            pending: Arc::clone(&self.pending),
            id: id.clone(),
        })
    }

    /// Whether `id` currently has a live workflow.
    pub fn is_pending(&self, id: &ActionId) -> bool {
        lock(&self.pending).contains_key(id)
    }

    /// Number of actions currently in flight.
    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A held reservation for one action id, released on drop.
#[derive(Debug)]
pub struct PendingSlot {
    pending: PendingMap,
    id: ActionId,
}

impl PendingSlot {
    pub fn id(&self) -> &ActionId {
        &self.id
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn lock(map: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<ActionId, Instant>> {
    // A panicked workflow must still release its slot.
    map.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast() {
        let guard = PendingActionGuard::new();
        let id = ActionId::reply("42");

        let slot = guard.try_acquire(&id);
        assert!(slot.is_some());
        assert!(guard.try_acquire(&id).is_none());

        drop(slot);
        assert!(guard.try_acquire(&id).is_some());
    }

    #[test]
    fn distinct_ids_are_independent() {
        let guard = PendingActionGuard::new();
        let a = guard.try_acquire(&ActionId::reply("1"));
        let b = guard.try_acquire(&ActionId::reply("2"));
        assert!(a.is_some());
        assert!(b.is_some());
        assert_eq!(guard.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_acquires_yield_one_winner() {
        let guard = PendingActionGuard::new();
        let id = ActionId::reply("42");

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let guard = guard.clone();
                let id = id.clone();
                tokio::spawn(async move { guard.try_acquire(&id) })
            })
            .collect();

        // Collect the slots before dropping any, so a released slot cannot
        // hand a second task a win.
        let mut slots = Vec::new();
        for task in tasks {
            slots.push(task.await.unwrap());
        }
        let wins = slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn slot_released_after_panic() {
        let guard = PendingActionGuard::new();
        let id = ActionId::proactive("9");

        let task_guard = guard.clone();
        let task_id = id.clone();
        let result = tokio::spawn(async move {
            let _slot = task_guard.try_acquire(&task_id).expect("first acquire");
            panic!("workflow blew up");
        })
        .await;
        assert!(result.is_err());

        // The panicked task's slot must have been dropped.
        assert!(!guard.is_pending(&id));
        assert!(guard.try_acquire(&id).is_some());
    }
}
