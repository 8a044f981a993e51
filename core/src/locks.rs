//! Per-player write serialization.
//!
//! Every read-cascade-write sequence for a player runs while holding that
//! player's mutex. Different players never contend. Multi-player batches
//! take their locks in sorted player-id order.

use crate::types::PlayerId;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Default)]
pub struct PlayerLocks {
    inner: Mutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
}

impl PlayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `player_id`, created on first use.
    pub fn handle(&self, player_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        map.entry(player_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the player's lock.
    pub fn with_player<R>(&self, player_id: &str, f: impl FnOnce() -> R) -> R {
        let handle = self.handle(player_id);
        let _guard = handle.lock();
        f()
    }

    /// Handles for several players, deduplicated and in lock order.
    pub fn handles<'a>(&self, player_ids: impl IntoIterator<Item = &'a str>) -> Vec<Arc<Mutex<()>>> {
        let mut ids: Vec<&str> = player_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().map(|id| self.handle(id)).collect()
    }

    /// Drop entries nobody holds. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_player_shares_one_mutex() {
        let locks = PlayerLocks::new();
        let a = locks.handle("p1");
        let b = locks.handle("p1");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &locks.handle("p2")));
    }

    #[test]
    fn prune_keeps_held_locks() {
        let locks = PlayerLocks::new();
        let held = locks.handle("p1");
        locks.with_player("p2", || ());
        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.prune_idle(), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn handles_are_sorted_and_deduplicated() {
        let locks = PlayerLocks::new();
        let hs = locks.handles(["p2", "p1", "p2"]);
        assert_eq!(hs.len(), 2);
        assert!(Arc::ptr_eq(&hs[0], &locks.handle("p1")));
    }
}
