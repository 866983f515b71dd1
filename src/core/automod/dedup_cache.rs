// Bounded FIFO set of actors we already acted on.
//
// This only suppresses bursts of duplicate AutoMod events for the same
// account. It is not a ban ledger: it is lost on restart and an old actor is
// re-admitted once `capacity` newer actors have pushed it out.

use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;

pub const DEFAULT_DEDUP_CAPACITY: usize = 1_000;

#[derive(Default)]
struct Entries {
    order: VecDeque<u64>,
    members: HashSet<u64>,
}

pub struct DedupCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.members.len()
    }

    /// `false` if the actor was already handled recently.
    pub async fn should_process(&self, actor_id: u64) -> bool {
        !self.entries.lock().await.members.contains(&actor_id)
    }

    /// Remember the actor, evicting the oldest entry when full.
    pub async fn mark_processed(&self, actor_id: u64) {
        let mut entries = self.entries.lock().await;
        if entries.members.contains(&actor_id) {
            return;
        }

        while entries.order.len() >= self.capacity {
            match entries.order.pop_front() {
                Some(evicted) => {
                    entries.members.remove(&evicted);
                    tracing::debug!(actor_id = evicted, "Evicted actor from dedup cache");
                }
                None => break,
            }
        }

        entries.order.push_back(actor_id);
        entries.members.insert(actor_id);
    }

    /// Drop an actor so the next event for them is evaluated again (used on manual unban).
    pub async fn forget(&self, actor_id: u64) -> bool {
        let mut entries = self.entries.lock().await;
        if !entries.members.remove(&actor_id) {
            return false;
        }
        entries.order.retain(|id| *id != actor_id);
        true
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_actor_is_processed_until_marked() {
        let cache = DedupCache::new(10);

        assert!(cache.should_process(42).await);
        cache.mark_processed(42).await;
        assert!(!cache.should_process(42).await);
        assert!(cache.should_process(43).await);
    }

    #[tokio::test]
    async fn test_capacity_plus_one_evicts_exactly_the_oldest() {
        let capacity = 1_000;
        let cache = DedupCache::new(capacity);

        for actor in 0..=capacity as u64 {
            cache.mark_processed(actor).await;
        }

        assert_eq!(cache.len().await, capacity);
        assert!(cache.should_process(0).await, "oldest actor should be evicted");
        for actor in 1..=capacity as u64 {
            assert!(!cache.should_process(actor).await, "actor {} evicted", actor);
        }
    }

    #[tokio::test]
    async fn test_re_marking_does_not_duplicate_or_refresh() {
        let cache = DedupCache::new(2);

        cache.mark_processed(1).await;
        cache.mark_processed(2).await;
        cache.mark_processed(1).await;
        assert_eq!(cache.len().await, 2);

        // 1 is still the oldest entry, so it goes first.
        cache.mark_processed(3).await;
        assert!(cache.should_process(1).await);
        assert!(!cache.should_process(2).await);
        assert!(!cache.should_process(3).await);
    }

    #[tokio::test]
    async fn test_forget_removes_actor() {
        let cache = DedupCache::new(3);
        cache.mark_processed(7).await;

        assert!(cache.forget(7).await);
        assert!(!cache.forget(7).await);
        assert!(cache.should_process(7).await);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_marks_never_exceed_capacity() {
        let cache = std::sync::Arc::new(DedupCache::new(50));

        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let cache = std::sync::Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..100u64 {
                    cache.mark_processed(worker * 1_000 + i).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len().await, 50);
    }
}
