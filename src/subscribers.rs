use log::info;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Opaque handle issued by the chat front-end.
pub type SubscriberId = i64;

/// Set of subscribers that receive signals. Shared between the front-end
/// (subscribe/unsubscribe) and the dispatcher (pruning); readers take a
/// snapshot instead of iterating the live set.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    members: Mutex<HashSet<SubscriberId>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_members(ids: impl IntoIterator<Item = SubscriberId>) -> Self {
        Self {
            members: Mutex::new(ids.into_iter().collect()),
        }
    }

    /// Returns `true` if `id` was not yet subscribed.
    pub async fn add(&self, id: SubscriberId) -> bool {
        let added = self.members.lock().await.insert(id);
        if added {
            info!("Subscriber {} registered", id);
        }
        added
    }

    /// Returns `true` if `id` was subscribed.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.members.lock().await.remove(&id);
        if removed {
            info!("Subscriber {} removed", id);
        }
        removed
    }

    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.members.lock().await.contains(&id)
    }

    /// Point-in-time copy of the membership.
    pub async fn snapshot(&self) -> HashSet<SubscriberId> {
        self.members.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let registry = SubscriberRegistry::new();
        assert!(registry.add(42).await);
        assert!(!registry.add(42).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = SubscriberRegistry::with_members([1, 2]);
        assert!(!registry.remove(3).await);
        assert!(registry.remove(1).await);
        assert!(!registry.remove(1).await);
        assert_eq!(registry.snapshot().await, HashSet::from([2]));
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_later_mutation() {
        let registry = SubscriberRegistry::with_members([1, 2, 3]);
        let snapshot = registry.snapshot().await;
        registry.remove(2).await;
        registry.add(4).await;

        assert_eq!(snapshot, HashSet::from([1, 2, 3]));
        assert_eq!(registry.snapshot().await, HashSet::from([1, 3, 4]));
    }

    #[tokio::test]
    async fn test_concurrent_add_and_remove() {
        let registry = Arc::new(SubscriberRegistry::new());

        let adder = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for id in 0..200 {
                    registry.add(id).await;
                }
            })
        };
        let pruner = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for id in (0..200).filter(|id| id % 2 == 0) {
                    // Removal may run before the add; retry until it lands.
                    while !registry.remove(id).await {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };
        adder.await.unwrap();
        pruner.await.unwrap();

        let remaining = registry.snapshot().await;
        assert_eq!(remaining.len(), 100);
        assert!(remaining.iter().all(|id| id % 2 == 1));
    }
}
