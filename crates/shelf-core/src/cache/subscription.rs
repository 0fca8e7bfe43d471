use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::models::PackageRecord;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SubscriptionId(pub u64);

/// Delivered to every subscriber of `key` when an existing entry is
/// overwritten. The record list is shared and read-only.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheUpdate {
    pub key: String,
    pub data: Arc<Vec<PackageRecord>>,
}

/// Receiving half of a subscription. Holders must call
/// [`PackageCache::unsubscribe`](crate::cache::PackageCache::unsubscribe)
/// when their view goes inactive; a dropped subscription is only pruned on
/// the next notification for its key.
#[derive(Debug)]
pub struct CacheSubscription {
    id: SubscriptionId,
    key: String,
    receiver: mpsc::UnboundedReceiver<CacheUpdate>,
}

impl CacheSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the next update; `None` once the subscription was removed.
    pub async fn recv(&mut self) -> Option<CacheUpdate> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<CacheUpdate> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<CacheUpdate>,
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    by_key: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriberRegistry {
    pub(crate) fn subscribe(&self, key: &str) -> CacheSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut by_key = lock_registry(&self.by_key);
        by_key
            .entry(key.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        CacheSubscription {
            id,
            key: key.to_string(),
            receiver,
        }
    }

    pub(crate) fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let mut by_key = lock_registry(&self.by_key);
        let Some(subscribers) = by_key.get_mut(key) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            by_key.remove(key);
        }
        removed
    }

    /// Queues `update` on every live subscriber of its key, in subscription
    /// order. Returns how many subscribers were reached.
    pub(crate) fn notify(&self, update: CacheUpdate) -> usize {
        let mut by_key = lock_registry(&self.by_key);
        let Some(subscribers) = by_key.get_mut(&update.key) else {
            return 0;
        };

        subscribers.retain(|subscriber| subscriber.sender.send(update.clone()).is_ok());
        let delivered = subscribers.len();

        if subscribers.is_empty() {
            by_key.remove(&update.key);
        }
        delivered
    }

    pub(crate) fn subscriber_count(&self, key: &str) -> usize {
        lock_registry(&self.by_key)
            .get(key)
            .map_or(0, Vec::len)
    }
}

// The registry holds no invariants a panicking holder could break halfway,
// so a poisoned lock is recovered rather than propagated.
fn lock_registry(
    mutex: &Mutex<HashMap<String, Vec<Subscriber>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Subscriber>>> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{CacheUpdate, SubscriberRegistry};

    fn update(key: &str) -> CacheUpdate {
        CacheUpdate {
            key: key.to_string(),
            data: Arc::new(Vec::new()),
        }
    }

    #[test]
    fn removing_last_subscriber_drops_key() {
        let registry = SubscriberRegistry::default();
        let first = registry.subscribe("debian:vim");
        let second = registry.subscribe("debian:vim");
        assert_eq!(registry.subscriber_count("debian:vim"), 2);

        assert!(registry.unsubscribe("debian:vim", first.id()));
        assert_eq!(registry.subscriber_count("debian:vim"), 1);
        assert!(registry.unsubscribe("debian:vim", second.id()));
        assert!(!registry.by_key.lock().unwrap().contains_key("debian:vim"));
        assert!(!registry.unsubscribe("debian:vim", second.id()));
    }

    #[test]
    fn dropped_receivers_are_pruned_on_notify() {
        let registry = SubscriberRegistry::default();
        let kept = registry.subscribe("flatpak:gimp");
        drop(registry.subscribe("flatpak:gimp"));

        assert_eq!(registry.notify(update("flatpak:gimp")), 1);
        assert_eq!(registry.subscriber_count("flatpak:gimp"), 1);
        drop(kept);
        assert_eq!(registry.notify(update("flatpak:gimp")), 0);
        assert_eq!(registry.subscriber_count("flatpak:gimp"), 0);
    }

    #[test]
    fn notify_only_reaches_matching_key() {
        let registry = SubscriberRegistry::default();
        let mut vim = registry.subscribe("debian:vim");
        let mut emacs = registry.subscribe("debian:emacs");

        registry.notify(update("debian:vim"));

        assert_eq!(vim.try_recv().map(|u| u.key), Some("debian:vim".to_string()));
        assert!(emacs.try_recv().is_none());
    }
}
