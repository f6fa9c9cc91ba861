use crate::core::channel::EuiccChannel;
use crate::domain::model::SlotPort;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Entry = Arc<AsyncMutex<Option<EuiccChannel>>>;

/// Channel cache keyed by (slot, port).
///
/// Each key has its own async lock, held for the whole check-then-acquire
/// sequence, so at most one acquisition per port runs at a time while other
/// ports proceed independently. Entries are never removed from the map;
/// eviction only empties the slot, so a lock holder can never be bypassed.
#[derive(Default)]
pub struct ChannelRegistry {
    entries: Mutex<HashMap<SlotPort, Entry>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: SlotPort) -> Entry {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key).or_default().clone()
    }

    fn entries(&self) -> Vec<(SlotPort, Entry)> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<_> = entries
            .iter()
            .map(|(key, entry)| (*key, entry.clone()))
            .collect();
        snapshot.sort_by_key(|(key, _)| *key);
        snapshot
    }

    /// 取得該 port 的獨佔鎖；持有期間可檢查並替換快取的 channel
    pub async fn lock(&self, key: SlotPort) -> OwnedMutexGuard<Option<EuiccChannel>> {
        self.entry(key).lock_owned().await
    }

    pub async fn get(&self, key: SlotPort) -> Option<EuiccChannel> {
        self.lock(key).await.clone()
    }

    pub async fn channels(&self) -> Vec<EuiccChannel> {
        let mut channels = Vec::new();
        for (_, entry) in self.entries() {
            if let Some(channel) = entry.lock().await.as_ref() {
                channels.push(channel.clone());
            }
        }
        channels
    }

    /// Empties every slot whose key is not in `live` and returns the
    /// channels that were removed.
    pub async fn retain_keys(&self, live: &HashSet<SlotPort>) -> Vec<EuiccChannel> {
        let mut evicted = Vec::new();
        for (key, entry) in self.entries() {
            if live.contains(&key) {
                continue;
            }
            if let Some(channel) = entry.lock().await.take() {
                evicted.push(channel);
            }
        }
        evicted
    }

    /// Empties every slot and returns the channels that were registered.
    pub async fn drain(&self) -> Vec<EuiccChannel> {
        let mut drained = Vec::new();
        for (_, entry) in self.entries() {
            if let Some(channel) = entry.lock().await.take() {
                drained.push(channel);
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{port, shared_card, MockLpa};
    use crate::domain::model::PrivilegeTier;
    use std::time::Duration;

    fn channel(slot: i32) -> EuiccChannel {
        EuiccChannel::new(
            &port(slot, 0, true, true),
            PrivilegeTier::Unprivileged,
            MockLpa::new(shared_card(Vec::new(), &[])),
        )
    }

    #[tokio::test]
    async fn test_lock_is_per_key() {
        let registry = Arc::new(ChannelRegistry::new());
        let _held = registry.lock(SlotPort::new(0, 0)).await;

        // 不同 port 不應被阻塞
        let other = tokio::time::timeout(
            Duration::from_millis(200),
            registry.lock(SlotPort::new(1, 0)),
        )
        .await;
        assert!(other.is_ok());

        // 同一 port 必須等待
        let same = tokio::time::timeout(
            Duration::from_millis(50),
            registry.lock(SlotPort::new(0, 0)),
        )
        .await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = ChannelRegistry::new();
        assert!(registry.get(SlotPort::new(0, 0)).await.is_none());
        assert!(registry.channels().await.is_empty());
        assert!(registry.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_retain_keys_empties_unlisted_slots() {
        let registry = ChannelRegistry::new();
        *registry.lock(SlotPort::new(0, 0)).await = Some(channel(0));
        *registry.lock(SlotPort::new(1, 0)).await = Some(channel(1));

        let live: HashSet<SlotPort> = [SlotPort::new(0, 0)].into_iter().collect();
        let evicted = registry.retain_keys(&live).await;

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].slot_id(), 1);
        let remaining = registry.channels().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].slot_id(), 0);
    }
}
