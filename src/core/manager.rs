use crate::core::acquisition::{self, AcquisitionStrategy, UnprivilegedStrategy};
use crate::core::channel::EuiccChannel;
use crate::core::registry::ChannelRegistry;
use crate::domain::model::{PortDescriptor, SlotPort};
use crate::domain::ports::{CardEnumerator, ProfilesChangedListener, UnprivilegedTransport};
use crate::utils::error::{EuiccError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Resolves a ready-to-use channel for a port. The coordinator and the
/// profile operations only depend on this.
#[async_trait]
pub trait ChannelLookup: Send + Sync {
    async fn find_channel_by_port(&self, slot_id: i32, port_id: i32) -> Option<EuiccChannel>;
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// 以 slot 查詢時優先使用的 port
    pub default_port: Option<i32>,
    pub reconnect_timeout: Duration,
    pub reconnect_poll_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_port: None,
            reconnect_timeout: Duration::from_secs(30),
            reconnect_poll_interval: Duration::from_secs(1),
        }
    }
}

enum PortLookup {
    Present(PortDescriptor),
    Absent,
    /// 列舉失敗，無法判斷 port 是否還在
    Unknown,
}

pub struct ChannelManager<S: AcquisitionStrategy> {
    enumerator: Arc<dyn CardEnumerator>,
    strategy: S,
    registry: ChannelRegistry,
    settings: ManagerSettings,
    listener: Option<Arc<dyn ProfilesChangedListener>>,
}

/// Manager that only knows the OMAPI tier.
pub type BaseChannelManager = ChannelManager<UnprivilegedStrategy>;

impl BaseChannelManager {
    pub fn new(
        enumerator: Arc<dyn CardEnumerator>,
        transport: Arc<dyn UnprivilegedTransport>,
    ) -> Self {
        Self::with_strategy(enumerator, UnprivilegedStrategy::new(transport))
    }
}

impl<S: AcquisitionStrategy> ChannelManager<S> {
    pub fn with_strategy(enumerator: Arc<dyn CardEnumerator>, strategy: S) -> Self {
        Self {
            enumerator,
            strategy,
            registry: ChannelRegistry::new(),
            settings: ManagerSettings::default(),
            listener: None,
        }
    }

    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_profiles_changed_listener(
        mut self,
        listener: Arc<dyn ProfilesChangedListener>,
    ) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub(crate) fn enumerator(&self) -> &Arc<dyn CardEnumerator> {
        &self.enumerator
    }

    pub(crate) fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Every port of every card, in enumeration order.
    pub async fn ports(&self) -> Result<Vec<PortDescriptor>> {
        let cards = self.enumerator.uicc_cards().await?;
        Ok(cards
            .into_iter()
            .flat_map(|card| {
                card.ports
                    .clone()
                    .into_iter()
                    .map(move |port| PortDescriptor {
                        card: card.clone(),
                        port,
                    })
            })
            .collect())
    }

    async fn lookup_port(&self, key: SlotPort) -> PortLookup {
        match self.ports().await {
            Ok(ports) => ports
                .into_iter()
                .find(|p| p.slot_port() == key)
                .map(PortLookup::Present)
                .unwrap_or(PortLookup::Absent),
            Err(e) => {
                tracing::warn!("Failed to enumerate cards while resolving {}: {}", key, e);
                PortLookup::Unknown
            }
        }
    }

    /// Closes and drops every cached channel whose port is not in `ports`.
    async fn evict_unlisted(&self, ports: &[PortDescriptor]) {
        let live: HashSet<SlotPort> = ports.iter().map(|p| p.slot_port()).collect();
        for channel in self.registry.retain_keys(&live).await {
            tracing::debug!("Evicting channel for removed {}", channel.slot_port());
            channel.close();
        }
    }

    /// 在該 port 的鎖內：沿用有效的快取，否則清除舊 channel 並重新取得
    async fn open_or_reuse(&self, key: SlotPort, lookup: PortLookup) -> Option<EuiccChannel> {
        let mut cached = self.registry.lock(key).await;

        if let Some(existing) = cached.as_ref() {
            let reusable = match &lookup {
                PortLookup::Present(port) => {
                    existing.valid() && existing.logical_slot_id() == port.logical_slot_index()
                }
                PortLookup::Unknown => existing.valid(),
                PortLookup::Absent => false,
            };
            if reusable {
                return Some(existing.clone());
            }

            tracing::debug!("Evicting stale channel for {}", key);
            existing.close();
            *cached = None;
        }

        let port = match lookup {
            PortLookup::Present(port) => port,
            PortLookup::Absent | PortLookup::Unknown => return None,
        };

        if !port.port.is_active() {
            tracing::debug!("{} is not mapped to a logical slot, skipping", key);
            return None;
        }

        let channel = acquisition::acquire(&self.strategy, &port).await;
        match &channel {
            Some(channel) => tracing::info!("✅ Opened {} channel for {}", channel.tier(), key),
            None => tracing::warn!("❌ No working channel for {}", key),
        }
        *cached = channel.clone();
        channel
    }

    pub async fn find_channel_by_port(&self, slot_id: i32, port_id: i32) -> Option<EuiccChannel> {
        let key = SlotPort::new(slot_id, port_id);
        let lookup = self.lookup_port(key).await;
        self.open_or_reuse(key, lookup).await
    }

    /// Channel for a physical slot: the configured default port first, then
    /// the remaining ports in enumeration order.
    pub async fn find_channel_by_slot(&self, slot_id: i32) -> Option<EuiccChannel> {
        let ports = match self.ports().await {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Failed to enumerate cards for slot {}: {}", slot_id, e);
                return self.cached_channel_for_slot(slot_id).await;
            }
        };
        self.evict_unlisted(&ports).await;

        let mut candidates: Vec<PortDescriptor> = ports
            .into_iter()
            .filter(|p| p.card.physical_slot_index == slot_id)
            .collect();
        if let Some(default_port) = self.settings.default_port {
            // stable sort：預設 port 排最前，其餘維持原順序
            candidates.sort_by_key(|p| p.port.port_index != default_port);
        }

        for port in candidates {
            let key = port.slot_port();
            if let Some(channel) = self.open_or_reuse(key, PortLookup::Present(port)).await {
                return Some(channel);
            }
        }
        None
    }

    /// 列舉失敗時：沿用該 slot 仍有效的快取，預設 port 優先
    async fn cached_channel_for_slot(&self, slot_id: i32) -> Option<EuiccChannel> {
        let mut cached: Vec<EuiccChannel> = self
            .registry
            .channels()
            .await
            .into_iter()
            .filter(|c| c.slot_id() == slot_id && c.valid())
            .collect();
        if let Some(default_port) = self.settings.default_port {
            cached.sort_by_key(|c| c.port_id() != default_port);
        }
        cached.into_iter().next()
    }

    pub async fn find_channel_by_logical_slot(&self, logical_slot_id: i32) -> Option<EuiccChannel> {
        let ports = match self.ports().await {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!(
                    "Failed to enumerate cards for logical slot {}: {}",
                    logical_slot_id,
                    e
                );
                return None;
            }
        };
        self.evict_unlisted(&ports).await;

        let port = ports
            .into_iter()
            .find(|p| p.port.is_active() && p.logical_slot_index() == logical_slot_id)?;
        let key = port.slot_port();
        self.open_or_reuse(key, PortLookup::Present(port)).await
    }

    /// Opens (or reuses) a channel on every port; ports without one are skipped.
    pub async fn enumerate_channels(&self) -> Vec<EuiccChannel> {
        let ports = match self.ports().await {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Failed to enumerate cards: {}", e);
                return Vec::new();
            }
        };
        self.evict_unlisted(&ports).await;

        let mut channels = Vec::new();
        for port in ports {
            let key = port.slot_port();
            if let Some(channel) = self.open_or_reuse(key, PortLookup::Present(port)).await {
                channels.push(channel);
            }
        }
        channels
    }

    /// Channels currently cached, ordered by (slot, port).
    pub async fn registered_channels(&self) -> Vec<EuiccChannel> {
        self.registry.channels().await
    }

    /// Closes the current channel and polls until the port answers again.
    ///
    /// Meant for operations that issue a refresh; the card drops off the bus
    /// and needs time to reattach.
    pub async fn wait_for_reconnect(
        &self,
        slot_id: i32,
        port_id: i32,
        timeout: Duration,
    ) -> Result<EuiccChannel> {
        let key = SlotPort::new(slot_id, port_id);
        if let Some(current) = self.registry.get(key).await {
            current.close();
        }

        let poll_interval = self.settings.reconnect_poll_interval;
        let wait = async {
            loop {
                match self.find_channel_by_port(slot_id, port_id).await {
                    Some(channel) if channel.valid() => return channel,
                    _ => {
                        tracing::debug!("{} not ready yet, retrying in {:?}", key, poll_interval);
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(channel) => {
                tracing::info!("🔄 {} reconnected", key);
                Ok(channel)
            }
            Err(_) => Err(EuiccError::ReconnectTimeout {
                slot_id,
                port_id,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Closes every cached channel and empties the registry.
    pub async fn invalidate(&self) {
        for channel in self.registry.drain().await {
            tracing::debug!("Closing channel for {}", channel.slot_port());
            channel.close();
        }
    }

    /// Tells subscription bookkeeping that the profiles behind a logical slot
    /// changed. No-op without a listener or without a channel for the slot.
    pub async fn notify_euicc_profiles_changed(&self, logical_slot_id: i32) {
        let Some(listener) = &self.listener else {
            return;
        };

        if let Some(channel) = self.find_channel_by_logical_slot(logical_slot_id).await {
            tracing::debug!(
                "Profiles changed on logical slot {}, refreshing card {}",
                logical_slot_id,
                channel.card_id()
            );
            listener.refresh_cached_euicc_info(channel.card_id()).await;
        }
    }
}

#[async_trait]
impl<S: AcquisitionStrategy> ChannelLookup for ChannelManager<S> {
    async fn find_channel_by_port(&self, slot_id: i32, port_id: i32) -> Option<EuiccChannel> {
        ChannelManager::find_channel_by_port(self, slot_id, port_id).await
    }
}
