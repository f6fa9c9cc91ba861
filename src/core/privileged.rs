use crate::core::acquisition::PrivilegedStrategy;
use crate::core::manager::ChannelManager;
use crate::domain::ports::{CardEnumerator, PrivilegedTransport, UnprivilegedTransport};
use std::sync::Arc;

/// Logical channel indices closed by stale-channel cleanup.
pub const STALE_LOGICAL_CHANNEL_SCAN: std::ops::Range<i32> = 0..10;

/// Manager with both the OMAPI and the telephony-stack tiers.
pub type PrivilegedChannelManager = ChannelManager<PrivilegedStrategy>;

impl PrivilegedChannelManager {
    pub fn new_privileged(
        enumerator: Arc<dyn CardEnumerator>,
        unprivileged: Arc<dyn UnprivilegedTransport>,
        privileged: Arc<dyn PrivilegedTransport>,
    ) -> Self {
        Self::with_strategy(enumerator, PrivilegedStrategy::new(unprivileged, privileged))
    }

    /// Builds the manager and closes channels leaked by a previous process
    /// before anything else can acquire one.
    pub async fn start(
        enumerator: Arc<dyn CardEnumerator>,
        unprivileged: Arc<dyn UnprivilegedTransport>,
        privileged: Arc<dyn PrivilegedTransport>,
    ) -> Self {
        let manager = Self::new_privileged(enumerator, unprivileged, privileged);
        manager.close_all_stale_channels().await;
        manager
    }

    /// Force-closes logical channels 0..10 on every known card.
    ///
    /// A previous instance that was killed may have left channels open in the
    /// telephony stack, and the pool per card is small. Every failure is
    /// ignored. Runs at most once per manager.
    pub async fn close_all_stale_channels(&self) {
        if !self.strategy().mark_stale_channels_closed() {
            tracing::debug!("Stale channels already closed for this manager");
            return;
        }

        let cards = match self.enumerator().uicc_cards().await {
            Ok(cards) => cards,
            Err(e) => {
                tracing::warn!("Skipping stale channel cleanup, cannot list cards: {}", e);
                return;
            }
        };

        let transport = self.strategy().transport();
        for card in cards {
            let mut closed = 0;
            for channel in STALE_LOGICAL_CHANNEL_SCAN {
                match transport
                    .close_logical_channel(card.physical_slot_index, channel)
                    .await
                {
                    Ok(()) => closed += 1,
                    Err(e) => tracing::trace!(
                        "close channel {} on slot {}: {}",
                        channel,
                        card.physical_slot_index,
                        e
                    ),
                }
            }
            tracing::info!(
                "🧹 Stale channel cleanup on slot {}: {} closed",
                card.physical_slot_index,
                closed
            );
        }
    }
}
