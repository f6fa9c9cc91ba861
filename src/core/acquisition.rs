//! Tiered channel acquisition.
//!
//! A strategy says which tiers to try for a port and in what order, and knows
//! how to attempt each tier. [`acquire`] walks the plan and stops at the first
//! tier that yields a session. Every failure is soft: it is logged and the
//! next tier is tried.

use crate::core::channel::EuiccChannel;
use crate::domain::model::{PortDescriptor, PrivilegeTier};
use crate::domain::ports::{LocalProfileAssistant, PrivilegedTransport, UnprivilegedTransport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Tiers to attempt for `port`, highest priority first.
    fn tiers_for(&self, port: &PortDescriptor) -> Vec<PrivilegeTier>;

    async fn try_open_unprivileged(
        &self,
        port: &PortDescriptor,
    ) -> Option<Arc<dyn LocalProfileAssistant>>;

    async fn try_open_privileged(
        &self,
        _port: &PortDescriptor,
    ) -> Option<Arc<dyn LocalProfileAssistant>> {
        None
    }
}

pub async fn acquire<S>(strategy: &S, port: &PortDescriptor) -> Option<EuiccChannel>
where
    S: AcquisitionStrategy + ?Sized,
{
    for tier in strategy.tiers_for(port) {
        let lpa = match tier {
            PrivilegeTier::Unprivileged => strategy.try_open_unprivileged(port).await,
            PrivilegeTier::Privileged => strategy.try_open_privileged(port).await,
        };

        if let Some(lpa) = lpa {
            return Some(EuiccChannel::new(port, tier, lpa));
        }
    }

    None
}

/// Card-OS (OMAPI) tier only.
pub struct UnprivilegedStrategy {
    transport: Arc<dyn UnprivilegedTransport>,
}

impl UnprivilegedStrategy {
    pub fn new(transport: Arc<dyn UnprivilegedTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl AcquisitionStrategy for UnprivilegedStrategy {
    fn tiers_for(&self, _port: &PortDescriptor) -> Vec<PrivilegeTier> {
        vec![PrivilegeTier::Unprivileged]
    }

    async fn try_open_unprivileged(
        &self,
        port: &PortDescriptor,
    ) -> Option<Arc<dyn LocalProfileAssistant>> {
        let slot_port = port.slot_port();
        tracing::info!("Trying OMAPI for {}", slot_port);

        match self.transport.open(port).await {
            Ok(lpa) => Some(lpa),
            Err(e) => {
                tracing::warn!("OMAPI channel unavailable for {}: {}", slot_port, e);
                None
            }
        }
    }
}

/// Adds the telephony-stack tier on top of the OMAPI tier.
///
/// Removable cards try OMAPI first and only then the telephony stack.
/// Embedded cards try the telephony stack first and fall back to OMAPI.
pub struct PrivilegedStrategy {
    unprivileged: UnprivilegedStrategy,
    transport: Arc<dyn PrivilegedTransport>,
    stale_channels_closed: AtomicBool,
}

impl PrivilegedStrategy {
    pub fn new(
        unprivileged: Arc<dyn UnprivilegedTransport>,
        privileged: Arc<dyn PrivilegedTransport>,
    ) -> Self {
        Self {
            unprivileged: UnprivilegedStrategy::new(unprivileged),
            transport: privileged,
            stale_channels_closed: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &Arc<dyn PrivilegedTransport> {
        &self.transport
    }

    /// 回傳 true 表示這是第一次標記
    pub(crate) fn mark_stale_channels_closed(&self) -> bool {
        !self.stale_channels_closed.swap(true, Ordering::SeqCst)
    }
}

#[async_trait]
impl AcquisitionStrategy for PrivilegedStrategy {
    fn tiers_for(&self, port: &PortDescriptor) -> Vec<PrivilegeTier> {
        let mut tiers = Vec::with_capacity(2);
        if port.card.is_removable {
            tiers.push(PrivilegeTier::Unprivileged);
        }
        if port.card.is_euicc {
            tiers.push(PrivilegeTier::Privileged);
        }
        if !port.card.is_removable {
            tiers.push(PrivilegeTier::Unprivileged);
        }
        tiers
    }

    async fn try_open_unprivileged(
        &self,
        port: &PortDescriptor,
    ) -> Option<Arc<dyn LocalProfileAssistant>> {
        self.unprivileged.try_open_unprivileged(port).await
    }

    async fn try_open_privileged(
        &self,
        port: &PortDescriptor,
    ) -> Option<Arc<dyn LocalProfileAssistant>> {
        if !port.card.is_euicc {
            return None;
        }

        let slot_port = port.slot_port();
        tracing::info!("Trying TelephonyManager for {}", slot_port);

        match self.transport.open(port).await {
            Ok(lpa) => Some(lpa),
            Err(e) if e.is_invalid_argument() => {
                tracing::warn!(
                    "TelephonyManager APDU interface unavailable for {}, falling back",
                    slot_port
                );
                None
            }
            Err(e) => {
                tracing::warn!("TelephonyManager channel failed for {}: {}", slot_port, e);
                None
            }
        }
    }
}
