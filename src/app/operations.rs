//! Profile operations over a channel manager.
//!
//! Every mutating operation runs inside [`run_tracked`], so the notifications
//! it produces are acknowledged right after. Operations that refresh the card
//! wait for the port to come back before returning, then fire the
//! profiles-changed hook.

use crate::core::{
    run_tracked, AcquisitionStrategy, ChannelManager, EuiccChannel, LpaProfileExt,
    ProfileListExt, TrackedOperationReport,
};
use crate::domain::model::{ActivationCode, LocalProfileInfo, LocalProfileNotification};
use crate::utils::error::{EuiccError, Result};

pub struct ProfileOperations<'a, S: AcquisitionStrategy> {
    manager: &'a ChannelManager<S>,
}

impl<'a, S: AcquisitionStrategy> ProfileOperations<'a, S> {
    pub fn new(manager: &'a ChannelManager<S>) -> Self {
        Self { manager }
    }

    async fn channel(&self, slot_id: i32, port_id: i32) -> Result<EuiccChannel> {
        self.manager
            .find_channel_by_port(slot_id, port_id)
            .await
            .ok_or(EuiccError::ChannelUnavailable { slot_id, port_id })
    }

    async fn slot_channel(&self, slot_id: i32) -> Result<EuiccChannel> {
        self.manager
            .find_channel_by_slot(slot_id)
            .await
            .ok_or(EuiccError::ChannelUnavailable {
                slot_id,
                port_id: self.manager.settings().default_port.unwrap_or(0),
            })
    }

    async fn reconnect(&self, slot_id: i32, port_id: i32) -> Result<EuiccChannel> {
        let timeout = self.manager.settings().reconnect_timeout;
        self.manager
            .wait_for_reconnect(slot_id, port_id, timeout)
            .await
    }

    async fn profiles_changed(&self, logical_slot_id: i32) {
        self.manager.notify_euicc_profiles_changed(logical_slot_id).await;
    }

    pub async fn profiles(&self, slot_id: i32) -> Result<Vec<LocalProfileInfo>> {
        self.slot_channel(slot_id).await?.lpa().profiles().await
    }

    /// Pending notifications, newest first.
    pub async fn notifications(&self, slot_id: i32) -> Result<Vec<LocalProfileNotification>> {
        let mut notifications = self.slot_channel(slot_id).await?.lpa().notifications().await?;
        notifications.sort_by(|a, b| b.seq_number.cmp(&a.seq_number));
        Ok(notifications)
    }

    pub async fn enable(
        &self,
        slot_id: i32,
        port_id: i32,
        iccid: &str,
        refresh: bool,
    ) -> Result<TrackedOperationReport> {
        let logical_slot_id = self.channel(slot_id, port_id).await?.logical_slot_id();

        let report = run_tracked(self.manager, slot_id, port_id, move || async move {
            let channel = self.channel(slot_id, port_id).await?;
            let profiles = channel.lpa().profiles().await?;
            let profile = profiles
                .find_iccid(iccid)
                .ok_or_else(|| EuiccError::ProfileNotFound {
                    iccid: iccid.to_string(),
                })?;
            if profile.is_enabled() {
                tracing::info!("Profile {} is already enabled", iccid);
                return Ok(false);
            }

            tracing::info!("Enabling profile {} on {}", iccid, channel.slot_port());
            if !channel.lpa().enable_profile(iccid, refresh).await? {
                return Err(EuiccError::lpa(format!("Failed to enable profile {}", iccid)));
            }
            if refresh {
                self.reconnect(slot_id, port_id).await?;
            }
            Ok(true)
        })
        .await?;

        self.profiles_changed(logical_slot_id).await;
        Ok(report)
    }

    pub async fn disable(
        &self,
        slot_id: i32,
        port_id: i32,
        iccid: &str,
        refresh: bool,
    ) -> Result<TrackedOperationReport> {
        let logical_slot_id = self.channel(slot_id, port_id).await?.logical_slot_id();

        let report = run_tracked(self.manager, slot_id, port_id, move || async move {
            let channel = self.channel(slot_id, port_id).await?;
            let profiles = channel.lpa().profiles().await?;
            let profile = profiles
                .find_iccid(iccid)
                .ok_or_else(|| EuiccError::ProfileNotFound {
                    iccid: iccid.to_string(),
                })?;
            if !profile.is_enabled() {
                tracing::info!("Profile {} is already disabled", iccid);
                return Ok(false);
            }

            tracing::info!("Disabling profile {} on {}", iccid, channel.slot_port());
            if !channel.lpa().disable_profile(iccid, refresh).await? {
                return Err(EuiccError::lpa(format!("Failed to disable profile {}", iccid)));
            }
            if refresh {
                self.reconnect(slot_id, port_id).await?;
            }
            Ok(true)
        })
        .await?;

        self.profiles_changed(logical_slot_id).await;
        Ok(report)
    }

    /// Disables whatever is active on the port.
    pub async fn disable_active(
        &self,
        slot_id: i32,
        port_id: i32,
        refresh: bool,
    ) -> Result<TrackedOperationReport> {
        let logical_slot_id = self.channel(slot_id, port_id).await?.logical_slot_id();

        let report = run_tracked(self.manager, slot_id, port_id, move || async move {
            let channel = self.channel(slot_id, port_id).await?;
            let had_active = channel.lpa().profiles().await?.enabled().is_some();
            if !channel.lpa().disable_active_profile(refresh).await? {
                return Err(EuiccError::lpa("Failed to disable the active profile"));
            }
            if had_active && refresh {
                self.reconnect(slot_id, port_id).await?;
            }
            Ok(had_active)
        })
        .await?;

        self.profiles_changed(logical_slot_id).await;
        Ok(report)
    }

    /// Disables the active profile and enables `iccid`. If enabling fails,
    /// the previously active profile is re-enabled before the error is
    /// returned.
    pub async fn switch(
        &self,
        slot_id: i32,
        port_id: i32,
        iccid: &str,
        refresh: bool,
    ) -> Result<TrackedOperationReport> {
        let logical_slot_id = self.channel(slot_id, port_id).await?.logical_slot_id();

        let report = run_tracked(self.manager, slot_id, port_id, move || async move {
            let channel = self.channel(slot_id, port_id).await?;
            let profiles = channel.lpa().profiles().await?;
            let target = profiles
                .find_iccid(iccid)
                .ok_or_else(|| EuiccError::ProfileNotFound {
                    iccid: iccid.to_string(),
                })?;
            if target.is_enabled() {
                tracing::info!("Profile {} is already enabled", iccid);
                return Ok(false);
            }

            let undo = channel.lpa().disable_active_profile_with_undo(refresh).await?;
            let channel = if refresh && !undo.is_noop() {
                self.reconnect(slot_id, port_id).await?
            } else {
                channel
            };

            tracing::info!("Enabling profile {} on {}", iccid, channel.slot_port());
            let failure = match channel.lpa().enable_profile(iccid, refresh).await {
                Ok(true) => None,
                Ok(false) => Some(EuiccError::lpa(format!("Failed to enable profile {}", iccid))),
                Err(e) => Some(e),
            };

            if let Some(e) = failure {
                tracing::warn!("❌ Switch to {} failed, restoring previous profile", iccid);
                if let Err(undo_err) = undo.undo_on(self.manager, slot_id, port_id).await {
                    tracing::error!("Failed to restore previous profile: {}", undo_err);
                }
                return Err(e);
            }

            if refresh {
                self.reconnect(slot_id, port_id).await?;
            }
            Ok(true)
        })
        .await?;

        self.profiles_changed(logical_slot_id).await;
        Ok(report)
    }

    pub async fn delete(
        &self,
        slot_id: i32,
        port_id: i32,
        iccid: &str,
    ) -> Result<TrackedOperationReport> {
        let logical_slot_id = self.channel(slot_id, port_id).await?.logical_slot_id();

        let report = run_tracked(self.manager, slot_id, port_id, move || async move {
            let channel = self.channel(slot_id, port_id).await?;
            tracing::info!("Deleting profile {} on {}", iccid, channel.slot_port());
            if !channel.lpa().delete_profile(iccid).await? {
                return Err(EuiccError::lpa(format!(
                    "Failed to delete profile {} (disable it first)",
                    iccid
                )));
            }
            Ok(true)
        })
        .await?;

        self.profiles_changed(logical_slot_id).await;
        Ok(report)
    }

    pub async fn download(
        &self,
        slot_id: i32,
        port_id: i32,
        activation_code: &str,
        confirmation_code: Option<&str>,
    ) -> Result<TrackedOperationReport> {
        let code =
            ActivationCode::parse(activation_code).ok_or_else(|| EuiccError::ValidationError {
                message: format!("Malformed activation code: {}", activation_code),
            })?;
        let logical_slot_id = self.channel(slot_id, port_id).await?.logical_slot_id();

        let report = run_tracked(self.manager, slot_id, port_id, || async {
            let channel = self.channel(slot_id, port_id).await?;
            tracing::info!(
                "Downloading profile from {} on {}",
                code.smdp_address,
                channel.slot_port()
            );
            let downloaded = channel
                .lpa()
                .download_profile(
                    &code.smdp_address,
                    code.matching_id.as_deref(),
                    confirmation_code,
                )
                .await?;
            if !downloaded {
                return Err(EuiccError::lpa(format!(
                    "Download from {} failed",
                    code.smdp_address
                )));
            }
            Ok(true)
        })
        .await?;

        self.profiles_changed(logical_slot_id).await;
        Ok(report)
    }

    /// Renames a profile. Produces no notification, so nothing is tracked.
    pub async fn set_nickname(
        &self,
        slot_id: i32,
        port_id: i32,
        iccid: &str,
        nickname: &str,
    ) -> Result<()> {
        let channel = self.channel(slot_id, port_id).await?;
        if !channel.lpa().set_nickname(iccid, nickname).await? {
            return Err(EuiccError::lpa(format!(
                "Failed to set nickname of {}",
                iccid
            )));
        }

        self.profiles_changed(channel.logical_slot_id()).await;
        Ok(())
    }

    /// Acknowledges every pending notification, oldest first. Returns the
    /// sequence numbers the card accepted.
    pub async fn handle_pending_notifications(
        &self,
        slot_id: i32,
        port_id: i32,
    ) -> Result<Vec<u64>> {
        let channel = self.channel(slot_id, port_id).await?;
        let mut pending = channel.lpa().notifications().await?;
        pending.sort_by_key(|n| n.seq_number);

        let mut handled = Vec::new();
        for notification in pending {
            tracing::debug!("Handling notification {}", notification);
            if channel
                .lpa()
                .handle_notification(notification.seq_number)
                .await?
            {
                handled.push(notification.seq_number);
            } else {
                tracing::warn!("Card refused to handle notification {}", notification);
            }
        }
        Ok(handled)
    }
}
