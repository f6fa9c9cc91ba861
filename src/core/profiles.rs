use crate::core::channel::EuiccChannel;
use crate::core::manager::ChannelLookup;
use crate::domain::model::{LocalProfileInfo, ProfileClass};
use crate::domain::ports::LocalProfileAssistant;
use crate::utils::error::{EuiccError, Result};
use async_trait::async_trait;
use std::collections::HashSet;

pub trait ProfileListExt {
    /// 只保留一般用途的 profile (排除 testing / provisioning)
    fn operational(&self) -> Vec<&LocalProfileInfo>;

    /// First enabled profile in list order.
    fn enabled(&self) -> Option<&LocalProfileInfo>;

    fn find_iccid(&self, iccid: &str) -> Option<&LocalProfileInfo>;
}

impl ProfileListExt for [LocalProfileInfo] {
    fn operational(&self) -> Vec<&LocalProfileInfo> {
        self.iter()
            .filter(|p| p.profile_class == ProfileClass::Operational)
            .collect()
    }

    fn enabled(&self) -> Option<&LocalProfileInfo> {
        self.iter().find(|p| p.is_enabled())
    }

    fn find_iccid(&self, iccid: &str) -> Option<&LocalProfileInfo> {
        self.iter().find(|p| p.iccid == iccid)
    }
}

pub trait ChannelListExt {
    /// More than one distinct physical slot is represented.
    fn has_multiple_chips(&self) -> bool;
}

impl ChannelListExt for [EuiccChannel] {
    fn has_multiple_chips(&self) -> bool {
        self.iter()
            .map(|c| c.slot_id())
            .collect::<HashSet<_>>()
            .len()
            > 1
    }
}

/// Reverts a disable performed by [`LpaProfileExt::disable_active_profile_with_undo`].
///
/// Holds the ICCID only, so it can be applied to whatever channel serves the
/// port after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ProfileUndo {
    iccid: Option<String>,
    refresh: bool,
}

impl ProfileUndo {
    pub fn noop() -> Self {
        Self {
            iccid: None,
            refresh: false,
        }
    }

    pub fn iccid(&self) -> Option<&str> {
        self.iccid.as_deref()
    }

    pub fn is_noop(&self) -> bool {
        self.iccid.is_none()
    }

    pub async fn undo(self, lpa: &dyn LocalProfileAssistant) -> Result<()> {
        let Some(iccid) = self.iccid else {
            return Ok(());
        };

        tracing::info!("Re-enabling profile {}", iccid);
        if lpa.enable_profile(&iccid, self.refresh).await? {
            Ok(())
        } else {
            Err(EuiccError::lpa(format!("Failed to re-enable profile {}", iccid)))
        }
    }

    /// Resolves the port's current channel and undoes on it.
    pub async fn undo_on<L>(self, lookup: &L, slot_id: i32, port_id: i32) -> Result<()>
    where
        L: ChannelLookup + ?Sized,
    {
        if self.is_noop() {
            return Ok(());
        }
        let channel = lookup
            .find_channel_by_port(slot_id, port_id)
            .await
            .ok_or(EuiccError::ChannelUnavailable { slot_id, port_id })?;
        self.undo(&**channel.lpa()).await
    }
}

#[async_trait]
pub trait LpaProfileExt {
    /// Disables the active profile, if any. Returns the disable call's own
    /// result, or `true` when nothing was enabled.
    async fn disable_active_profile(&self, refresh: bool) -> Result<bool>;

    async fn disable_active_profile_with_undo(&self, refresh_on_disable: bool)
        -> Result<ProfileUndo>;
}

#[async_trait]
impl<T> LpaProfileExt for T
where
    T: LocalProfileAssistant + ?Sized,
{
    async fn disable_active_profile(&self, refresh: bool) -> Result<bool> {
        let profiles = self.profiles().await?;
        match profiles.enabled() {
            Some(active) => {
                tracing::info!("Disabling active profile {}", active.iccid);
                self.disable_profile(&active.iccid, refresh).await
            }
            None => Ok(true),
        }
    }

    async fn disable_active_profile_with_undo(
        &self,
        refresh_on_disable: bool,
    ) -> Result<ProfileUndo> {
        let profiles = self.profiles().await?;
        let Some(active) = profiles.enabled() else {
            return Ok(ProfileUndo::noop());
        };

        tracing::info!("Disabling active profile {}", active.iccid);
        if !self.disable_profile(&active.iccid, refresh_on_disable).await? {
            tracing::warn!("Card reported failure disabling {}", active.iccid);
        }

        Ok(ProfileUndo {
            iccid: Some(active.iccid.clone()),
            refresh: refresh_on_disable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{port, profile, shared_card, MockLpa};
    use crate::domain::model::{PrivilegeTier, ProfileState};

    const ICCID: &str = "89010000000001";

    #[test]
    fn test_operational_filter() {
        let mut testing = profile("8901000000000000002", "Test", ProfileState::Disabled);
        testing.profile_class = ProfileClass::Testing;
        let mut provisioning = profile("8901000000000000003", "Boot", ProfileState::Disabled);
        provisioning.profile_class = ProfileClass::Provisioning;
        let profiles = vec![
            profile("8901000000000000001", "Carrier A", ProfileState::Enabled),
            testing,
            provisioning,
        ];

        let operational = profiles.operational();
        assert_eq!(operational.len(), 1);
        assert_eq!(operational[0].name, "Carrier A");
    }

    #[test]
    fn test_has_multiple_chips() {
        let channel = |slot| {
            EuiccChannel::new(
                &port(slot, 0, false, true),
                PrivilegeTier::Privileged,
                MockLpa::new(shared_card(Vec::new(), &[])),
            )
        };

        assert!(vec![channel(0), channel(0), channel(1)].has_multiple_chips());
        assert!(!vec![channel(0), channel(0)].has_multiple_chips());
        assert!(!Vec::<EuiccChannel>::new().has_multiple_chips());
    }

    #[tokio::test]
    async fn test_disable_active_profile() {
        let card = shared_card(
            vec![
                profile("8901000000000000001", "A", ProfileState::Disabled),
                profile(ICCID, "B", ProfileState::Enabled),
            ],
            &[],
        );
        let lpa = MockLpa::new(card.clone());

        assert!(lpa.disable_active_profile(true).await.unwrap());
        assert_eq!(
            card.lock().unwrap().disable_calls,
            vec![(ICCID.to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_disable_without_active_profile_is_trivially_true() {
        let card = shared_card(
            vec![profile(ICCID, "A", ProfileState::Disabled)],
            &[],
        );
        let lpa = MockLpa::new(card.clone());

        assert!(lpa.disable_active_profile(false).await.unwrap());
        assert!(card.lock().unwrap().disable_calls.is_empty());
    }

    #[tokio::test]
    async fn test_only_first_enabled_profile_is_disabled() {
        let card = shared_card(
            vec![
                profile("8901000000000000001", "A", ProfileState::Enabled),
                profile("8901000000000000002", "B", ProfileState::Enabled),
            ],
            &[],
        );
        let lpa = MockLpa::new(card.clone());

        lpa.disable_active_profile(false).await.unwrap();
        let card = card.lock().unwrap();
        assert_eq!(card.disable_calls.len(), 1);
        assert_eq!(card.disable_calls[0].0, "8901000000000000001");
    }

    #[tokio::test]
    async fn test_undo_re_enables_same_iccid() {
        let card = shared_card(vec![profile(ICCID, "A", ProfileState::Enabled)], &[]);
        let lpa = MockLpa::new(card.clone());

        let undo = lpa.disable_active_profile_with_undo(false).await.unwrap();
        assert_eq!(undo.iccid(), Some(ICCID));
        assert!(!card.lock().unwrap().profiles[0].is_enabled());

        // 換一個 session 也能還原
        let reconnected = MockLpa::new(card.clone());
        lpa.invalidate();
        undo.undo(&*reconnected).await.unwrap();

        let card = card.lock().unwrap();
        assert!(card.profiles[0].is_enabled());
        assert_eq!(card.enable_calls, vec![(ICCID.to_string(), false)]);
    }

    #[tokio::test]
    async fn test_undo_without_active_profile_is_noop() {
        let card = shared_card(vec![profile(ICCID, "A", ProfileState::Disabled)], &[]);
        let lpa = MockLpa::new(card.clone());

        let undo = lpa.disable_active_profile_with_undo(false).await.unwrap();
        assert!(undo.is_noop());
        undo.undo(&*lpa).await.unwrap();

        let card = card.lock().unwrap();
        assert!(card.enable_calls.is_empty());
        assert!(card.disable_calls.is_empty());
    }

    #[tokio::test]
    async fn test_undo_on_missing_channel_fails() {
        struct NoChannel;

        #[async_trait]
        impl ChannelLookup for NoChannel {
            async fn find_channel_by_port(&self, _: i32, _: i32) -> Option<EuiccChannel> {
                None
            }
        }

        let undo = ProfileUndo {
            iccid: Some(ICCID.to_string()),
            refresh: false,
        };
        assert!(undo.undo_on(&NoChannel, 0, 0).await.is_err());
        assert!(ProfileUndo::noop().undo_on(&NoChannel, 0, 0).await.is_ok());
    }
}
