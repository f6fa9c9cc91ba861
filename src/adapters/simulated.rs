//! In-process eUICC simulator.
//!
//! Implements the enumerator, both transports and the LPA over a set of
//! simulated cards. Each card has a small pool of logical channels; channels
//! that are never closed stay allocated in the card state, which is how a
//! crashed process leaks them. A refresh resets the card: every open channel
//! is dropped and sessions opened before it become invalid.

use crate::domain::model::{
    LocalProfileInfo, LocalProfileNotification, NotificationOperation, PortDescriptor,
    PrivilegeTier, ProfileClass, ProfileState, UiccCardInfo, UiccPortInfo,
};
use crate::domain::ports::{
    CardEnumerator, LocalProfileAssistant, PrivilegedTransport, UnprivilegedTransport,
};
use crate::utils::error::{EuiccError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

fn default_true() -> bool {
    true
}

fn default_max_logical_channels() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedCard {
    pub physical_slot_index: i32,
    pub card_id: i32,
    pub eid: String,
    #[serde(default)]
    pub removable: bool,
    #[serde(default = "default_true")]
    pub euicc: bool,
    #[serde(default = "default_true")]
    pub omapi_available: bool,
    #[serde(default = "default_true")]
    pub telephony_available: bool,
    #[serde(default = "default_max_logical_channels")]
    pub max_logical_channels: usize,
    /// 每次 refresh 之後，前幾次開啟嘗試會失敗
    #[serde(default)]
    pub reattach_delay_attempts: u32,
    #[serde(default)]
    pub fail_notification_handling: bool,
    #[serde(default)]
    pub open_logical_channels: Vec<i32>,
    #[serde(default)]
    pub next_seq_number: u64,
    #[serde(default)]
    pub ports: Vec<UiccPortInfo>,
    #[serde(default)]
    pub profiles: Vec<LocalProfileInfo>,
    #[serde(default)]
    pub notifications: Vec<LocalProfileNotification>,
}

impl SimulatedCard {
    pub fn new(physical_slot_index: i32, eid: &str) -> Self {
        Self {
            physical_slot_index,
            card_id: physical_slot_index + 1,
            eid: eid.to_string(),
            removable: false,
            euicc: true,
            omapi_available: true,
            telephony_available: true,
            max_logical_channels: default_max_logical_channels(),
            reattach_delay_attempts: 0,
            fail_notification_handling: false,
            open_logical_channels: Vec::new(),
            next_seq_number: 0,
            ports: Vec::new(),
            profiles: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn removable(mut self, removable: bool) -> Self {
        self.removable = removable;
        self
    }

    pub fn with_port(mut self, port_index: i32, logical_slot_index: i32) -> Self {
        self.ports.push(UiccPortInfo {
            port_index,
            logical_slot_index,
        });
        self
    }

    pub fn with_profile(mut self, iccid: &str, name: &str, state: ProfileState) -> Self {
        self.profiles.push(LocalProfileInfo {
            iccid: iccid.to_string(),
            nickname: String::new(),
            name: name.to_string(),
            provider_name: String::new(),
            state,
            profile_class: ProfileClass::Operational,
        });
        self
    }

    pub fn with_notification(mut self, seq_number: u64, operation: NotificationOperation) -> Self {
        self.notifications.push(LocalProfileNotification {
            seq_number,
            operation,
            address: "smdp.example.com".to_string(),
            iccid: None,
        });
        self
    }

    fn info(&self) -> UiccCardInfo {
        UiccCardInfo {
            physical_slot_index: self.physical_slot_index,
            card_id: self.card_id,
            is_removable: self.removable,
            is_euicc: self.euicc,
            ports: self.ports.clone(),
        }
    }
}

struct CardRuntime {
    card: SimulatedCard,
    present: bool,
    generation: u64,
    reattach_remaining: u32,
    attempts: HashMap<PrivilegeTier, usize>,
    acknowledged: Vec<u64>,
}

impl CardRuntime {
    fn new(mut card: SimulatedCard) -> Self {
        if card.ports.is_empty() {
            card.ports.push(UiccPortInfo {
                port_index: 0,
                logical_slot_index: card.physical_slot_index,
            });
        }
        let after_queue = card
            .notifications
            .iter()
            .map(|n| n.seq_number + 1)
            .max()
            .unwrap_or(1);
        card.next_seq_number = card.next_seq_number.max(after_queue).max(1);

        Self {
            card,
            present: true,
            generation: 0,
            reattach_remaining: 0,
            attempts: HashMap::new(),
            acknowledged: Vec::new(),
        }
    }

    fn allocate_channel(&mut self) -> Result<i32> {
        let max = self.card.max_logical_channels as i32;
        let free = (1..=max).find(|c| !self.card.open_logical_channels.contains(c));
        match free {
            Some(channel) => {
                self.card.open_logical_channels.push(channel);
                Ok(channel)
            }
            None => Err(EuiccError::transport(
                self.card.physical_slot_index,
                format!("all {} logical channels are in use", max),
            )),
        }
    }

    fn push_notification(&mut self, operation: NotificationOperation, iccid: &str) -> u64 {
        let seq_number = self.card.next_seq_number;
        self.card.next_seq_number += 1;
        self.card.notifications.push(LocalProfileNotification {
            seq_number,
            operation,
            address: "smdp.example.com".to_string(),
            iccid: Some(iccid.to_string()),
        });
        seq_number
    }

    fn refresh(&mut self) {
        self.generation += 1;
        self.card.open_logical_channels.clear();
        self.reattach_remaining = self.card.reattach_delay_attempts;
    }

    fn profile_index(&self, iccid: &str) -> Result<usize> {
        self.card
            .profiles
            .iter()
            .position(|p| p.iccid == iccid)
            .ok_or_else(|| EuiccError::ProfileNotFound {
                iccid: iccid.to_string(),
            })
    }
}

#[derive(Clone, Default)]
pub struct SimulatedBackend {
    cards: Arc<Mutex<BTreeMap<i32, CardRuntime>>>,
}

impl SimulatedBackend {
    pub fn new(cards: Vec<SimulatedCard>) -> Self {
        let cards = cards
            .into_iter()
            .map(|card| (card.physical_slot_index, CardRuntime::new(card)))
            .collect();
        Self {
            cards: Arc::new(Mutex::new(cards)),
        }
    }

    fn with_card<R>(
        &self,
        slot: i32,
        f: impl FnOnce(&mut CardRuntime) -> Result<R>,
    ) -> Result<R> {
        let mut cards = self.cards.lock().unwrap_or_else(PoisonError::into_inner);
        let runtime = cards
            .get_mut(&slot)
            .ok_or_else(|| EuiccError::transport(slot, "no card in slot"))?;
        f(runtime)
    }

    fn read<R: Default>(&self, slot: i32, f: impl FnOnce(&CardRuntime) -> R) -> R {
        self.with_card(slot, |rt| Ok(f(rt))).unwrap_or_default()
    }

    /// Current card state, suitable for writing back to the config file.
    pub fn snapshot(&self) -> Vec<SimulatedCard> {
        let cards = self.cards.lock().unwrap_or_else(PoisonError::into_inner);
        cards.values().map(|rt| rt.card.clone()).collect()
    }

    pub fn attempts(&self, slot: i32, tier: PrivilegeTier) -> usize {
        self.read(slot, |rt| rt.attempts.get(&tier).copied().unwrap_or(0))
    }

    /// Sequence numbers acknowledged since the backend was created.
    pub fn acknowledged(&self, slot: i32) -> Vec<u64> {
        self.read(slot, |rt| rt.acknowledged.clone())
    }

    pub fn pending_notifications(&self, slot: i32) -> Vec<u64> {
        self.read(slot, |rt| {
            rt.card
                .notifications
                .iter()
                .map(|n| n.seq_number)
                .collect()
        })
    }

    pub fn open_logical_channels(&self, slot: i32) -> Vec<i32> {
        self.read(slot, |rt| rt.card.open_logical_channels.clone())
    }

    pub fn profiles(&self, slot: i32) -> Vec<LocalProfileInfo> {
        self.read(slot, |rt| rt.card.profiles.clone())
    }

    /// Inserts or pulls the card. Pulling drops every open channel.
    pub fn set_present(&self, slot: i32, present: bool) {
        let _ = self.with_card(slot, |rt| {
            if rt.present && !present {
                rt.refresh();
            }
            rt.present = present;
            Ok(())
        });
    }

    pub fn set_fail_notification_handling(&self, slot: i32, fail: bool) {
        let _ = self.with_card(slot, |rt| {
            rt.card.fail_notification_handling = fail;
            Ok(())
        });
    }

    pub fn set_telephony_available(&self, slot: i32, available: bool) {
        let _ = self.with_card(slot, |rt| {
            rt.card.telephony_available = available;
            Ok(())
        });
    }

    pub fn refresh(&self, slot: i32) {
        let _ = self.with_card(slot, |rt| {
            rt.refresh();
            Ok(())
        });
    }

    fn open_session(
        &self,
        port: &PortDescriptor,
        tier: PrivilegeTier,
    ) -> Result<Arc<dyn LocalProfileAssistant>> {
        let slot = port.card.physical_slot_index;
        let (generation, channel) = self.with_card(slot, |rt| {
            *rt.attempts.entry(tier).or_default() += 1;

            if !rt.present {
                return Err(EuiccError::transport(slot, "card not present"));
            }
            match tier {
                PrivilegeTier::Unprivileged if !rt.card.omapi_available => {
                    return Err(EuiccError::transport(slot, "no OMAPI reader for this slot"));
                }
                PrivilegeTier::Privileged if !rt.card.telephony_available => {
                    return Err(EuiccError::invalid_argument(format!(
                        "no APDU interface for slot {}",
                        slot
                    )));
                }
                _ => {}
            }
            if rt.reattach_remaining > 0 {
                rt.reattach_remaining -= 1;
                return Err(EuiccError::transport(slot, "card is reattaching"));
            }

            let channel = rt.allocate_channel()?;
            Ok((rt.generation, channel))
        })?;

        tracing::debug!(
            "Simulator opened logical channel {} on slot {} ({})",
            channel,
            slot,
            tier
        );
        Ok(Arc::new(SimulatedLpa {
            backend: self.clone(),
            slot,
            generation,
            channel,
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl CardEnumerator for SimulatedBackend {
    async fn uicc_cards(&self) -> Result<Vec<UiccCardInfo>> {
        let cards = self.cards.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(cards
            .values()
            .filter(|rt| rt.present)
            .map(|rt| rt.card.info())
            .collect())
    }
}

#[async_trait]
impl UnprivilegedTransport for SimulatedBackend {
    async fn open(&self, port: &PortDescriptor) -> Result<Arc<dyn LocalProfileAssistant>> {
        self.open_session(port, PrivilegeTier::Unprivileged)
    }
}

#[async_trait]
impl PrivilegedTransport for SimulatedBackend {
    async fn open(&self, port: &PortDescriptor) -> Result<Arc<dyn LocalProfileAssistant>> {
        self.open_session(port, PrivilegeTier::Privileged)
    }

    async fn close_logical_channel(&self, physical_slot_index: i32, channel: i32) -> Result<()> {
        self.with_card(physical_slot_index, |rt| {
            let open = &mut rt.card.open_logical_channels;
            match open.iter().position(|c| *c == channel) {
                Some(index) => {
                    open.remove(index);
                    Ok(())
                }
                None => Err(EuiccError::transport(
                    physical_slot_index,
                    format!("logical channel {} is not open", channel),
                )),
            }
        })
    }
}

pub struct SimulatedLpa {
    backend: SimulatedBackend,
    slot: i32,
    generation: u64,
    channel: i32,
    closed: AtomicBool,
}

impl SimulatedLpa {
    fn is_live(&self, rt: &CardRuntime) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && rt.present
            && rt.generation == self.generation
            && rt.card.open_logical_channels.contains(&self.channel)
    }

    fn session<R>(&self, f: impl FnOnce(&mut CardRuntime) -> Result<R>) -> Result<R> {
        self.backend.with_card(self.slot, |rt| {
            if !self.is_live(rt) {
                return Err(EuiccError::transport(
                    self.slot,
                    format!("logical channel {} is no longer valid", self.channel),
                ));
            }
            f(rt)
        })
    }
}

#[async_trait]
impl LocalProfileAssistant for SimulatedLpa {
    fn valid(&self) -> bool {
        self.backend
            .with_card(self.slot, |rt| Ok(self.is_live(rt)))
            .unwrap_or(false)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.backend.with_card(self.slot, |rt| {
            if rt.generation == self.generation {
                rt.card.open_logical_channels.retain(|c| *c != self.channel);
            }
            Ok(())
        });
    }

    async fn eid(&self) -> Result<String> {
        self.session(|rt| Ok(rt.card.eid.clone()))
    }

    async fn profiles(&self) -> Result<Vec<LocalProfileInfo>> {
        self.session(|rt| Ok(rt.card.profiles.clone()))
    }

    async fn notifications(&self) -> Result<Vec<LocalProfileNotification>> {
        self.session(|rt| {
            let mut notifications = rt.card.notifications.clone();
            notifications.sort_by(|a, b| b.seq_number.cmp(&a.seq_number));
            Ok(notifications)
        })
    }

    async fn handle_notification(&self, seq_number: u64) -> Result<bool> {
        self.session(|rt| {
            if rt.card.fail_notification_handling {
                return Err(EuiccError::lpa(format!(
                    "failed to deliver notification {}",
                    seq_number
                )));
            }
            match rt
                .card
                .notifications
                .iter()
                .position(|n| n.seq_number == seq_number)
            {
                Some(index) => {
                    rt.card.notifications.remove(index);
                    rt.acknowledged.push(seq_number);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    async fn enable_profile(&self, iccid: &str, refresh: bool) -> Result<bool> {
        self.session(|rt| {
            let target = rt.profile_index(iccid)?;
            if rt.card.profiles[target].is_enabled() {
                return Ok(false);
            }

            // 韌體保證同時只有一個 enabled profile
            let previously_enabled: Vec<String> = rt
                .card
                .profiles
                .iter()
                .filter(|p| p.is_enabled())
                .map(|p| p.iccid.clone())
                .collect();
            for profile in rt.card.profiles.iter_mut() {
                profile.state = ProfileState::Disabled;
            }
            for previous in &previously_enabled {
                rt.push_notification(NotificationOperation::Disable, previous);
            }

            rt.card.profiles[target].state = ProfileState::Enabled;
            rt.push_notification(NotificationOperation::Enable, iccid);
            if refresh {
                rt.refresh();
            }
            Ok(true)
        })
    }

    async fn disable_profile(&self, iccid: &str, refresh: bool) -> Result<bool> {
        self.session(|rt| {
            let target = rt.profile_index(iccid)?;
            if !rt.card.profiles[target].is_enabled() {
                return Ok(false);
            }

            rt.card.profiles[target].state = ProfileState::Disabled;
            rt.push_notification(NotificationOperation::Disable, iccid);
            if refresh {
                rt.refresh();
            }
            Ok(true)
        })
    }

    async fn delete_profile(&self, iccid: &str) -> Result<bool> {
        self.session(|rt| {
            let target = rt.profile_index(iccid)?;
            if rt.card.profiles[target].is_enabled() {
                return Ok(false);
            }

            rt.card.profiles.remove(target);
            rt.push_notification(NotificationOperation::Delete, iccid);
            Ok(true)
        })
    }

    async fn set_nickname(&self, iccid: &str, nickname: &str) -> Result<bool> {
        self.session(|rt| {
            let target = rt.profile_index(iccid)?;
            rt.card.profiles[target].nickname = nickname.to_string();
            Ok(true)
        })
    }

    async fn download_profile(
        &self,
        smdp_address: &str,
        matching_id: Option<&str>,
        _confirmation_code: Option<&str>,
    ) -> Result<bool> {
        if smdp_address.trim().is_empty() {
            return Err(EuiccError::lpa("SM-DP+ address is empty"));
        }

        self.session(|rt| {
            let iccid = format!("8999{:015}", rt.card.next_seq_number);
            rt.card.profiles.push(LocalProfileInfo {
                iccid: iccid.clone(),
                nickname: String::new(),
                name: matching_id.unwrap_or("Downloaded profile").to_string(),
                provider_name: smdp_address.to_string(),
                state: ProfileState::Disabled,
                profile_class: ProfileClass::Operational,
            });
            rt.push_notification(NotificationOperation::Install, &iccid);
            Ok(true)
        })
    }
}
