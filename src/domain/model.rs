use serde::{Deserialize, Serialize};
use std::fmt;

/// (physical slot, port) 組合，registry 的鍵
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotPort {
    pub slot_id: i32,
    pub port_id: i32,
}

impl SlotPort {
    pub fn new(slot_id: i32, port_id: i32) -> Self {
        Self { slot_id, port_id }
    }
}

impl fmt::Display for SlotPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} port {}", self.slot_id, self.port_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeTier {
    /// 直接透過卡片 OS 介面 (OMAPI)
    Unprivileged,
    /// 透過 modem / telephony stack
    Privileged,
}

impl fmt::Display for PrivilegeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprivileged => f.write_str("unprivileged"),
            Self::Privileged => f.write_str("privileged"),
        }
    }
}

/// Logical slot index reported for a port that is not mapped to any modem slot.
pub const INACTIVE_LOGICAL_SLOT: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiccPortInfo {
    pub port_index: i32,
    pub logical_slot_index: i32,
}

impl UiccPortInfo {
    pub fn is_active(&self) -> bool {
        self.logical_slot_index != INACTIVE_LOGICAL_SLOT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiccCardInfo {
    pub physical_slot_index: i32,
    pub card_id: i32,
    pub is_removable: bool,
    pub is_euicc: bool,
    pub ports: Vec<UiccPortInfo>,
}

/// A port together with the card it belongs to, as handed to the acquisition tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub card: UiccCardInfo,
    pub port: UiccPortInfo,
}

impl PortDescriptor {
    pub fn slot_port(&self) -> SlotPort {
        SlotPort::new(self.card.physical_slot_index, self.port.port_index)
    }

    pub fn logical_slot_index(&self) -> i32 {
        self.port.logical_slot_index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileState {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileClass {
    Operational,
    Testing,
    Provisioning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProfileInfo {
    pub iccid: String,
    #[serde(default)]
    pub nickname: String,
    pub name: String,
    #[serde(default)]
    pub provider_name: String,
    pub state: ProfileState,
    #[serde(rename = "class")]
    pub profile_class: ProfileClass,
}

impl LocalProfileInfo {
    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            &self.name
        } else {
            &self.nickname
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ProfileState::Enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOperation {
    Install,
    Enable,
    Disable,
    Delete,
}

impl fmt::Display for NotificationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProfileNotification {
    pub seq_number: u64,
    pub operation: NotificationOperation,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
}

impl fmt::Display for LocalProfileNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} -> {}",
            self.seq_number, self.operation, self.address
        )?;
        if let Some(iccid) = &self.iccid {
            write!(f, " ({})", iccid)?;
        }
        Ok(())
    }
}

/// `LPA:1$<SM-DP+ address>$<matching id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationCode {
    pub smdp_address: String,
    pub matching_id: Option<String>,
}

impl ActivationCode {
    pub fn parse(input: &str) -> Option<Self> {
        let body = input.trim().strip_prefix("LPA:")?;
        let mut parts = body.split('$');
        if parts.next()? != "1" {
            return None;
        }
        let smdp_address = parts.next().filter(|s| !s.is_empty())?.to_string();
        let matching_id = parts
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Some(Self {
            smdp_address,
            matching_id,
        })
    }
}
