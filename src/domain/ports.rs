use crate::domain::model::{
    LocalProfileInfo, LocalProfileNotification, PortDescriptor, UiccCardInfo,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Lists physical cards and their logical ports.
#[async_trait]
pub trait CardEnumerator: Send + Sync {
    async fn uicc_cards(&self) -> Result<Vec<UiccCardInfo>>;
}

/// Profile-management surface of one open APDU session.
///
/// `notifications()` is ordered by sequence number, but callers must not
/// rely on the direction; compare `seq_number` values instead.
#[async_trait]
pub trait LocalProfileAssistant: Send + Sync {
    /// 底層 APDU 通道是否仍可用 (refresh 之後會失效)
    fn valid(&self) -> bool;

    /// 釋放底層 logical channel；重複呼叫必須安全
    fn close(&self);

    async fn eid(&self) -> Result<String>;

    async fn profiles(&self) -> Result<Vec<LocalProfileInfo>>;

    async fn notifications(&self) -> Result<Vec<LocalProfileNotification>>;

    async fn handle_notification(&self, seq_number: u64) -> Result<bool>;

    async fn enable_profile(&self, iccid: &str, refresh: bool) -> Result<bool>;

    async fn disable_profile(&self, iccid: &str, refresh: bool) -> Result<bool>;

    async fn delete_profile(&self, iccid: &str) -> Result<bool>;

    async fn set_nickname(&self, iccid: &str, nickname: &str) -> Result<bool>;

    async fn download_profile(
        &self,
        smdp_address: &str,
        matching_id: Option<&str>,
        confirmation_code: Option<&str>,
    ) -> Result<bool>;
}

/// Direct card-OS channel (OMAPI). Needs no elevated access.
#[async_trait]
pub trait UnprivilegedTransport: Send + Sync {
    async fn open(&self, port: &PortDescriptor) -> Result<Arc<dyn LocalProfileAssistant>>;
}

/// Modem / telephony-stack channel. Needs elevated access.
///
/// `open` returns `EuiccError::InvalidArgument` when the platform has no APDU
/// interface for the port.
#[async_trait]
pub trait PrivilegedTransport: Send + Sync {
    async fn open(&self, port: &PortDescriptor) -> Result<Arc<dyn LocalProfileAssistant>>;

    async fn close_logical_channel(&self, physical_slot_index: i32, channel: i32) -> Result<()>;
}

/// Subscription bookkeeping that caches per-card metadata.
#[async_trait]
pub trait ProfilesChangedListener: Send + Sync {
    async fn refresh_cached_euicc_info(&self, card_id: i32);
}
