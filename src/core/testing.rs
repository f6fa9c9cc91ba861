// Hand-written collaborators for the core unit tests.

use crate::domain::model::{
    LocalProfileInfo, LocalProfileNotification, NotificationOperation, PortDescriptor,
    ProfileClass, ProfileState, UiccCardInfo, UiccPortInfo,
};
use crate::domain::ports::{
    CardEnumerator, LocalProfileAssistant, PrivilegedTransport, UnprivilegedTransport,
};
use crate::utils::error::{EuiccError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn card(slot: i32, removable: bool, euicc: bool, ports: &[(i32, i32)]) -> UiccCardInfo {
    UiccCardInfo {
        physical_slot_index: slot,
        card_id: slot + 1,
        is_removable: removable,
        is_euicc: euicc,
        ports: ports
            .iter()
            .map(|&(port_index, logical_slot_index)| UiccPortInfo {
                port_index,
                logical_slot_index,
            })
            .collect(),
    }
}

pub fn port(slot: i32, port_index: i32, removable: bool, euicc: bool) -> PortDescriptor {
    let card = card(slot, removable, euicc, &[(port_index, slot)]);
    let port = card.ports[0].clone();
    PortDescriptor { card, port }
}

pub fn profile(iccid: &str, name: &str, state: ProfileState) -> LocalProfileInfo {
    LocalProfileInfo {
        iccid: iccid.to_string(),
        nickname: String::new(),
        name: name.to_string(),
        provider_name: String::new(),
        state,
        profile_class: ProfileClass::Operational,
    }
}

pub fn notification(seq_number: u64) -> LocalProfileNotification {
    LocalProfileNotification {
        seq_number,
        operation: NotificationOperation::Enable,
        address: "smdp.example.com".to_string(),
        iccid: None,
    }
}

#[derive(Default)]
pub struct MockCard {
    pub profiles: Vec<LocalProfileInfo>,
    pub notifications: Vec<LocalProfileNotification>,
    pub handled: Vec<u64>,
    pub enable_calls: Vec<(String, bool)>,
    pub disable_calls: Vec<(String, bool)>,
    pub fail_handle: bool,
}

pub type SharedCard = Arc<Mutex<MockCard>>;

pub fn shared_card(profiles: Vec<LocalProfileInfo>, seqs: &[u64]) -> SharedCard {
    Arc::new(Mutex::new(MockCard {
        profiles,
        notifications: seqs.iter().copied().map(notification).collect(),
        ..MockCard::default()
    }))
}

/// One session over a shared mock card.
pub struct MockLpa {
    card: SharedCard,
    valid: AtomicBool,
}

impl MockLpa {
    pub fn new(card: SharedCard) -> Arc<Self> {
        Arc::new(Self {
            card,
            valid: AtomicBool::new(true),
        })
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    fn set_state(&self, iccid: &str, state: ProfileState) -> bool {
        let mut card = self.card.lock().unwrap();
        match card.profiles.iter_mut().find(|p| p.iccid == iccid) {
            Some(profile) => {
                profile.state = state;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LocalProfileAssistant for MockLpa {
    fn valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.invalidate();
    }

    async fn eid(&self) -> Result<String> {
        Ok("89049032000000000000000000000001".to_string())
    }

    async fn profiles(&self) -> Result<Vec<LocalProfileInfo>> {
        Ok(self.card.lock().unwrap().profiles.clone())
    }

    async fn notifications(&self) -> Result<Vec<LocalProfileNotification>> {
        let mut notifications = self.card.lock().unwrap().notifications.clone();
        notifications.sort_by(|a, b| b.seq_number.cmp(&a.seq_number));
        Ok(notifications)
    }

    async fn handle_notification(&self, seq_number: u64) -> Result<bool> {
        let mut card = self.card.lock().unwrap();
        if card.fail_handle {
            return Err(EuiccError::lpa("notification upload failed"));
        }
        card.notifications.retain(|n| n.seq_number != seq_number);
        card.handled.push(seq_number);
        Ok(true)
    }

    async fn enable_profile(&self, iccid: &str, refresh: bool) -> Result<bool> {
        self.card
            .lock()
            .unwrap()
            .enable_calls
            .push((iccid.to_string(), refresh));
        Ok(self.set_state(iccid, ProfileState::Enabled))
    }

    async fn disable_profile(&self, iccid: &str, refresh: bool) -> Result<bool> {
        self.card
            .lock()
            .unwrap()
            .disable_calls
            .push((iccid.to_string(), refresh));
        Ok(self.set_state(iccid, ProfileState::Disabled))
    }

    async fn delete_profile(&self, iccid: &str) -> Result<bool> {
        let mut card = self.card.lock().unwrap();
        let before = card.profiles.len();
        card.profiles.retain(|p| p.iccid != iccid);
        Ok(card.profiles.len() != before)
    }

    async fn set_nickname(&self, iccid: &str, nickname: &str) -> Result<bool> {
        let mut card = self.card.lock().unwrap();
        match card.profiles.iter_mut().find(|p| p.iccid == iccid) {
            Some(profile) => {
                profile.nickname = nickname.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn download_profile(
        &self,
        _smdp_address: &str,
        _matching_id: Option<&str>,
        _confirmation_code: Option<&str>,
    ) -> Result<bool> {
        Ok(true)
    }
}

pub struct MockUnprivilegedTransport {
    works: bool,
    card: SharedCard,
    attempts: AtomicUsize,
    sessions: Mutex<Vec<Arc<MockLpa>>>,
}

impl MockUnprivilegedTransport {
    pub fn working() -> Self {
        Self::with_card(true, SharedCard::default())
    }

    pub fn broken() -> Self {
        Self::with_card(false, SharedCard::default())
    }

    pub fn with_card(works: bool, card: SharedCard) -> Self {
        Self {
            works,
            card,
            attempts: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<MockLpa>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl UnprivilegedTransport for MockUnprivilegedTransport {
    async fn open(&self, port: &PortDescriptor) -> Result<Arc<dyn LocalProfileAssistant>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.works {
            return Err(EuiccError::transport(
                port.card.physical_slot_index,
                "no ISD-R applet",
            ));
        }
        let session = MockLpa::new(self.card.clone());
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub struct MockPrivilegedTransport {
    works: bool,
    fail_close: bool,
    card: SharedCard,
    attempts: AtomicUsize,
    closes: Mutex<Vec<(i32, i32)>>,
}

impl MockPrivilegedTransport {
    pub fn working() -> Self {
        Self::with_card(true, SharedCard::default())
    }

    /// 模擬平台沒有 APDU 介面
    pub fn unavailable() -> Self {
        Self::with_card(false, SharedCard::default())
    }

    pub fn with_card(works: bool, card: SharedCard) -> Self {
        Self {
            works,
            fail_close: false,
            card,
            attempts: AtomicUsize::new(0),
            closes: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> Vec<(i32, i32)> {
        self.closes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrivilegedTransport for MockPrivilegedTransport {
    async fn open(&self, _port: &PortDescriptor) -> Result<Arc<dyn LocalProfileAssistant>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.works {
            return Err(EuiccError::invalid_argument("APDU interface unavailable"));
        }
        Ok(MockLpa::new(self.card.clone()))
    }

    async fn close_logical_channel(&self, physical_slot_index: i32, channel: i32) -> Result<()> {
        self.closes
            .lock()
            .unwrap()
            .push((physical_slot_index, channel));
        if self.fail_close {
            return Err(EuiccError::transport(physical_slot_index, "channel not open"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEnumerator {
    cards: Mutex<Vec<UiccCardInfo>>,
    fail: AtomicBool,
}

impl MockEnumerator {
    pub fn new(cards: Vec<UiccCardInfo>) -> Self {
        Self {
            cards: Mutex::new(cards),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_cards(&self, cards: Vec<UiccCardInfo>) {
        *self.cards.lock().unwrap() = cards;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CardEnumerator for MockEnumerator {
    async fn uicc_cards(&self) -> Result<Vec<UiccCardInfo>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EuiccError::transport(-1, "telephony service not ready"));
        }
        Ok(self.cards.lock().unwrap().clone())
    }
}
