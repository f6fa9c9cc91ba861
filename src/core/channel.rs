use crate::domain::model::{PortDescriptor, PrivilegeTier, SlotPort};
use crate::domain::ports::LocalProfileAssistant;
use std::fmt;
use std::sync::Arc;

/// An open APDU session to one port.
///
/// Channels are never mutated after construction. A reconnect produces a new
/// `EuiccChannel`; clones share the same underlying session.
#[derive(Clone)]
pub struct EuiccChannel {
    slot_port: SlotPort,
    logical_slot_id: i32,
    card_id: i32,
    removable: bool,
    tier: PrivilegeTier,
    lpa: Arc<dyn LocalProfileAssistant>,
}

impl EuiccChannel {
    pub fn new(
        port: &PortDescriptor,
        tier: PrivilegeTier,
        lpa: Arc<dyn LocalProfileAssistant>,
    ) -> Self {
        Self {
            slot_port: port.slot_port(),
            logical_slot_id: port.logical_slot_index(),
            card_id: port.card.card_id,
            removable: port.card.is_removable,
            tier,
            lpa,
        }
    }

    pub fn slot_id(&self) -> i32 {
        self.slot_port.slot_id
    }

    pub fn port_id(&self) -> i32 {
        self.slot_port.port_id
    }

    pub fn slot_port(&self) -> SlotPort {
        self.slot_port
    }

    pub fn logical_slot_id(&self) -> i32 {
        self.logical_slot_id
    }

    pub fn card_id(&self) -> i32 {
        self.card_id
    }

    pub fn is_removable(&self) -> bool {
        self.removable
    }

    pub fn tier(&self) -> PrivilegeTier {
        self.tier
    }

    pub fn lpa(&self) -> &Arc<dyn LocalProfileAssistant> {
        &self.lpa
    }

    pub fn valid(&self) -> bool {
        self.lpa.valid()
    }

    pub fn close(&self) {
        self.lpa.close()
    }

    /// 兩個 handle 是否指向同一個底層 session
    pub fn same_session(&self, other: &EuiccChannel) -> bool {
        Arc::ptr_eq(&self.lpa, &other.lpa)
    }
}

impl fmt::Debug for EuiccChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EuiccChannel")
            .field("slot_port", &self.slot_port)
            .field("logical_slot_id", &self.logical_slot_id)
            .field("card_id", &self.card_id)
            .field("removable", &self.removable)
            .field("tier", &self.tier)
            .field("lpa", &"<LocalProfileAssistant>")
            .finish()
    }
}
