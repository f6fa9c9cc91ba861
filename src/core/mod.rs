pub mod acquisition;
pub mod channel;
pub mod manager;
pub mod privileged;
pub mod profiles;
pub mod registry;
pub mod tracked;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::domain::model::{
    LocalProfileInfo, LocalProfileNotification, PortDescriptor, PrivilegeTier, SlotPort,
};
pub use crate::domain::ports::{
    CardEnumerator, LocalProfileAssistant, PrivilegedTransport, ProfilesChangedListener,
    UnprivilegedTransport,
};
pub use crate::utils::error::Result;
pub use acquisition::{AcquisitionStrategy, PrivilegedStrategy, UnprivilegedStrategy};
pub use channel::EuiccChannel;
pub use manager::{BaseChannelManager, ChannelLookup, ChannelManager, ManagerSettings};
pub use privileged::PrivilegedChannelManager;
pub use profiles::{ChannelListExt, LpaProfileExt, ProfileListExt, ProfileUndo};
pub use tracked::{run_tracked, TrackedOperationReport};
