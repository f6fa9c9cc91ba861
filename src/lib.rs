pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::{SimulatedBackend, SimulatedCard, TracingProfilesListener};
pub use app::ProfileOperations;
pub use config::AppConfig;
pub use core::{
    run_tracked, BaseChannelManager, ChannelLookup, ChannelManager, EuiccChannel,
    ManagerSettings, PrivilegedChannelManager, ProfileUndo, TrackedOperationReport,
};
pub use utils::error::{EuiccError, Result};
