use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "euicc-channels")]
#[command(about = "Manage eUICC channels, profiles and notifications")]
pub struct CliConfig {
    #[arg(long, short, default_value = "euicc.toml")]
    pub config: PathBuf,

    #[arg(long, short, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[arg(long, help = "Write simulated card state back to the config file")]
    pub persist: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List every port and the channel opened for it
    Cards,
    /// List the profiles on a slot
    Profiles {
        #[arg(long, default_value = "0")]
        slot: i32,
        /// Include testing and provisioning profiles
        #[arg(long)]
        all: bool,
    },
    /// List pending notifications on a slot
    Notifications {
        #[arg(long, default_value = "0")]
        slot: i32,
    },
    Enable {
        iccid: String,
        #[command(flatten)]
        target: PortArgs,
    },
    Disable {
        iccid: String,
        #[command(flatten)]
        target: PortArgs,
    },
    /// Disable the active profile and enable another one
    Switch {
        iccid: String,
        #[command(flatten)]
        target: PortArgs,
    },
    Delete {
        iccid: String,
        #[command(flatten)]
        target: PortArgs,
    },
    /// Download a profile from an activation code (LPA:1$<smdp>$<matching id>)
    Download {
        activation_code: String,
        #[arg(long)]
        confirmation_code: Option<String>,
        #[command(flatten)]
        target: PortArgs,
    },
    Nickname {
        iccid: String,
        nickname: String,
        #[command(flatten)]
        target: PortArgs,
    },
    /// Acknowledge every pending notification on a port
    HandleNotifications {
        #[command(flatten)]
        target: PortArgs,
    },
    /// Close logical channels left open by a previous run
    Cleanup,
}

#[derive(Debug, Clone, Copy, clap::Args)]
pub struct PortArgs {
    #[arg(long, default_value = "0")]
    pub slot: i32,
    #[arg(long, default_value = "0")]
    pub port: i32,
    /// Skip the card refresh after enabling or disabling
    #[arg(long)]
    pub no_refresh: bool,
}
