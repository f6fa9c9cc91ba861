use clap::Parser;
use euicc_channels::core::{AcquisitionStrategy, ChannelListExt, ProfileListExt};
use euicc_channels::utils::error::{EuiccError, ErrorSeverity, Result};
use euicc_channels::utils::{logger, validation::Validate};
use euicc_channels::{
    AppConfig, BaseChannelManager, ChannelManager, CliConfig, Command, PrivilegedChannelManager,
    ProfileOperations, SimulatedBackend, TracingProfilesListener, TrackedOperationReport,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting euicc-channels CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = execute(&cli).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn execute(cli: &CliConfig) -> Result<()> {
    let mut config = AppConfig::from_file(&cli.config)?;
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        return Err(e);
    }
    tracing::info!(
        "📁 Loaded {} simulated card(s) from {}",
        config.cards.len(),
        cli.config.display()
    );

    let backend = Arc::new(SimulatedBackend::new(config.cards.clone()));
    let listener = Arc::new(TracingProfilesListener::new());

    let result = if config.manager.privileged {
        let manager = if config.manager.close_stale_on_start {
            PrivilegedChannelManager::start(backend.clone(), backend.clone(), backend.clone())
                .await
        } else {
            PrivilegedChannelManager::new_privileged(
                backend.clone(),
                backend.clone(),
                backend.clone(),
            )
        }
        .with_settings(config.manager_settings())
        .with_profiles_changed_listener(listener);

        let result = match &cli.command {
            Command::Cleanup => {
                manager.close_all_stale_channels().await;
                println!("🧹 Stale channel cleanup complete");
                Ok(())
            }
            command => run(&manager, command).await,
        };
        manager.invalidate().await;
        result
    } else {
        let manager = BaseChannelManager::new(backend.clone(), backend.clone())
            .with_settings(config.manager_settings())
            .with_profiles_changed_listener(listener);

        let result = match &cli.command {
            Command::Cleanup => Err(EuiccError::ConfigError {
                message: "stale channel cleanup needs manager.privileged = true".to_string(),
            }),
            command => run(&manager, command).await,
        };
        manager.invalidate().await;
        result
    };

    if cli.persist {
        config.cards = backend.snapshot();
        config.save(&cli.config)?;
        tracing::info!("📁 Card state saved to {}", cli.config.display());
    }

    result
}

async fn run<S: AcquisitionStrategy>(manager: &ChannelManager<S>, command: &Command) -> Result<()> {
    let operations = ProfileOperations::new(manager);

    match command {
        Command::Cards => {
            let channels = manager.enumerate_channels().await;
            if channels.is_empty() {
                println!("No operational eUICC found");
            }
            for channel in &channels {
                let eid = channel.lpa().eid().await?;
                println!(
                    "{} (logical slot {}, card {}): {} via {} tier",
                    channel.slot_port(),
                    channel.logical_slot_id(),
                    channel.card_id(),
                    eid,
                    channel.tier()
                );
            }
            if channels.has_multiple_chips() {
                println!("💡 Multiple eUICC chips present, pass --slot to choose one");
            }
        }
        Command::Profiles { slot, all } => {
            let profiles = operations.profiles(*slot).await?;
            let shown = if *all {
                profiles.iter().collect()
            } else {
                profiles.operational()
            };
            for profile in shown {
                let marker = if profile.is_enabled() { "*" } else { " " };
                println!("{} {} {}", marker, profile.iccid, profile.display_name());
            }
        }
        Command::Notifications { slot } => {
            for notification in operations.notifications(*slot).await? {
                println!("{}", notification);
            }
        }
        Command::Enable { iccid, target } => {
            let report = operations
                .enable(target.slot, target.port, iccid, !target.no_refresh)
                .await?;
            print_report("Enabled", iccid, &report);
        }
        Command::Disable { iccid, target } => {
            let report = operations
                .disable(target.slot, target.port, iccid, !target.no_refresh)
                .await?;
            print_report("Disabled", iccid, &report);
        }
        Command::Switch { iccid, target } => {
            let report = operations
                .switch(target.slot, target.port, iccid, !target.no_refresh)
                .await?;
            print_report("Switched to", iccid, &report);
        }
        Command::Delete { iccid, target } => {
            let report = operations.delete(target.slot, target.port, iccid).await?;
            print_report("Deleted", iccid, &report);
        }
        Command::Download {
            activation_code,
            confirmation_code,
            target,
        } => {
            let report = operations
                .download(
                    target.slot,
                    target.port,
                    activation_code,
                    confirmation_code.as_deref(),
                )
                .await?;
            print_report("Downloaded", activation_code, &report);
        }
        Command::Nickname {
            iccid,
            nickname,
            target,
        } => {
            operations
                .set_nickname(target.slot, target.port, iccid, nickname)
                .await?;
            println!("✅ Renamed {} to {}", iccid, nickname);
        }
        Command::HandleNotifications { target } => {
            let handled = operations
                .handle_pending_notifications(target.slot, target.port)
                .await?;
            println!("✅ Acknowledged {} notification(s): {:?}", handled.len(), handled);
        }
        Command::Cleanup => {
            return Err(EuiccError::ConfigError {
                message: "stale channel cleanup needs manager.privileged = true".to_string(),
            });
        }
    }

    Ok(())
}

fn print_report(action: &str, subject: &str, report: &TrackedOperationReport) {
    println!("✅ {} {}", action, subject);
    if report.reconciled {
        println!(
            "   Acknowledged {} notification(s) after #{}: {:?}",
            report.handled.len(),
            report.baseline,
            report.handled
        );
    }
    if let Some(failure) = &report.failure {
        println!("⚠️  Notification handling stopped early: {}", failure);
    }
    tracing::debug!(
        "Operation on {} took {} ms",
        report.slot_port,
        (report.finished_at - report.started_at).num_milliseconds()
    );
    if let Ok(json) = serde_json::to_string(report) {
        tracing::debug!("Report: {}", json);
    }
}
