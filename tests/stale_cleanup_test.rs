use anyhow::Result;
use euicc_channels::domain::model::PrivilegeTier;
use euicc_channels::{PrivilegedChannelManager, SimulatedBackend, SimulatedCard};
use std::sync::Arc;

fn cards() -> Vec<SimulatedCard> {
    vec![
        SimulatedCard::new(0, "89049032000000000000000000000001"),
        SimulatedCard::new(1, "89049032000000000000000000000002").removable(true),
    ]
}

async fn start(backend: &SimulatedBackend) -> PrivilegedChannelManager {
    let shared = Arc::new(backend.clone());
    PrivilegedChannelManager::start(shared.clone(), shared.clone(), shared).await
}

#[tokio::test]
async fn test_channels_leaked_by_previous_process_are_closed_on_start() -> Result<()> {
    // 第一個 process 開了 channel 但沒有關就結束
    let first = SimulatedBackend::new(cards());
    let manager = start(&first).await;
    manager.enumerate_channels().await;
    drop(manager);

    let leaked = first.snapshot();
    assert_eq!(leaked[0].open_logical_channels, vec![1]);

    let second = SimulatedBackend::new(leaked);
    let manager = start(&second).await;
    assert!(second.open_logical_channels(0).is_empty());
    assert!(second.open_logical_channels(1).is_empty());

    let channel = manager.find_channel_by_port(0, 0).await.unwrap();
    assert_eq!(channel.tier(), PrivilegeTier::Privileged);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_survives_every_close_failing() -> Result<()> {
    let backend = SimulatedBackend::new(cards());
    let manager = start(&backend).await;

    // 第二次呼叫不會再掃描
    manager.enumerate_channels().await;
    manager.close_all_stale_channels().await;
    assert_eq!(backend.open_logical_channels(0), vec![1]);
    Ok(())
}

#[tokio::test]
async fn test_pool_exhaustion_without_cleanup() -> Result<()> {
    let mut card = SimulatedCard::new(0, "89049032000000000000000000000001");
    card.max_logical_channels = 2;
    card.open_logical_channels = vec![1, 2];

    let backend = SimulatedBackend::new(vec![card.clone()]);
    let shared = Arc::new(backend.clone());
    let manager =
        PrivilegedChannelManager::new_privileged(shared.clone(), shared.clone(), shared);
    assert!(manager.find_channel_by_port(0, 0).await.is_none());

    let backend = SimulatedBackend::new(vec![card]);
    let manager = start(&backend).await;
    assert!(manager.find_channel_by_port(0, 0).await.is_some());
    Ok(())
}
