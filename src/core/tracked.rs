//! Tracked operations: profile mutations whose side-effect notifications are
//! acknowledged once the mutation returns.
//!
//! The channel is looked up again before every step. A refresh issued by the
//! operation can drop the session, and the manager hands out a different
//! channel after the reconnect.

use crate::core::manager::ChannelLookup;
use crate::domain::model::{LocalProfileNotification, SlotPort};
use crate::utils::error::{EuiccError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;

#[derive(Debug, Clone, Serialize)]
pub struct TrackedOperationReport {
    pub slot_port: SlotPort,
    /// Highest sequence number seen before the operation ran.
    pub baseline: u64,
    /// Whether the operation asked for reconciliation.
    pub reconciled: bool,
    /// Sequence numbers acknowledged, in the order they were handled.
    pub handled: Vec<u64>,
    /// Reconciliation error that was logged and swallowed.
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 0 表示佇列為空
pub fn latest_sequence(notifications: &[LocalProfileNotification]) -> u64 {
    notifications
        .iter()
        .map(|n| n.seq_number)
        .max()
        .unwrap_or(0)
}

/// Runs `operation` against (slot, port) and, if it returns `true`,
/// acknowledges every notification newer than the pre-operation baseline in
/// ascending sequence order.
///
/// When `operation` returns, a channel for the same port must be obtainable
/// again; waiting for a reconnect is the operation's job. Errors from the
/// baseline read and from `operation` itself are returned. Errors while
/// acknowledging are only logged and recorded in the report.
pub async fn run_tracked<L, F, Fut>(
    lookup: &L,
    slot_id: i32,
    port_id: i32,
    operation: F,
) -> Result<TrackedOperationReport>
where
    L: ChannelLookup + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let slot_port = SlotPort::new(slot_id, port_id);
    let started_at = Utc::now();

    let baseline = {
        let channel = lookup
            .find_channel_by_port(slot_id, port_id)
            .await
            .ok_or(EuiccError::ChannelUnavailable { slot_id, port_id })?;
        latest_sequence(&channel.lpa().notifications().await?)
    };
    tracing::debug!("Latest notification is {} before operation", baseline);

    let mut report = TrackedOperationReport {
        slot_port,
        baseline,
        reconciled: false,
        handled: Vec::new(),
        failure: None,
        started_at,
        finished_at: started_at,
    };

    if operation().await? {
        tracing::debug!("Operation has requested notification handling");
        report.reconciled = true;

        if let Err(e) = reconcile(lookup, slot_port, baseline, &mut report.handled).await {
            tracing::warn!(
                "Notification handling on {} stopped after {} acknowledged: {}",
                slot_port,
                report.handled.len(),
                e
            );
            report.failure = Some(e.to_string());
        }
    }

    report.finished_at = Utc::now();
    tracing::debug!("Operation complete");
    Ok(report)
}

async fn reconcile<L>(
    lookup: &L,
    slot_port: SlotPort,
    baseline: u64,
    handled: &mut Vec<u64>,
) -> Result<()>
where
    L: ChannelLookup + ?Sized,
{
    let SlotPort { slot_id, port_id } = slot_port;
    let unavailable = || EuiccError::ChannelUnavailable { slot_id, port_id };

    let mut pending: Vec<LocalProfileNotification> = {
        let channel = lookup
            .find_channel_by_port(slot_id, port_id)
            .await
            .ok_or_else(unavailable)?;
        channel
            .lpa()
            .notifications()
            .await?
            .into_iter()
            .filter(|n| n.seq_number > baseline)
            .collect()
    };
    pending.sort_by_key(|n| n.seq_number);

    for notification in pending {
        tracing::debug!("Handling notification {}", notification);
        // 每次都重新取得 channel：前一次處理可能改變了卡片狀態
        let channel = lookup
            .find_channel_by_port(slot_id, port_id)
            .await
            .ok_or_else(unavailable)?;

        if channel
            .lpa()
            .handle_notification(notification.seq_number)
            .await?
        {
            handled.push(notification.seq_number);
        } else {
            tracing::warn!("Card refused to handle notification {}", notification);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::EuiccChannel;
    use crate::core::testing::{
        notification, port, profile, shared_card, MockLpa, SharedCard,
    };
    use crate::domain::model::{PrivilegeTier, ProfileState};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Lookup whose session can be swapped to imitate a reconnect.
    struct SwappableLookup {
        card: SharedCard,
        current: Mutex<Option<Arc<MockLpa>>>,
        lookups: Mutex<usize>,
    }

    impl SwappableLookup {
        fn new(card: SharedCard) -> Self {
            let session = MockLpa::new(card.clone());
            Self {
                card,
                current: Mutex::new(Some(session)),
                lookups: Mutex::new(0),
            }
        }

        fn reconnect(&self) -> Arc<MockLpa> {
            let mut current = self.current.lock().unwrap();
            if let Some(old) = current.as_ref() {
                old.invalidate();
            }
            let session = MockLpa::new(self.card.clone());
            *current = Some(session.clone());
            session
        }

        fn disconnect(&self) {
            *self.current.lock().unwrap() = None;
        }

        fn lookups(&self) -> usize {
            *self.lookups.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChannelLookup for SwappableLookup {
        async fn find_channel_by_port(&self, slot_id: i32, port_id: i32) -> Option<EuiccChannel> {
            *self.lookups.lock().unwrap() += 1;
            let session = self.current.lock().unwrap().clone()?;
            Some(EuiccChannel::new(
                &port(slot_id, port_id, false, true),
                PrivilegeTier::Privileged,
                session,
            ))
        }
    }

    fn push(card: &SharedCard, seqs: &[u64]) {
        let mut card = card.lock().unwrap();
        card.notifications
            .extend(seqs.iter().copied().map(notification));
    }

    #[tokio::test]
    async fn test_false_operation_issues_no_acknowledgements() {
        let card = shared_card(Vec::new(), &[1, 2]);
        let lookup = SwappableLookup::new(card.clone());

        let report = run_tracked(&lookup, 0, 0, || {
            let card = card.clone();
            async move {
                push(&card, &[3]);
                Ok(false)
            }
        })
        .await
        .unwrap();

        assert!(!report.reconciled);
        assert!(report.handled.is_empty());
        let card = card.lock().unwrap();
        assert!(card.handled.is_empty());
        assert_eq!(card.notifications.len(), 3);
    }

    #[tokio::test]
    async fn test_acknowledges_only_new_notifications_in_order() {
        let card = shared_card(Vec::new(), &[2, 4, 1, 3]);
        let lookup = SwappableLookup::new(card.clone());

        let report = run_tracked(&lookup, 0, 0, || {
            let card = card.clone();
            async move {
                push(&card, &[7, 5, 6]);
                Ok(true)
            }
        })
        .await
        .unwrap();

        assert_eq!(report.baseline, 4);
        assert_eq!(report.handled, vec![5, 6, 7]);
        assert!(report.failure.is_none());
        assert_eq!(card.lock().unwrap().handled, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn test_empty_queue_baseline_is_zero() {
        let card = shared_card(Vec::new(), &[]);
        let lookup = SwappableLookup::new(card.clone());

        let report = run_tracked(&lookup, 0, 0, || {
            let card = card.clone();
            async move {
                push(&card, &[1]);
                Ok(true)
            }
        })
        .await
        .unwrap();

        assert_eq!(report.baseline, 0);
        assert_eq!(report.handled, vec![1]);
    }

    #[tokio::test]
    async fn test_reconnect_during_operation_uses_new_session() {
        let card = shared_card(
            vec![profile("8901000000000000001", "Carrier A", ProfileState::Enabled)],
            &[10],
        );
        let lookup = Arc::new(SwappableLookup::new(card.clone()));

        let report = run_tracked(lookup.as_ref(), 0, 0, || {
            let lookup = lookup.clone();
            let card = card.clone();
            async move {
                push(&card, &[11, 12]);
                // refresh：舊 session 失效，換成新的
                lookup.reconnect();
                Ok(true)
            }
        })
        .await
        .unwrap();

        assert_eq!(report.handled, vec![11, 12]);
        // 基準一次、佇列一次、每則通知各一次
        assert_eq!(lookup.lookups(), 4);
    }

    #[tokio::test]
    async fn test_acknowledgement_failure_is_swallowed() {
        let card = shared_card(Vec::new(), &[1]);
        let lookup = SwappableLookup::new(card.clone());

        let report = run_tracked(&lookup, 0, 0, || {
            let card = card.clone();
            async move {
                push(&card, &[2]);
                card.lock().unwrap().fail_handle = true;
                Ok(true)
            }
        })
        .await
        .unwrap();

        assert!(report.reconciled);
        assert!(report.handled.is_empty());
        assert!(report.failure.is_some());
    }

    #[tokio::test]
    async fn test_missing_channel_after_operation_is_swallowed() {
        let card = shared_card(Vec::new(), &[]);
        let lookup = Arc::new(SwappableLookup::new(card.clone()));

        let report = run_tracked(lookup.as_ref(), 0, 0, || {
            let lookup = lookup.clone();
            async move {
                lookup.disconnect();
                Ok(true)
            }
        })
        .await
        .unwrap();

        assert!(report.failure.is_some());
    }

    #[tokio::test]
    async fn test_operation_error_propagates() {
        let card = shared_card(Vec::new(), &[]);
        let lookup = SwappableLookup::new(card);

        let result = run_tracked(&lookup, 0, 0, || async {
            Err::<bool, _>(EuiccError::lpa("profile busy"))
        })
        .await;

        assert!(matches!(result, Err(EuiccError::LpaError { .. })));
    }

    #[tokio::test]
    async fn test_missing_channel_before_operation_is_an_error() {
        let card = shared_card(Vec::new(), &[]);
        let lookup = SwappableLookup::new(card);
        lookup.disconnect();

        let result = run_tracked(&lookup, 0, 0, || async { Ok(true) }).await;
        assert!(matches!(
            result,
            Err(EuiccError::ChannelUnavailable { .. })
        ));
    }
}
