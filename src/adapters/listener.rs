use crate::domain::ports::ProfilesChangedListener;
use async_trait::async_trait;
use std::sync::Mutex;

/// Logs profile changes and remembers which cards were refreshed.
#[derive(Debug, Default)]
pub struct TracingProfilesListener {
    refreshed: Mutex<Vec<i32>>,
}

impl TracingProfilesListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refreshed_cards(&self) -> Vec<i32> {
        self.refreshed
            .lock()
            .map(|cards| cards.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProfilesChangedListener for TracingProfilesListener {
    async fn refresh_cached_euicc_info(&self, card_id: i32) {
        tracing::info!("🔄 Refreshing cached eUICC info for card {}", card_id);
        if let Ok(mut cards) = self.refreshed.lock() {
            cards.push(card_id);
        }
    }
}
