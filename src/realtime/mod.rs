use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::GameRecord;

pub mod channel;

pub use channel::{RealtimeClient, RealtimeConfig, RealtimeFeed};

/// Source of committed-change deliveries for one game row.
///
/// Every delivery is the full new record, including the subscriber's own
/// writes once committed. Propagation is eventually consistent.
#[async_trait]
pub trait GameFeed: Send + Sync {
    async fn subscribe(&self, game_id: &str) -> Result<GameSubscription>;
}

/// An owned, single-game subscription. Dropping it (or calling [`cancel`])
/// stops the pump task; a session replaces its subscription on every
/// re-subscribe so at most one is live per client.
///
/// [`cancel`]: GameSubscription::cancel
pub struct GameSubscription {
    game_id: String,
    updates: mpsc::Receiver<GameRecord>,
    stop: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl GameSubscription {
    pub fn new(
        game_id: impl Into<String>,
        updates: mpsc::Receiver<GameRecord>,
        stop: CancellationToken,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            updates,
            stop,
            pump: Some(pump),
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Next committed record, or `None` once the subscription is torn down.
    pub async fn recv(&mut self) -> Option<GameRecord> {
        self.updates.recv().await
    }

    pub fn cancel(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.pump.take() {
            handle.abort();
        }
    }
}

impl Drop for GameSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
