use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::GameId;
use crate::realtime::{GameFeed, GameSubscription};

use super::{GameRecord, GameStore, StoreError};

const LOG_TARGET: &str = "cardline::store::memory";
const CHANGE_CAPACITY: usize = 64;

/// In-process games table used by tests and the demo binary.
///
/// Committed writes are mirrored onto a broadcast feed, so subscribers see
/// the same delivery semantics as the Supabase channel: every committed
/// change, the writer's own included.
pub struct InMemoryGameStore {
    games: DashMap<GameId, GameRecord>,
    changes: broadcast::Sender<GameRecord>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            games: DashMap::new(),
            changes,
        }
    }

    fn commit(&self, record: GameRecord) {
        self.games.insert(record.id.clone(), record.clone());
        // Send fails only when nobody subscribes yet; deliveries are best
        // effort just like the real channel.
        let _ = self.changes.send(record);
    }
}

impl Default for InMemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn insert_game(&self, record: &GameRecord) -> Result<(), StoreError> {
        if self.games.contains_key(&record.id) {
            return Err(StoreError::Rejected {
                status: 409,
                body: format!("duplicate key: game {}", record.id),
            });
        }
        self.commit(record.clone());
        Ok(())
    }

    async fn fetch_game(&self, id: &str) -> Result<Option<GameRecord>, StoreError> {
        Ok(self.games.get(id).map(|entry| entry.value().clone()))
    }

    async fn overwrite_game(&self, record: &GameRecord) -> Result<(), StoreError> {
        if !self.games.contains_key(&record.id) {
            debug!(
                target: LOG_TARGET,
                game_id = %record.id,
                "overwrite of missing row is a no-op"
            );
            return Ok(());
        }
        self.commit(record.clone());
        Ok(())
    }
}

#[async_trait]
impl GameFeed for InMemoryGameStore {
    async fn subscribe(&self, game_id: &str) -> Result<GameSubscription> {
        let game_id = game_id.to_string();
        let stop = CancellationToken::new();
        let (tx, rx) = mpsc::channel(CHANGE_CAPACITY);

        let mut stream = BroadcastStream::new(self.changes.subscribe());
        let pump_stop = stop.clone();
        let pump_game = game_id.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_stop.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(record)) if record.id == pump_game => {
                            if tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(lag)) => {
                            warn!(
                                target: LOG_TARGET,
                                game_id = %pump_game,
                                error = %lag,
                                "change feed lagged, deliveries dropped"
                            );
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(GameSubscription::new(game_id, rx, stop, pump))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GameStatus, Player};
    use std::time::Duration;
    use tokio::time::timeout;

    fn record(id: &str) -> GameRecord {
        GameRecord {
            id: id.into(),
            status: GameStatus::Waiting,
            players: vec![Player::new("a1b2c3d", "Ada")],
            current_round: 0,
            total_rounds: 10,
            revealed_card: None,
            organizer: "a1b2c3d".into(),
            winner: None,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = InMemoryGameStore::new();
        store.insert_game(&record("g1")).await.unwrap();
        let err = store.insert_game(&record("g1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn overwrite_of_missing_row_is_a_no_op() {
        let store = InMemoryGameStore::new();
        store.overwrite_game(&record("ghost")).await.unwrap();
        assert_eq!(store.fetch_game("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn feed_delivers_own_writes_filtered_by_game() {
        let store = InMemoryGameStore::new();
        let mut sub = store.subscribe("g1").await.unwrap();

        store.insert_game(&record("other")).await.unwrap();
        store.insert_game(&record("g1")).await.unwrap();

        let mut update = record("g1");
        update.status = GameStatus::Playing;
        store.overwrite_game(&update).await.unwrap();

        let first = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert_eq!(first.unwrap().status, GameStatus::Waiting);
        let second = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert_eq!(second.unwrap().status, GameStatus::Playing);
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_delivering() {
        let store = InMemoryGameStore::new();
        let mut sub = store.subscribe("g1").await.unwrap();
        sub.cancel();

        store.insert_game(&record("g1")).await.unwrap();
        assert_eq!(sub.recv().await, None);
    }
}
