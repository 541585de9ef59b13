use async_trait::async_trait;

pub mod in_memory;
pub mod postgrest;
pub mod record;

pub use in_memory::InMemoryGameStore;
pub use postgrest::PostgrestGameStore;
pub use record::GameRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("datastore request failed: {0}")]
    Request(String),
    #[error("datastore rejected the write ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("failed to decode game record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One row per game in the shared datastore.
///
/// Writes are whole-record overwrites with last-writer-wins semantics: there
/// is no version token and no compare-and-swap, so two clients racing on the
/// same game can silently lose one update. Reads through the realtime feed
/// reconcile that eventually.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Create the row. A duplicate id is a rejected write.
    async fn insert_game(&self, record: &GameRecord) -> Result<(), StoreError>;

    async fn fetch_game(&self, id: &str) -> Result<Option<GameRecord>, StoreError>;

    /// Replace the row wholesale. Overwriting an id that does not exist is a
    /// silent no-op, matching `UPDATE … WHERE id = …` against a missing row.
    async fn overwrite_game(&self, record: &GameRecord) -> Result<(), StoreError>;
}
