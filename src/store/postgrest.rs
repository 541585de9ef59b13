use async_trait::async_trait;
use postgrest::Postgrest;
use tracing::debug;

use crate::config::SupabaseConfig;

use super::{GameRecord, GameStore, StoreError};

const LOG_TARGET: &str = "cardline::store::postgrest";
const GAMES_TABLE: &str = "games";

/// Supabase-backed store: one PostgREST row per game in the `games` table.
pub struct PostgrestGameStore {
    client: Postgrest,
}

impl PostgrestGameStore {
    pub fn new(config: &SupabaseConfig) -> Self {
        let endpoint = format!("{}/rest/v1", config.base_url.trim_end_matches('/'));
        let client = Postgrest::new(endpoint)
            .insert_header("apikey", config.api_key.as_str())
            .insert_header("Authorization", format!("Bearer {}", config.api_key));
        Self { client }
    }

    async fn execute(
        &self,
        builder: postgrest::Builder,
        what: &'static str,
    ) -> Result<String, StoreError> {
        let response = builder
            .execute()
            .await
            .map_err(|err| StoreError::Request(format!("{what}: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| StoreError::Request(format!("{what}: {err}")))?;
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl GameStore for PostgrestGameStore {
    async fn insert_game(&self, record: &GameRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(&[record])?;
        self.execute(self.client.from(GAMES_TABLE).insert(body), "insert game")
            .await?;
        debug!(target: LOG_TARGET, game_id = %record.id, "inserted game row");
        Ok(())
    }

    async fn fetch_game(&self, id: &str) -> Result<Option<GameRecord>, StoreError> {
        let body = self
            .execute(
                self.client.from(GAMES_TABLE).select("*").eq("id", id),
                "fetch game",
            )
            .await?;
        let mut rows: Vec<GameRecord> = serde_json::from_str(&body)?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn overwrite_game(&self, record: &GameRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        self.execute(
            self.client.from(GAMES_TABLE).eq("id", &record.id).update(body),
            "overwrite game",
        )
        .await?;
        debug!(target: LOG_TARGET, game_id = %record.id, "overwrote game row");
        Ok(())
    }
}
