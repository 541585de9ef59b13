use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::engine::Player;

const LOG_TARGET: &str = "cardline::session::identity";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity file is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Session-scoped identity persistence: which player this client is in a
/// given game. Never a source of truth, only the key used to silently
/// rejoin after a reload.
pub trait IdentityStore: Send + Sync {
    fn save(&self, game_id: &str, player: &Player) -> Result<(), IdentityError>;
    fn load(&self, game_id: &str) -> Result<Option<Player>, IdentityError>;
}

/// localStorage analog: one JSON map file binding `game_<id>` keys to
/// serialized players.
pub struct FileIdentityStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn key(game_id: &str) -> String {
        format!("game_{game_id}")
    }

    fn read_map(&self) -> Result<BTreeMap<String, Player>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl IdentityStore for FileIdentityStore {
    fn save(&self, game_id: &str, player: &Player) -> Result<(), IdentityError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        map.insert(Self::key(game_id), player.clone());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&map)?)?;
        debug!(target: LOG_TARGET, game_id, player_id = %player.id, "saved local identity");
        Ok(())
    }

    fn load(&self, game_id: &str) -> Result<Option<Player>, IdentityError> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(&Self::key(game_id)))
    }
}
