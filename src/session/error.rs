use thiserror::Error;

use crate::engine::TurnError;
use crate::store::StoreError;

use super::identity::IdentityError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("game not found")]
    NotFound,
    #[error("cannot join a game that has already started")]
    AlreadyStarted,
    #[error("game is full")]
    GameFull,
    #[error("no active game in this session")]
    NoActiveGame,
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("realtime subscription failed: {0}")]
    Feed(#[from] anyhow::Error),
    #[error("local identity storage failed: {0}")]
    Identity(#[from] IdentityError),
}
