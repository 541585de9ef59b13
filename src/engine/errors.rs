use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("not enough players to deal a round (have {have}, need {need})")]
    NotEnoughPlayers { have: usize, need: usize },
    #[error("game is not in the playing state")]
    GameNotPlaying,
    #[error("guesser is not part of this game")]
    UnknownPlayer,
    #[error("it is not this player's turn to guess")]
    NotPlayersTurn,
    #[error("no player holds card {0}")]
    NoHolder(u8),
    #[error("a player cannot target their own card")]
    InvalidTarget,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
}
