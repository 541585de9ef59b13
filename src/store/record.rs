use serde::{Deserialize, Serialize};

use crate::engine::{CardNumber, GameId, GameState, GameStatus, Player, PlayerId};

/// The persisted row shape of the `games` table: snake_case columns, with the
/// `players` column keeping the camelCase JSON the browser clients wrote.
///
/// Decoding fails soft on the optional columns so a partially-populated row
/// surfaces as absent fields rather than a decode error; callers defend
/// against `winner`/`revealed_card` being missing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: GameId,
    pub status: GameStatus,
    pub players: Vec<Player>,
    pub current_round: u32,
    pub total_rounds: u32,
    #[serde(default)]
    pub revealed_card: Option<CardNumber>,
    pub organizer: PlayerId,
    #[serde(default)]
    pub winner: Option<PlayerId>,
}

impl From<GameRecord> for GameState {
    fn from(record: GameRecord) -> Self {
        GameState {
            id: record.id,
            status: record.status,
            players: record.players,
            current_round: record.current_round,
            total_rounds: record.total_rounds,
            revealed_card: record.revealed_card,
            organizer: record.organizer,
            winner: record.winner,
        }
    }
}

impl From<GameState> for GameRecord {
    fn from(state: GameState) -> Self {
        GameRecord {
            id: state.id,
            status: state.status,
            players: state.players,
            current_round: state.current_round,
            total_rounds: state.total_rounds,
            revealed_card: state.revealed_card,
            organizer: state.organizer,
            winner: state.winner,
        }
    }
}
