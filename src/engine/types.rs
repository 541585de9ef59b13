use serde::{Deserialize, Serialize};

use super::errors::StateError;

pub type GameId = String;
pub type PlayerId = String;

/// Card values fit in a byte; the deal is bounded by the table size.
pub type CardNumber = u8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
}

/// One connected participant. The wire form keeps the camelCase keys the
/// browser clients persist into the `players` column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub card_number: Option<CardNumber>,
    pub is_active: bool,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            score: 0,
            card_number: None,
            is_active: false,
        }
    }

    pub fn holds_card(&self) -> bool {
        self.card_number.is_some()
    }
}

/// The canonical shape of one game session. `total_rounds` and `winner` are
/// carried on the record but never consumed by the engine; stopping the game
/// and declaring a victor stay with the collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameState {
    pub id: GameId,
    pub status: GameStatus,
    pub players: Vec<Player>,
    pub current_round: u32,
    pub total_rounds: u32,
    pub revealed_card: Option<CardNumber>,
    pub organizer: PlayerId,
    pub winner: Option<PlayerId>,
}

impl GameState {
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// The player currently entitled to guess, if any.
    pub fn active_player(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_active)
    }

    /// The player holding `card`, if it is still in the card-holding pool.
    pub fn holder_of(&self, card: CardNumber) -> Option<&Player> {
        self.players.iter().find(|p| p.card_number == Some(card))
    }

    pub fn card_holder_count(&self) -> usize {
        self.players.iter().filter(|p| p.holds_card()).count()
    }
}

pub trait InvariantCheck {
    fn validate_invariants(&self) -> Result<(), StateError>;
}

impl InvariantCheck for GameState {
    fn validate_invariants(&self) -> Result<(), StateError> {
        if self.status == GameStatus::Playing {
            let active = self.players.iter().filter(|p| p.is_active).count();
            if active != 1 {
                return Err(StateError::InvariantViolation(
                    "playing games must have exactly one active player",
                ));
            }
        }

        let mut seen = [false; 256];
        for player in &self.players {
            let Some(card) = player.card_number else {
                continue;
            };
            if card == 0 || card as usize > self.players.len() {
                return Err(StateError::InvariantViolation(
                    "card number outside 1..=player count",
                ));
            }
            if seen[card as usize] {
                return Err(StateError::InvariantViolation("duplicate card number"));
            }
            seen[card as usize] = true;
        }

        Ok(())
    }
}
