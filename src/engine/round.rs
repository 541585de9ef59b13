use rand::seq::SliceRandom;
use rand::Rng;

use super::errors::TurnError;
use super::types::{CardNumber, GameState, GameStatus};

/// Deal a fresh round: assign a shuffled permutation of `1..=N` across the
/// players in join order and hand the opening turn to whoever drew card 1.
///
/// Copy-on-write: the input state is left untouched. Scores carry over, so
/// the same function serves both the first deal and the organizer's
/// next-round re-deal on an already-scored state.
pub fn start_round<R: Rng>(
    state: &GameState,
    min_players: usize,
    rng: &mut R,
) -> Result<GameState, TurnError> {
    let count = state.players.len();
    if count < min_players {
        return Err(TurnError::NotEnoughPlayers {
            have: count,
            need: min_players,
        });
    }

    let mut numbers: Vec<CardNumber> = (1..=count as CardNumber).collect();
    numbers.shuffle(rng);

    let mut next = state.clone();
    for (player, number) in next.players.iter_mut().zip(numbers) {
        player.card_number = Some(number);
        player.is_active = number == 1;
    }

    next.status = GameStatus::Playing;
    next.revealed_card = Some(1);
    next.current_round = next.current_round.max(1);

    Ok(next)
}
