use super::errors::TurnError;
use super::types::{CardNumber, GameState, GameStatus};

/// Outcome of resolving one guess. Each variant carries the complete next
/// state; the caller persists it and may use the variant for presentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Correct guess: the guesser scored and left the card pool, the target
    /// holds the turn.
    Advanced { state: GameState, points: u32 },
    /// Correct guess that left exactly two card-holders: both scored their
    /// remainder bonus and the round is over.
    RoundComplete { state: GameState, points: u32 },
    /// Incorrect guess: guesser and target exchanged cards, no scoring.
    Swapped { state: GameState },
}

impl Resolution {
    pub fn state(&self) -> &GameState {
        match self {
            Resolution::Advanced { state, .. }
            | Resolution::RoundComplete { state, .. }
            | Resolution::Swapped { state } => state,
        }
    }

    pub fn into_state(self) -> GameState {
        match self {
            Resolution::Advanced { state, .. }
            | Resolution::RoundComplete { state, .. }
            | Resolution::Swapped { state } => state,
        }
    }
}

/// Resolve the active player's guess that `guessed` is held by an opponent.
///
/// Validates its own preconditions only: the game is playing, the guesser
/// exists and holds the turn, and some other player holds `guessed`. Guesses
/// at locked cards (card 1 and the currently revealed card) are the caller's
/// contract to reject before this point. Copy-on-write: the input state is
/// never mutated.
pub fn resolve_guess(
    state: &GameState,
    guesser_id: &str,
    guessed: CardNumber,
) -> Result<Resolution, TurnError> {
    if state.status != GameStatus::Playing {
        return Err(TurnError::GameNotPlaying);
    }

    let guesser = state.player(guesser_id).ok_or(TurnError::UnknownPlayer)?;
    if !guesser.is_active {
        return Err(TurnError::NotPlayersTurn);
    }

    let target = state
        .holder_of(guessed)
        .ok_or(TurnError::NoHolder(guessed))?;
    if target.id == guesser.id {
        return Err(TurnError::InvalidTarget);
    }
    let target_id = target.id.clone();

    let correct = guesser.card_number.map(|card| card + 1) == Some(guessed);
    if correct {
        Ok(resolve_correct(state, guesser_id, &target_id, guessed))
    } else {
        Ok(resolve_swap(state, guesser_id, &target_id))
    }
}

fn resolve_correct(
    state: &GameState,
    guesser_id: &str,
    target_id: &str,
    guessed: CardNumber,
) -> Resolution {
    let table_size = state.players.len() as u32;
    let points = table_size - guessed as u32 + 1;

    let mut next = state.clone();
    for player in &mut next.players {
        if player.id == guesser_id {
            player.score += points;
            player.is_active = false;
            player.card_number = None;
        } else if player.id == target_id {
            player.is_active = true;
        }
    }
    next.revealed_card = Some(guessed);

    // Two holders left means neither can be guessed at any more; the round
    // settles immediately with a remainder bonus for both.
    if next.card_holder_count() == 2 {
        for player in &mut next.players {
            if let Some(card) = player.card_number {
                player.score += table_size - card as u32;
                player.card_number = None;
            }
        }
        next.status = GameStatus::Finished;
        next.current_round += 1;
        return Resolution::RoundComplete { state: next, points };
    }

    Resolution::Advanced { state: next, points }
}

fn resolve_swap(state: &GameState, guesser_id: &str, target_id: &str) -> Resolution {
    let guesser_card = state.player(guesser_id).and_then(|p| p.card_number);
    let target_card = state.player(target_id).and_then(|p| p.card_number);

    let mut next = state.clone();
    for player in &mut next.players {
        if player.id == guesser_id {
            player.card_number = target_card;
            player.is_active = false;
        } else if player.id == target_id {
            player.card_number = guesser_card;
            player.is_active = true;
        }
    }

    Resolution::Swapped { state: next }
}
