use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GameSettings;
use crate::engine::{
    resolve_guess, start_round, CardNumber, GameId, GameState, GameStatus, Player, Resolution,
};
use crate::ids::short_id;
use crate::realtime::GameFeed;
use crate::store::{GameRecord, GameStore};

use super::error::SessionError;
use super::identity::IdentityStore;

const LOG_TARGET: &str = "cardline::session";
const UPDATE_CAPACITY: usize = 32;

/// What the collaborator renders: the authoritative game (as last observed)
/// and the locally-controlled player within it.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub game: Option<GameState>,
    pub local_player: Option<Player>,
}

/// The single active realtime watch. Replaced wholesale on re-subscribe;
/// cancelling stops the forwarder, which drops the subscription.
struct ActiveWatch {
    game_id: GameId,
    stop: CancellationToken,
    forwarder: JoinHandle<()>,
}

impl ActiveWatch {
    fn cancel(self) {
        debug!(target: LOG_TARGET, game_id = %self.game_id, "tearing down realtime watch");
        self.stop.cancel();
        self.forwarder.abort();
    }
}

struct SessionInner {
    settings: GameSettings,
    store: Arc<dyn GameStore>,
    feed: Arc<dyn GameFeed>,
    identities: Arc<dyn IdentityStore>,
    state: RwLock<SessionState>,
    updates: broadcast::Sender<GameState>,
    watch: Mutex<Option<ActiveWatch>>,
}

/// One client's view of one game at a time.
///
/// Every action computes the next state locally from the last observed
/// state, persists it as a whole-record overwrite, and applies it locally
/// right away; the realtime feed then overwrites that optimistic view with
/// whatever actually committed (last local write wins until corrected).
/// Persistence failures propagate to the caller and leave local state
/// untouched; nothing is retried and in-flight writes cannot be cancelled.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl SessionStore {
    pub fn new(
        settings: GameSettings,
        store: Arc<dyn GameStore>,
        feed: Arc<dyn GameFeed>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                settings,
                store,
                feed,
                identities,
                state: RwLock::new(SessionState::default()),
                updates,
                watch: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> GameSettings {
        self.inner.settings
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.read().clone()
    }

    /// Re-render feed: one delivery per locally-applied or remotely-observed
    /// state change.
    pub fn updates(&self) -> broadcast::Receiver<GameState> {
        self.inner.updates.subscribe()
    }

    /// Create a fresh game with this client as organizer and sole player.
    pub async fn create_game(&self, name: &str) -> Result<GameId, SessionError> {
        let (game_id, player) = {
            let mut rng = rand::thread_rng();
            let game_id = short_id(&mut rng);
            let player = Player::new(short_id(&mut rng), name);
            (game_id, player)
        };

        let state = GameState {
            id: game_id.clone(),
            status: GameStatus::Waiting,
            players: vec![player.clone()],
            current_round: 0,
            total_rounds: self.inner.settings.total_rounds,
            revealed_card: None,
            organizer: player.id.clone(),
            winner: None,
        };

        self.inner
            .store
            .insert_game(&GameRecord::from(state.clone()))
            .await?;
        self.inner.identities.save(&game_id, &player)?;
        self.resubscribe(&game_id).await?;
        self.apply_local(state, Some(player));

        info!(target: LOG_TARGET, game_id = %game_id, organizer = name, "created game");
        Ok(game_id)
    }

    /// Join a waiting game by id (usually lifted off a share link).
    pub async fn join_game(&self, game_id: &str, name: &str) -> Result<(), SessionError> {
        let record = self
            .inner
            .store
            .fetch_game(game_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        let mut state = GameState::from(record);

        if state.status != GameStatus::Waiting {
            return Err(SessionError::AlreadyStarted);
        }
        if state.players.len() >= self.inner.settings.max_players {
            return Err(SessionError::GameFull);
        }

        let player = {
            let mut rng = rand::thread_rng();
            Player::new(short_id(&mut rng), name)
        };
        state.players.push(player.clone());

        self.inner
            .store
            .overwrite_game(&GameRecord::from(state.clone()))
            .await?;
        self.inner.identities.save(game_id, &player)?;
        self.resubscribe(game_id).await?;
        self.apply_local(state, Some(player));

        info!(target: LOG_TARGET, game_id, player = name, "joined game");
        Ok(())
    }

    /// Deal the first round. Organizer gating is the collaborator's
    /// contract; the engine still rejects a table below the minimum.
    pub async fn start_game(&self) -> Result<(), SessionError> {
        let game = self.snapshot().game.ok_or(SessionError::NoActiveGame)?;
        let dealt = {
            let mut rng = rand::thread_rng();
            start_round(&game, self.inner.settings.min_players, &mut rng)?
        };

        self.inner
            .store
            .overwrite_game(&GameRecord::from(dealt.clone()))
            .await?;
        self.apply_local(dealt, None);

        info!(target: LOG_TARGET, game_id = %game.id, "round dealt");
        Ok(())
    }

    /// The organizer's re-deal after a finished round. Whether another round
    /// should happen at all (`current_round` vs `total_rounds`) is the
    /// collaborator's call; nothing here stops the game.
    pub async fn next_round(&self) -> Result<(), SessionError> {
        if let Some(game) = self.snapshot().game {
            debug!(
                target: LOG_TARGET,
                game_id = %game.id,
                round = game.current_round,
                "advancing to next round"
            );
        }
        self.start_game().await
    }

    /// Resolve the local player's guess. Returns `Ok(None)` without touching
    /// the datastore when the guess is not currently actionable: out of
    /// turn, game not playing, targeting a locked card, or no such holder.
    pub async fn make_guess(&self, number: CardNumber) -> Result<Option<Resolution>, SessionError> {
        let SessionState { game, local_player } = self.snapshot();
        let (Some(game), Some(me)) = (game, local_player) else {
            return Ok(None);
        };

        if game.status != GameStatus::Playing || !me.is_active {
            debug!(target: LOG_TARGET, game_id = %game.id, "ignoring guess out of turn");
            return Ok(None);
        }
        // Locked cards are gated here, not in the engine: card 1 is public
        // from the deal and the revealed card is already resolved.
        if number == 1 || Some(number) == game.revealed_card {
            debug!(target: LOG_TARGET, game_id = %game.id, number, "ignoring guess at a locked card");
            return Ok(None);
        }
        match game.holder_of(number) {
            None => {
                debug!(target: LOG_TARGET, game_id = %game.id, number, "no holder for guessed card");
                return Ok(None);
            }
            Some(target) if target.id == me.id => {
                debug!(target: LOG_TARGET, game_id = %game.id, number, "ignoring guess at own card");
                return Ok(None);
            }
            Some(_) => {}
        }

        let resolution = resolve_guess(&game, &me.id, number)?;
        self.inner
            .store
            .overwrite_game(&GameRecord::from(resolution.state().clone()))
            .await?;
        self.apply_local(resolution.state().clone(), None);

        Ok(Some(resolution))
    }

    /// Silently rejoin a game this client was part of before a reload.
    ///
    /// `Ok(false)` means "not restorable, prompt for a fresh join": either no
    /// identity was ever stored for this game, or the stored player is gone
    /// from the record. A missing record is a real error.
    pub async fn restore_game(&self, game_id: &str) -> Result<bool, SessionError> {
        {
            let guard = self.inner.state.read();
            let already_live = guard.local_player.is_some()
                && guard.game.as_ref().map(|g| g.id.as_str()) == Some(game_id);
            if already_live {
                return Ok(true);
            }
        }

        let Some(stored) = self.inner.identities.load(game_id)? else {
            return Ok(false);
        };

        let record = self
            .inner
            .store
            .fetch_game(game_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        let state = GameState::from(record);

        let Some(me) = state.player(&stored.id).cloned() else {
            debug!(
                target: LOG_TARGET,
                game_id,
                player_id = %stored.id,
                "stored identity no longer part of the game"
            );
            return Ok(false);
        };

        self.resubscribe(game_id).await?;
        self.apply_local(state, Some(me));

        info!(target: LOG_TARGET, game_id, "restored session");
        Ok(true)
    }

    /// Leave the current game: tear down the watch and clear local state.
    /// The record itself is abandoned, never deleted.
    pub fn reset(&self) {
        if let Some(watch) = self.inner.watch.lock().take() {
            watch.cancel();
        }
        let mut guard = self.inner.state.write();
        guard.game = None;
        guard.local_player = None;
    }

    /// Replace the active subscription with one for `game_id`. At most one
    /// watch is live per session; the previous one is cancelled first.
    async fn resubscribe(&self, game_id: &str) -> Result<(), SessionError> {
        let mut subscription = self.inner.feed.subscribe(game_id).await?;

        let stop = CancellationToken::new();
        let forwarder_stop = stop.clone();
        // The forwarder must not keep the session alive on its own: once
        // every handle is gone, dropping the inner tears the watch down.
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forwarder_stop.cancelled() => break,
                    delivery = subscription.recv() => match delivery {
                        Some(record) => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.apply_remote(record);
                        }
                        None => break,
                    },
                }
            }
        });

        let previous = self.inner.watch.lock().replace(ActiveWatch {
            game_id: game_id.to_string(),
            stop,
            forwarder,
        });
        if let Some(watch) = previous {
            watch.cancel();
        }
        Ok(())
    }

    /// Optimistic post-persist application of a locally computed state.
    fn apply_local(&self, state: GameState, local_player: Option<Player>) {
        let mut guard = self.inner.state.write();
        match local_player {
            Some(player) => guard.local_player = Some(player),
            None => refresh_local_player(&mut guard, &state),
        }
        guard.game = Some(state.clone());
        drop(guard);

        let _ = self.inner.updates.send(state);
    }
}

impl SessionInner {
    /// Authoritative delivery from the realtime watch: replace the game
    /// wholesale and re-resolve the local player by id, keeping the previous
    /// player object if the id has vanished mid-transition.
    fn apply_remote(&self, record: GameRecord) {
        let state = GameState::from(record);

        let mut guard = self.state.write();
        if let Some(current) = &guard.game {
            if current.id != state.id {
                debug!(
                    target: LOG_TARGET,
                    delivered = %state.id,
                    current = %current.id,
                    "dropping stale delivery for another game"
                );
                return;
            }
        }
        refresh_local_player(&mut guard, &state);
        guard.game = Some(state.clone());
        drop(guard);

        let _ = self.updates.send(state);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.lock().take() {
            watch.cancel();
        }
    }
}

fn refresh_local_player(session: &mut SessionState, state: &GameState) {
    if let Some(current) = &session.local_player {
        if let Some(updated) = state.player(&current.id) {
            session.local_player = Some(updated.clone());
        }
    }
}
