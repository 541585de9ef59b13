#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::config::GameSettings;
use crate::engine::{GameStatus, InvariantCheck, Player, Resolution};
use crate::realtime::GameFeed;
use crate::session::{FileIdentityStore, IdentityStore, SessionError, SessionState, SessionStore};
use crate::store::{GameStore, InMemoryGameStore};

const CONVERGE: Duration = Duration::from_secs(2);

/// One shared datastore plus per-client identity files, standing in for
/// independent browsers pointed at the same Supabase project.
struct Harness {
    dir: tempfile::TempDir,
    store: Arc<InMemoryGameStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            store: Arc::new(InMemoryGameStore::new()),
        }
    }

    fn session(&self, client: &str) -> SessionStore {
        let identities = Arc::new(FileIdentityStore::new(
            self.dir.path().join(format!("{client}.json")),
        ));
        let store: Arc<dyn GameStore> = self.store.clone();
        let feed: Arc<dyn GameFeed> = self.store.clone();
        SessionStore::new(GameSettings::default(), store, feed, identities)
    }

    fn identity_file(&self, client: &str) -> FileIdentityStore {
        FileIdentityStore::new(self.dir.path().join(format!("{client}.json")))
    }
}

async fn wait_for(session: &SessionStore, what: &str, pred: impl Fn(&SessionState) -> bool) {
    let outcome = timeout(CONVERGE, async {
        loop {
            if pred(&session.snapshot()) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "session never converged: {what}");
}

#[tokio::test]
async fn join_propagates_to_the_organizer() {
    let harness = Harness::new();
    let alice = harness.session("alice");
    let bob = harness.session("bob");

    let game_id = alice.create_game("Alice").await.unwrap();
    bob.join_game(&game_id, "Bob").await.unwrap();

    wait_for(&alice, "organizer sees the joiner", |s| {
        s.game.as_ref().is_some_and(|g| g.players.len() == 2)
    })
    .await;

    let game = alice.snapshot().game.unwrap();
    assert_eq!(game.status, GameStatus::Waiting);
    assert_eq!(game.players[1].name, "Bob");
    assert_eq!(game.organizer, alice.snapshot().local_player.unwrap().id);
}

#[tokio::test]
async fn join_rejects_missing_started_and_full_games() {
    let harness = Harness::new();
    let alice = harness.session("alice");

    let stranger = harness.session("stranger");
    assert!(matches!(
        stranger.join_game("zzzzzzz", "Nobody").await.unwrap_err(),
        SessionError::NotFound
    ));

    let game_id = alice.create_game("Alice").await.unwrap();
    for i in 0..7 {
        let joiner = harness.session(&format!("client{i}"));
        joiner.join_game(&game_id, &format!("P{i}")).await.unwrap();
    }

    // Seat 9 of 8: rejected, and the record is untouched.
    let ninth = harness.session("ninth");
    assert!(matches!(
        ninth.join_game(&game_id, "Nina").await.unwrap_err(),
        SessionError::GameFull
    ));
    let record = harness.store.fetch_game(&game_id).await.unwrap().unwrap();
    assert_eq!(record.players.len(), 8);

    alice.start_game().await.unwrap();
    assert!(matches!(
        ninth.join_game(&game_id, "Nina").await.unwrap_err(),
        SessionError::AlreadyStarted
    ));
}

#[tokio::test]
async fn start_rejects_a_short_table() {
    let harness = Harness::new();
    let alice = harness.session("alice");
    alice.create_game("Alice").await.unwrap();

    assert!(matches!(
        alice.start_game().await.unwrap_err(),
        SessionError::Turn(_)
    ));
    assert_eq!(
        alice.snapshot().game.unwrap().status,
        GameStatus::Waiting,
        "failed start leaves local state untouched"
    );
}

async fn three_player_table(
    harness: &Harness,
) -> (String, Vec<(&'static str, SessionStore)>) {
    let alice = harness.session("alice");
    let bob = harness.session("bob");
    let carol = harness.session("carol");

    let game_id = alice.create_game("Alice").await.unwrap();
    bob.join_game(&game_id, "Bob").await.unwrap();
    carol.join_game(&game_id, "Carol").await.unwrap();

    wait_for(&alice, "organizer sees full table", |s| {
        s.game.as_ref().is_some_and(|g| g.players.len() == 3)
    })
    .await;
    alice.start_game().await.unwrap();

    let sessions = vec![("alice", alice), ("bob", bob), ("carol", carol)];
    for (name, session) in &sessions {
        wait_for(session, name, |s| {
            s.game.as_ref().is_some_and(|g| g.status == GameStatus::Playing)
        })
        .await;
    }
    (game_id, sessions)
}

fn active_session<'a>(sessions: &'a [(&'static str, SessionStore)]) -> &'a SessionStore {
    sessions
        .iter()
        .map(|(_, s)| s)
        .find(|s| {
            s.snapshot()
                .local_player
                .is_some_and(|p| p.is_active)
        })
        .expect("one session holds the turn")
}

#[tokio::test]
async fn correct_guess_settles_a_three_player_round_everywhere() {
    let harness = Harness::new();
    let (_, sessions) = three_player_table(&harness).await;

    let opener = active_session(&sessions);
    let me = opener.snapshot().local_player.unwrap();
    assert_eq!(me.card_number, Some(1), "card 1 opens the round");

    // With three players the first correct guess drops the pool to two
    // holders, so the round settles immediately.
    let resolution = opener.make_guess(2).await.unwrap().unwrap();
    let Resolution::RoundComplete { points, .. } = resolution else {
        panic!("expected the opening guess to settle the round");
    };
    assert_eq!(points, 2); // 3 players - card 2 + 1

    for (name, session) in &sessions {
        wait_for(session, name, |s| {
            s.game.as_ref().is_some_and(|g| g.status == GameStatus::Finished)
        })
        .await;
        let game = session.snapshot().game.unwrap();
        game.validate_invariants().unwrap();
        assert_eq!(game.current_round, 2);
        assert!(game.players.iter().all(|p| p.card_number.is_none()));

        let scores: Vec<u32> = game.players.iter().map(|p| p.score).collect();
        let mut sorted = scores.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2], "opener 2, card-2 holder 1, card-3 holder 0");
    }

    // The opener's own view updated optimistically, before any echo.
    let me_after = opener.snapshot().local_player.unwrap();
    assert_eq!(me_after.score, 2);
    assert_eq!(me_after.card_number, None);
}

#[tokio::test]
async fn wrong_guess_swaps_and_passes_the_turn() {
    let harness = Harness::new();
    let (_, sessions) = three_player_table(&harness).await;

    let opener = active_session(&sessions);
    let me = opener.snapshot().local_player.unwrap();

    // Holder of 1 guessing 3 is wrong (correct is 2): swap, no score.
    let resolution = opener.make_guess(3).await.unwrap().unwrap();
    assert!(matches!(resolution, Resolution::Swapped { .. }));

    let me_after = opener.snapshot().local_player.unwrap();
    assert_eq!(me_after.card_number, Some(3));
    assert!(!me_after.is_active);
    assert_eq!(me_after.score, 0);

    // The former holder of 3 now opens with card 1, on every replica.
    for (name, session) in &sessions {
        wait_for(session, name, |s| {
            s.game.as_ref().is_some_and(|g| {
                g.active_player()
                    .is_some_and(|p| p.id != me.id && p.card_number == Some(1))
            })
        })
        .await;
        let game = session.snapshot().game.unwrap();
        game.validate_invariants().unwrap();
        assert_eq!(game.status, GameStatus::Playing);
    }
}

#[tokio::test]
async fn guesses_that_are_not_actionable_change_nothing() {
    let harness = Harness::new();
    let (game_id, sessions) = three_player_table(&harness).await;
    let before = harness.store.fetch_game(&game_id).await.unwrap().unwrap();

    let opener = active_session(&sessions);
    assert!(opener.make_guess(1).await.unwrap().is_none(), "card 1 is locked");
    assert!(opener.make_guess(7).await.unwrap().is_none(), "no holder");

    let bystander = sessions
        .iter()
        .map(|(_, s)| s)
        .find(|s| s.snapshot().local_player.is_some_and(|p| !p.is_active))
        .unwrap();
    assert!(
        bystander.make_guess(2).await.unwrap().is_none(),
        "out of turn"
    );

    let after = harness.store.fetch_game(&game_id).await.unwrap().unwrap();
    assert_eq!(before, after, "no-op guesses must not persist anything");
}

#[tokio::test]
async fn next_round_re_deals_a_finished_table() {
    let harness = Harness::new();
    let (_, sessions) = three_player_table(&harness).await;

    let opener = active_session(&sessions);
    opener.make_guess(2).await.unwrap().unwrap();

    let (_, organizer) = &sessions[0];
    wait_for(organizer, "organizer sees the finished round", |s| {
        s.game.as_ref().is_some_and(|g| g.status == GameStatus::Finished)
    })
    .await;

    organizer.next_round().await.unwrap();
    let game = organizer.snapshot().game.unwrap();
    assert_eq!(game.status, GameStatus::Playing);
    assert_eq!(game.current_round, 2, "settled counter survives the re-deal");
    assert_eq!(game.revealed_card, Some(1));
    assert_eq!(game.card_holder_count(), 3);
    game.validate_invariants().unwrap();

    let scores: u32 = game.players.iter().map(|p| p.score).sum();
    assert_eq!(scores, 3, "scores carry into the new round");
}

#[tokio::test]
async fn restore_without_identity_is_false_not_an_error() {
    let harness = Harness::new();
    let alice = harness.session("alice");
    let game_id = alice.create_game("Alice").await.unwrap();

    let fresh = harness.session("fresh-browser");
    assert!(!fresh.restore_game(&game_id).await.unwrap());
}

#[tokio::test]
async fn restore_resumes_with_the_stored_identity() {
    let harness = Harness::new();
    let alice = harness.session("alice");
    let game_id = alice.create_game("Alice").await.unwrap();
    let alice_id = alice.snapshot().local_player.unwrap().id;

    // Same client after a reload: same identity file, fresh session.
    let reloaded = harness.session("alice");
    assert!(reloaded.restore_game(&game_id).await.unwrap());
    assert_eq!(reloaded.snapshot().local_player.unwrap().id, alice_id);

    // Already-live sessions restore trivially.
    assert!(reloaded.restore_game(&game_id).await.unwrap());
}

#[tokio::test]
async fn restore_fails_softly_when_the_player_was_dropped() {
    let harness = Harness::new();
    let alice = harness.session("alice");
    let game_id = alice.create_game("Alice").await.unwrap();

    // The game was reset underneath: record survives, roster does not.
    let mut record = harness.store.fetch_game(&game_id).await.unwrap().unwrap();
    record.players.clear();
    harness.store.overwrite_game(&record).await.unwrap();

    let reloaded = harness.session("alice");
    assert!(!reloaded.restore_game(&game_id).await.unwrap());
}

#[tokio::test]
async fn restore_of_a_vanished_game_is_an_error() {
    let harness = Harness::new();
    harness
        .identity_file("alice")
        .save("gone999", &Player::new("a1b2c3d", "Ada"))
        .unwrap();

    let alice = harness.session("alice");
    assert!(matches!(
        alice.restore_game("gone999").await.unwrap_err(),
        SessionError::NotFound
    ));
}

#[tokio::test]
async fn teardown_and_resubscribe_leaves_state_untouched() {
    let harness = Harness::new();
    let alice = harness.session("alice");
    let game_id = alice.create_game("Alice").await.unwrap();

    let reloaded = harness.session("alice");
    assert!(reloaded.restore_game(&game_id).await.unwrap());
    let before = reloaded.snapshot();

    reloaded.reset();
    assert!(reloaded.snapshot().game.is_none());

    assert!(reloaded.restore_game(&game_id).await.unwrap());
    let after = reloaded.snapshot();
    assert_eq!(before.game, after.game);
    assert_eq!(before.local_player, after.local_player);

    let record = harness.store.fetch_game(&game_id).await.unwrap().unwrap();
    assert_eq!(Some(record.id), after.game.map(|g| g.id));
}

#[tokio::test]
async fn remote_delivery_keeps_the_stale_local_player_object() {
    let harness = Harness::new();
    let alice = harness.session("alice");
    let game_id = alice.create_game("Alice").await.unwrap();
    let me = alice.snapshot().local_player.unwrap();

    let mut record = harness.store.fetch_game(&game_id).await.unwrap().unwrap();
    record.players.clear();
    harness.store.overwrite_game(&record).await.unwrap();

    wait_for(&alice, "roster wipe arrives", |s| {
        s.game.as_ref().is_some_and(|g| g.players.is_empty())
    })
    .await;
    // The vanished id falls back to the previous player object rather than
    // null-outing the collaborator mid-transition.
    assert_eq!(alice.snapshot().local_player, Some(me));
}
