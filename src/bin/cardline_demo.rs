use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use tracing_subscriber::{fmt::time::Uptime, EnvFilter};
use url::Url;

use cardline::config::{GameSettings, SupabaseConfig};
use cardline::engine::{CardNumber, GameStatus, Player, Resolution};
use cardline::realtime::{GameFeed, RealtimeConfig, RealtimeFeed};
use cardline::session::{game_id_from_url, share_link, FileIdentityStore, SessionState, SessionStore};
use cardline::store::{GameStore, InMemoryGameStore, PostgrestGameStore};

const LOG_TARGET: &str = "bin::cardline_demo";
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const MAX_TURNS: usize = 10_000;
const NAMES: [&str; 8] = [
    "Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace", "Heidi",
];

#[derive(Debug, Parser)]
#[command(name = "cardline_demo")]
#[command(about = "Simulate a multi-client cardline game over a shared store", long_about = None)]
struct Args {
    /// Number of simulated players (3..=8)
    #[arg(long, default_value_t = 4)]
    players: usize,

    /// Rounds to play before printing the leaderboard
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Base Supabase endpoint; with the anon key this switches the demo from
    /// the in-memory store to the live datastore
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: Option<String>,

    /// Supabase anon key for REST and realtime websocket auth
    #[arg(long, env = "SUPABASE_ANON_KEY")]
    supabase_anon_key: Option<String>,

    /// Seed the demo RNG to make playouts deterministic
    #[arg(long)]
    rng_seed: Option<u64>,

    /// Toggle structured (JSON) tracing output
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.json)?;
    run_demo(args).await
}

async fn run_demo(args: Args) -> Result<()> {
    if !(3..=8).contains(&args.players) {
        bail!("--players must be within 3..=8");
    }

    let mut rng = match args.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let settings = GameSettings::default();
    let (store, feed) = build_backends(&args)?;

    let identity_dir = std::env::temp_dir().join("cardline_demo");
    let sessions: Vec<SessionStore> = NAMES
        .iter()
        .take(args.players)
        .map(|name| {
            let identities = Arc::new(FileIdentityStore::new(
                identity_dir.join(format!("{name}.json")),
            ));
            SessionStore::new(settings, Arc::clone(&store), Arc::clone(&feed), identities)
        })
        .collect();

    // Organizer creates, everyone else comes in through the share link.
    let organizer = &sessions[0];
    let game_id = organizer.create_game(NAMES[0]).await?;
    let origin = Url::parse("https://cardline.example/")?;
    let link = share_link(&origin, &game_id);
    info!(target: LOG_TARGET, game_id = %game_id, share_link = %link, "game created");

    let lifted_id = game_id_from_url(&link).context("share link must carry the game id")?;
    for (session, name) in sessions.iter().zip(NAMES.iter()).skip(1) {
        session.join_game(&lifted_id, name).await?;
    }

    wait_until(organizer, "full table", |s| {
        s.game
            .as_ref()
            .is_some_and(|g| g.players.len() == args.players)
    })
    .await?;

    organizer.start_game().await?;
    info!(target: LOG_TARGET, players = args.players, rounds = args.rounds, "round one dealt");

    let mut completed = 0u32;
    let mut turns = 0usize;
    let mut poll = interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while completed < args.rounds {
        poll.tick().await;
        turns += 1;
        if turns > MAX_TURNS {
            bail!("demo failed to settle after {MAX_TURNS} turns");
        }

        for session in &sessions {
            let snapshot = session.snapshot();
            let (Some(game), Some(me)) = (snapshot.game, snapshot.local_player) else {
                continue;
            };
            if game.status != GameStatus::Playing || !me.is_active {
                continue;
            }

            let candidates: Vec<CardNumber> = game
                .players
                .iter()
                .filter(|p| p.id != me.id)
                .filter_map(|p| p.card_number)
                .filter(|&card| card != 1 && Some(card) != game.revealed_card)
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let guess = choose_guess(&mut rng, &me, &candidates);
            debug!(target: LOG_TARGET, player = %me.name, guess, "turn");

            match session.make_guess(guess).await? {
                Some(Resolution::RoundComplete { state, .. }) => {
                    completed += 1;
                    info!(
                        target: LOG_TARGET,
                        round = state.current_round - 1,
                        "round settled"
                    );
                    if completed < args.rounds {
                        // Re-deal only once the organizer's own replica has
                        // caught up with the settled round, the way the real
                        // UI gates its next-round button.
                        let settled = state.current_round;
                        wait_until(organizer, "settled round", move |s| {
                            s.game.as_ref().is_some_and(|g| {
                                g.status == GameStatus::Finished && g.current_round == settled
                            })
                        })
                        .await?;
                        organizer.next_round().await?;
                    }
                }
                Some(_) | None => {}
            }
            break;
        }
    }

    wait_until(organizer, "final state", |s| {
        s.game
            .as_ref()
            .is_some_and(|g| g.status == GameStatus::Finished)
    })
    .await?;

    // Winner declaration is deliberately not the engine's job; the demo
    // infers it the way the real UI does, by sorting scores.
    let game = organizer
        .snapshot()
        .game
        .ok_or_else(|| anyhow!("organizer lost the game state"))?;
    let mut standings = game.players.clone();
    standings.sort_by(|a, b| b.score.cmp(&a.score));
    for (place, player) in standings.iter().enumerate() {
        info!(
            target: LOG_TARGET,
            place = place + 1,
            player = %player.name,
            score = player.score,
            "final standing"
        );
    }
    info!(target: LOG_TARGET, winner = %standings[0].name, "game over");

    Ok(())
}

fn build_backends(args: &Args) -> Result<(Arc<dyn GameStore>, Arc<dyn GameFeed>)> {
    match (&args.supabase_url, &args.supabase_anon_key) {
        (Some(url), Some(key)) => {
            let config = SupabaseConfig::new(url.clone(), key.clone());
            let realtime = RealtimeConfig::new(config.realtime_url()?, config.api_key.clone());
            info!(target: LOG_TARGET, supabase = %config.base_url, "using the live datastore");
            let store: Arc<dyn GameStore> = Arc::new(PostgrestGameStore::new(&config));
            let feed: Arc<dyn GameFeed> = Arc::new(RealtimeFeed::new(realtime));
            Ok((store, feed))
        }
        (None, None) => {
            info!(target: LOG_TARGET, "using the in-memory datastore");
            let store = Arc::new(InMemoryGameStore::new());
            let feed: Arc<dyn GameFeed> = store.clone();
            let store: Arc<dyn GameStore> = store;
            Ok((store, feed))
        }
        _ => bail!("--supabase-url and --supabase-anon-key must be set together"),
    }
}

/// Bots peek at the table to pace the playout: half the time they take the
/// winning guess when it is open, otherwise they probe a random holder.
fn choose_guess(rng: &mut StdRng, me: &Player, candidates: &[CardNumber]) -> CardNumber {
    if let Some(card) = me.card_number {
        let next = card + 1;
        if candidates.contains(&next) && rng.gen_bool(0.5) {
            return next;
        }
    }
    candidates[rng.gen_range(0..candidates.len())]
}

async fn wait_until(
    session: &SessionStore,
    what: &str,
    pred: impl Fn(&SessionState) -> bool,
) -> Result<()> {
    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        let mut poll = interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            poll.tick().await;
            if pred(&session.snapshot()) {
                return;
            }
        }
    })
    .await;
    outcome.map_err(|_| anyhow!("timed out waiting for {what}"))
}

fn init_tracing(json: bool) -> Result<()> {
    if json {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cardline_demo=info,cardline=info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_timer(Uptime::default())
            .with_ansi(false)
            .json()
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing subscriber: {err}"))?;
    } else {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cardline_demo=info,cardline=info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_timer(Uptime::default())
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing subscriber: {err}"))?;
    }
    Ok(())
}
