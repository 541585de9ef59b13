pub mod config;
pub mod engine;
pub mod ids;
pub mod realtime;
pub mod session;
pub mod store;

pub use config::{GameSettings, SupabaseConfig};
pub use engine::{GameState, GameStatus, Player, Resolution};
pub use session::{SessionState, SessionStore};
