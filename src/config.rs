use anyhow::{anyhow, bail, Context, Result};
use url::Url;

pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
pub const SUPABASE_ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";

/// Table rules shared by every session on a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameSettings {
    pub total_rounds: u32,
    pub max_players: usize,
    pub min_players: usize,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            total_rounds: 10,
            max_players: 8,
            min_players: 3,
        }
    }
}

/// Supabase project endpoints shared by the REST store and the realtime
/// channel.
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub base_url: String,
    pub api_key: String,
}

impl SupabaseConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(SUPABASE_URL_ENV)
            .with_context(|| format!("environment variable {SUPABASE_URL_ENV} not set"))?;
        let api_key = std::env::var(SUPABASE_ANON_KEY_ENV)
            .with_context(|| format!("environment variable {SUPABASE_ANON_KEY_ENV} not set"))?;
        Ok(Self::new(base_url, api_key))
    }

    /// Derive the realtime websocket endpoint from the project base URL.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).context("invalid Supabase base URL")?;
        match url.scheme() {
            "http" => url
                .set_scheme("ws")
                .map_err(|_| anyhow!("http -> ws conversion failed"))?,
            "https" => url
                .set_scheme("wss")
                .map_err(|_| anyhow!("https -> wss conversion failed"))?,
            "ws" | "wss" => {}
            other => bail!("unsupported Supabase URL scheme '{other}'"),
        }

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("Supabase URL cannot be a base URL"))?;
            segments.pop_if_empty();
            segments.extend(&["realtime", "v1", "websocket"]);
        }

        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");

        Ok(url)
    }
}
