use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::store::GameRecord;

use super::{GameFeed, GameSubscription};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const LOG_TARGET: &str = "cardline::realtime";

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub realtime_url: Url,
    pub api_key: String,
    pub schema: String,
    pub table: String,
    /// Postgres change kinds to watch; `*` means every committed change.
    pub event: String,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub delivery_capacity: usize,
}

impl RealtimeConfig {
    pub fn new(realtime_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            realtime_url,
            api_key: api_key.into(),
            schema: "public".to_string(),
            table: "games".to_string(),
            event: "*".to_string(),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(5),
            delivery_capacity: 64,
        }
    }

    fn filter(&self, game_id: &str) -> String {
        format!("id=eq.{game_id}")
    }

    fn topic(&self, game_id: &str) -> String {
        format!(
            "realtime:{}:{}:{}",
            self.schema,
            self.table,
            self.filter(game_id)
        )
    }
}

/// Websocket client for one game's committed changes.
///
/// Speaks the Phoenix protocol against the Supabase realtime endpoint:
/// joins a `postgres_changes` channel filtered to the single game row,
/// heartbeats while connected, and reconnects after a fixed delay until
/// cancelled. Each delivery is the full new row.
pub struct RealtimeClient {
    cfg: RealtimeConfig,
    game_id: String,
    tx: mpsc::Sender<GameRecord>,
    stop: CancellationToken,
}

impl RealtimeClient {
    pub fn new(
        cfg: RealtimeConfig,
        game_id: impl Into<String>,
        tx: mpsc::Sender<GameRecord>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            game_id: game_id.into(),
            tx,
            stop,
        }
    }

    pub async fn run(self) -> Result<()> {
        debug!(
            target: LOG_TARGET,
            url = %self.cfg.realtime_url,
            game_id = %self.game_id,
            "starting realtime subscription"
        );
        while !self.stop.is_cancelled() {
            match self.connect().await {
                Ok(stream) => {
                    if let Err(err) = self.pump(stream).await {
                        warn!(target: LOG_TARGET, error = %err, "realtime stream ended with error");
                    }
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to connect to realtime endpoint");
                }
            }

            if self.stop.is_cancelled() || self.tx.is_closed() {
                break;
            }

            debug!(
                target: LOG_TARGET,
                delay_secs = self.cfg.reconnect_delay.as_secs_f32(),
                "waiting before reconnect attempt"
            );
            sleep(self.cfg.reconnect_delay).await;
        }

        debug!(target: LOG_TARGET, game_id = %self.game_id, "realtime subscription stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<WsStream> {
        let ws_url = self.cfg.realtime_url.to_string();
        let connect_fut = connect_async(ws_url);
        let (stream, _) = timeout(self.cfg.handshake_timeout, connect_fut)
            .await
            .context("realtime handshake timed out")?
            .context("realtime handshake failed")?;

        Ok(stream)
    }

    async fn pump(&self, stream: WsStream) -> Result<()> {
        let (mut sink, mut source) = stream.split();

        let join_message = self.join_message()?;
        sink.send(Message::Text(join_message))
            .await
            .context("failed to send join message")?;

        let mut heartbeat = interval(self.cfg.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat_msg = heartbeat_message()?;
        let topic = self.cfg.topic(&self.game_id);

        let mut joined = false;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!(target: LOG_TARGET, "shutdown signal received");
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = sink.send(Message::Text(heartbeat_msg.clone())).await {
                        warn!(target: LOG_TARGET, error = %err, "heartbeat send failed, ending loop");
                        break;
                    }
                }
                msg = source.next() => {
                    match msg {
                        Some(Ok(Message::Text(txt))) => {
                            if let Err(err) = self.handle_text(&topic, &mut joined, txt).await {
                                warn!(target: LOG_TARGET, error = %err, "failed to handle realtime message");
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            sink.send(Message::Pong(payload)).await.ok();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(target: LOG_TARGET, ?frame, "socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(target: LOG_TARGET, error = %err, "websocket error");
                            break;
                        }
                        None => {
                            debug!(target: LOG_TARGET, "websocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        self.send_leave(&mut sink).await.ok();
        let _ = sink.close().await;

        Ok(())
    }

    async fn handle_text(&self, topic: &str, joined: &mut bool, txt: String) -> Result<()> {
        let message: IncomingMessage<Value> =
            serde_json::from_str(&txt).context("failed to deserialize realtime message")?;

        match message.event.as_str() {
            "phx_reply" => {
                if message.topic == topic {
                    if let Some(payload) = message.payload {
                        let reply: ReplyPayload = serde_json::from_value(payload)
                            .context("failed to decode phx_reply payload")?;
                        if reply.status == "ok" {
                            *joined = true;
                            debug!(target: LOG_TARGET, "subscription acknowledged");
                        } else {
                            warn!(
                                target: LOG_TARGET,
                                status = reply.status,
                                "subscription rejected"
                            );
                        }
                    }
                }
            }
            "postgres_changes" => {
                if !*joined {
                    debug!(target: LOG_TARGET, "ignoring change before join ack");
                    return Ok(());
                }
                if let Some(payload) = message.payload {
                    let payload: PgPayload<Change<GameRecord>> = serde_json::from_value(payload)
                        .context("failed to parse postgres change payload")?;
                    if let Some(change) = payload.data {
                        self.handle_change(change).await?;
                    }
                }
            }
            other => {
                debug!(target: LOG_TARGET, event = other, "ignoring realtime event");
            }
        }

        Ok(())
    }

    async fn handle_change(&self, change: Change<GameRecord>) -> Result<()> {
        let wildcard = self.cfg.event == "*";
        if !wildcard
            && !change
                .event_type
                .eq_ignore_ascii_case(self.cfg.event.as_str())
        {
            debug!(
                target: LOG_TARGET,
                event_type = %change.event_type,
                expected = %self.cfg.event,
                "skipping non-matching change"
            );
            return Ok(());
        }

        let record = change
            .new
            .ok_or_else(|| anyhow!("change payload missing `new` record"))?;

        if record.id != self.game_id {
            debug!(
                target: LOG_TARGET,
                delivered = %record.id,
                watched = %self.game_id,
                "dropping change for another game"
            );
            return Ok(());
        }

        self.tx
            .send(record)
            .await
            .map_err(|_| anyhow!("subscription receiver dropped"))?;

        Ok(())
    }

    async fn send_leave(
        &self,
        sink: &mut futures::stream::SplitSink<WsStream, Message>,
    ) -> Result<()> {
        let leave = leave_message(self.cfg.topic(&self.game_id))?;
        sink.send(Message::Text(leave))
            .await
            .context("failed to send leave message")
    }

    fn join_message(&self) -> Result<String> {
        let filter = self.cfg.filter(&self.game_id);
        let payload = JoinPayload {
            access_token: &self.cfg.api_key,
            user_token: &self.cfg.api_key,
            config: JoinConfig {
                postgres_changes: [PostgresChange {
                    event: self.cfg.event.as_str(),
                    schema: self.cfg.schema.as_str(),
                    table: self.cfg.table.as_str(),
                    filter: &filter,
                }],
            },
        };

        let envelope = PhoenixEnvelope {
            topic: self.cfg.topic(&self.game_id),
            event: "phx_join",
            reference: "1",
            payload,
        };

        encode_message(&envelope)
    }
}

/// Per-game subscription factory over a shared realtime endpoint.
pub struct RealtimeFeed {
    cfg: RealtimeConfig,
}

impl RealtimeFeed {
    pub fn new(cfg: RealtimeConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl GameFeed for RealtimeFeed {
    async fn subscribe(&self, game_id: &str) -> Result<GameSubscription> {
        let stop = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.cfg.delivery_capacity);
        let client = RealtimeClient::new(self.cfg.clone(), game_id, tx, stop.clone());

        let pump = tokio::spawn(async move {
            if let Err(err) = client.run().await {
                warn!(target: LOG_TARGET, error = %err, "realtime client exited with error");
            }
        });

        Ok(GameSubscription::new(game_id, rx, stop, pump))
    }
}

fn heartbeat_message() -> Result<String> {
    let envelope = PhoenixEnvelope {
        topic: "phoenix".to_string(),
        event: "heartbeat",
        reference: "hb",
        payload: EmptyPayload {},
    };
    encode_message(&envelope)
}

fn leave_message(topic: String) -> Result<String> {
    let envelope = PhoenixEnvelope {
        topic,
        event: "phx_leave",
        reference: "2",
        payload: EmptyPayload {},
    };
    encode_message(&envelope)
}

fn encode_message<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize realtime message")
}

#[derive(serde::Serialize)]
struct PhoenixEnvelope<T> {
    topic: String,
    event: &'static str,
    #[serde(rename = "ref")]
    reference: &'static str,
    payload: T,
}

#[derive(serde::Serialize)]
struct EmptyPayload {}

#[derive(serde::Serialize)]
struct JoinPayload<'a> {
    access_token: &'a str,
    user_token: &'a str,
    config: JoinConfig<'a>,
}

#[derive(serde::Serialize)]
struct JoinConfig<'a> {
    postgres_changes: [PostgresChange<'a>; 1],
}

#[derive(serde::Serialize)]
struct PostgresChange<'a> {
    event: &'a str,
    schema: &'a str,
    table: &'a str,
    filter: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct IncomingMessage<T = Value> {
    topic: String,
    event: String,
    #[serde(rename = "ref")]
    _ref: Option<String>,
    payload: Option<T>,
}

#[derive(Debug, serde::Deserialize)]
struct PgPayload<T> {
    data: Option<T>,
}

#[derive(Debug, serde::Deserialize)]
struct Change<T> {
    #[serde(rename = "eventType", alias = "type")]
    event_type: String,
    new: Option<T>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplyPayload {
    status: String,
}
