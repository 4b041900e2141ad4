//! Discord gateway receiver.
//!
//! Interactions arrive over HTTP, but prefixed text commands such as `$add`
//! only reach a bot through the gateway websocket. This connection listens for
//! `MESSAGE_CREATE` in the configured guild and hands commands to the router.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use crate::config::DiscordConfig;
use crate::tickets::router::{Actor, InboundEvent};
use crate::tickets::{EventRouter, RoleId, SpaceId, UserId};

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub const GUILD_MESSAGES: u64 = 1 << 9;
pub const MESSAGE_CONTENT: u64 = 1 << 15;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Malformed gateway payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Gateway closed the connection{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),
    #[error("Gateway refused the session ({code}): {reason}")]
    Refused { code: u16, reason: String },
    #[error("Expected HELLO, got op {0}")]
    NoHello(u8),
    #[error("Heartbeat not acknowledged")]
    Zombie,
}

impl GatewayError {
    /// Bad token, bad intents and similar: reconnecting will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Refused { code, .. } if matches!(*code, 4004 | 4010..=4014))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn identify(token: &str, intents: u64) -> Self {
        Self {
            op: OP_IDENTIFY,
            d: json!({
                "token": token,
                "intents": intents,
                "properties": { "os": std::env::consts::OS, "browser": "ticketdesk", "device": "ticketdesk" }
            }),
            s: None,
            t: None,
        }
    }

    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self {
            op: OP_HEARTBEAT,
            d: sequence.map_or(Value::Null, Value::from),
            s: None,
            t: None,
        }
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        self.d
            .get("heartbeat_interval")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    #[serde(default)]
    pub content: String,
    pub author: MessageAuthor,
    pub member: Option<MessageMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageMember {
    #[serde(default)]
    pub roles: Vec<String>,
}

impl MessageCreate {
    /// Text commands carry no permission bits, so the actor is never treated
    /// as an administrator.
    pub fn to_event(&self, prefix: &str) -> Option<InboundEvent> {
        let roles: HashSet<RoleId> = self
            .member
            .as_ref()
            .map(|m| m.roles.iter().filter_map(|r| r.parse().ok()).map(RoleId).collect())
            .unwrap_or_default();
        let actor = Actor {
            id: UserId(self.author.id.parse().ok()?),
            username: self.author.username.clone(),
            roles,
            is_admin: false,
            is_bot: self.author.bot,
        };
        InboundEvent::from_message(
            self.id.parse().ok()?,
            actor,
            SpaceId(self.channel_id.parse().ok()?),
            &self.content,
            prefix,
        )
    }
}

pub struct GatewayClient {
    url: String,
    token: String,
    guild_id: String,
    intents: u64,
    prefix: String,
    router: Arc<EventRouter>,
}

impl GatewayClient {
    pub fn new(config: &DiscordConfig, prefix: &str, router: Arc<EventRouter>) -> Self {
        Self {
            url: GATEWAY_URL.to_string(),
            token: config.token.clone(),
            guild_id: config.guild_id.clone(),
            intents: GUILD_MESSAGES | MESSAGE_CONTENT,
            prefix: prefix.to_string(),
            router,
        }
    }

    /// Turns a dispatch into a routable command. Anything that is not a
    /// prefixed command posted in our guild yields `None`.
    pub fn command_event(&self, payload: &GatewayPayload) -> Option<InboundEvent> {
        if payload.op != OP_DISPATCH || payload.t.as_deref() != Some("MESSAGE_CREATE") {
            return None;
        }
        let message: MessageCreate = match serde_json::from_value(payload.d.clone()) {
            Ok(m) => m,
            Err(e) => {
                warn!("Unreadable MESSAGE_CREATE: {e}");
                return None;
            }
        };
        if message.guild_id.as_deref() != Some(self.guild_id.as_str()) {
            return None;
        }
        message.to_event(&self.prefix)
    }

    /// Keeps a session open until the gateway refuses us for good.
    pub async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            match self.session().await {
                Ok(()) => {
                    info!("Gateway asked for a new session");
                    attempt = 0;
                }
                Err(e) if e.is_fatal() => {
                    error!("Gateway disabled, text commands will not be received: {e}");
                    return;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    warn!("Gateway session ended (attempt {attempt}): {e}");
                }
            }
            tokio::time::sleep(RECONNECT_DELAY * attempt.clamp(1, 6)).await;
        }
    }

    async fn session(&self) -> Result<(), GatewayError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut sender, mut receiver) = socket.split();

        let hello = match receiver.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<GatewayPayload>(&text)?,
            Some(Ok(Message::Close(frame))) => return Err(closed(frame)),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(_)) | None => return Err(GatewayError::Closed(None)),
        };
        if hello.op != OP_HELLO {
            return Err(GatewayError::NoHello(hello.op));
        }
        let interval = hello.heartbeat_interval().unwrap_or(Duration::from_secs(41));

        let identify = serde_json::to_string(&GatewayPayload::identify(&self.token, self.intents))?;
        sender.send(Message::Text(identify.into())).await?;
        info!("Gateway connected, heartbeat every {}ms", interval.as_millis());

        let mut sequence: Option<u64> = None;
        let mut acknowledged = true;
        let mut heartbeat = tokio::time::interval(interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if !acknowledged {
                        return Err(GatewayError::Zombie);
                    }
                    acknowledged = false;
                    let beat = serde_json::to_string(&GatewayPayload::heartbeat(sequence))?;
                    sender.send(Message::Text(beat.into())).await?;
                }
                frame = receiver.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => return Err(closed(frame)),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(GatewayError::Closed(None)),
                    };
                    let payload: GatewayPayload = serde_json::from_str(&text)?;
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }
                    match payload.op {
                        OP_DISPATCH => self.dispatch(&payload),
                        OP_HEARTBEAT => {
                            let beat = serde_json::to_string(&GatewayPayload::heartbeat(sequence))?;
                            sender.send(Message::Text(beat.into())).await?;
                        }
                        OP_HEARTBEAT_ACK => acknowledged = true,
                        OP_RECONNECT | OP_INVALID_SESSION => return Ok(()),
                        other => debug!("Ignoring gateway op {other}"),
                    }
                }
            }
        }
    }

    fn dispatch(&self, payload: &GatewayPayload) {
        if payload.t.as_deref() == Some("READY") {
            info!("Gateway session ready");
            return;
        }
        if let Some(event) = self.command_event(payload) {
            let router = Arc::clone(&self.router);
            tokio::spawn(async move { router.route(event).await });
        }
    }
}

fn closed(frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame>) -> GatewayError {
    match frame {
        Some(frame) => GatewayError::Refused {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        },
        None => GatewayError::Closed(None),
    }
}
