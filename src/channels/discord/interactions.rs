//! Discord HTTP interactions: payload decoding, request signature checks and
//! the presenter that answers through the interaction callback.
//!
//! The first answer to an interaction travels back in the HTTP response body,
//! so the presenter hands it to the waiting request handler through a oneshot
//! channel. Anything after that goes through the followup webhook.

use async_trait::async_trait;
use log::{debug, warn};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use super::{parse_snowflake, DiscordClient, MessagePayload, ModalPayload, ADMINISTRATOR, EPHEMERAL};
use crate::channels::ChannelError;
use crate::tickets::router::{Actor, EventSource, InboundEvent, Presenter};
use crate::tickets::ui::{Announcement, FormSpec};
use crate::tickets::{RoleId, SpaceId, TicketKind, UserId};

pub const PING: u8 = 1;
pub const APPLICATION_COMMAND: u8 = 2;
pub const MESSAGE_COMPONENT: u8 = 3;
pub const MODAL_SUBMIT: u8 = 5;

const CALLBACK_PONG: u8 = 1;
const CALLBACK_MESSAGE: u8 = 4;
const CALLBACK_DEFERRED_MESSAGE: u8 = 5;
const CALLBACK_DEFERRED_UPDATE: u8 = 6;
const CALLBACK_MODAL: u8 = 9;

/// How long replies to text commands stay visible.
pub const TRANSIENT_REPLY_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub token: String,
    pub data: Option<InteractionData>,
    pub channel_id: Option<String>,
    pub member: Option<InteractionMember>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionData {
    pub name: Option<String>,
    pub custom_id: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub components: Vec<SubmittedRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedRow {
    #[serde(default)]
    pub components: Vec<SubmittedInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedInput {
    pub custom_id: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionMember {
    pub user: Option<InteractionUser>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

impl Interaction {
    /// Normalizes a guild interaction. Interactions outside a guild channel
    /// carry no member and yield `None`.
    pub fn to_event(&self) -> Option<InboundEvent> {
        let member = self.member.as_ref()?;
        let user = member.user.as_ref()?;
        let space = SpaceId(self.channel_id.as_deref()?.parse().ok()?);
        let data = self.data.clone().unwrap_or_default();

        let action = match self.kind {
            APPLICATION_COMMAND => data.name?,
            MESSAGE_COMPONENT | MODAL_SUBMIT => data.custom_id?,
            _ => return None,
        };

        let fields = data
            .components
            .into_iter()
            .flat_map(|row| row.components)
            .map(|input| (input.custom_id, input.value.unwrap_or_default()))
            .collect::<HashMap<_, _>>();

        let args = data
            .options
            .into_iter()
            .filter_map(|option| {
                let value = option.value?;
                debug!("Command option {} = {value}", option.name);
                Some(match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            })
            .collect();

        let is_admin = member
            .permissions
            .as_deref()
            .and_then(|p| p.parse::<u64>().ok())
            .is_some_and(|p| p & ADMINISTRATOR != 0);

        Some(InboundEvent {
            source: EventSource::Interaction {
                id: self.id.clone(),
                token: self.token.clone(),
            },
            actor: Actor {
                id: UserId(user.id.parse().ok()?),
                username: user.username.clone(),
                roles: member
                    .roles
                    .iter()
                    .filter_map(|r| r.parse().ok())
                    .map(RoleId)
                    .collect(),
                is_admin,
                is_bot: user.bot,
            },
            action,
            fields,
            args,
            space,
        })
    }
}

/// Checks the Ed25519 signature Discord puts on every interaction request.
pub fn verify_signature(public_key_hex: &str, signature_hex: &str, timestamp: &str, body: &[u8]) -> bool {
    let (Ok(public_key), Ok(signature)) = (hex::decode(public_key_hex), hex::decode(signature_hex)) else {
        return false;
    };
    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    UnparsedPublicKey::new(&ED25519, &public_key)
        .verify(&message, &signature)
        .is_ok()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CallbackData {
    Message(MessagePayload),
    Modal(ModalPayload),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CallbackData>,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: CALLBACK_PONG,
            data: None,
        }
    }

    pub fn message(payload: MessagePayload) -> Self {
        Self {
            kind: CALLBACK_MESSAGE,
            data: Some(CallbackData::Message(payload)),
        }
    }

    pub fn modal(modal: ModalPayload) -> Self {
        Self {
            kind: CALLBACK_MODAL,
            data: Some(CallbackData::Modal(modal)),
        }
    }

    pub fn deferred_reply() -> Self {
        Self {
            kind: CALLBACK_DEFERRED_MESSAGE,
            data: Some(CallbackData::Message(MessagePayload {
                flags: Some(EPHEMERAL),
                ..Default::default()
            })),
        }
    }

    pub fn deferred_update() -> Self {
        Self {
            kind: CALLBACK_DEFERRED_UPDATE,
            data: None,
        }
    }

    /// Acknowledgement sent when nothing answered in time. Commands get a
    /// private "thinking" placeholder, buttons and forms a silent update.
    pub fn acknowledge(interaction_kind: u8) -> Self {
        if interaction_kind == APPLICATION_COMMAND {
            Self::deferred_reply()
        } else {
            Self::deferred_update()
        }
    }

    pub fn is_deferred_reply(&self) -> bool {
        self.kind == CALLBACK_DEFERRED_MESSAGE
    }
}

pub struct DiscordPresenter {
    client: Arc<DiscordClient>,
    pending: Mutex<HashMap<String, oneshot::Sender<InteractionResponse>>>,
    /// Interactions answered with a deferred reply whose placeholder still
    /// needs to be replaced.
    deferred: Mutex<HashSet<String>>,
    transient_ttl: Duration,
}

impl DiscordPresenter {
    pub fn new(client: Arc<DiscordClient>) -> Self {
        Self {
            client,
            pending: Mutex::new(HashMap::new()),
            deferred: Mutex::new(HashSet::new()),
            transient_ttl: TRANSIENT_REPLY_TTL,
        }
    }

    /// Opens the slot for the initial answer to `interaction_id`.
    pub async fn begin(&self, interaction_id: &str) -> oneshot::Receiver<InteractionResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(interaction_id.to_string(), tx);
        rx
    }

    /// Closes the initial-answer slot on behalf of the request handler. Returns
    /// the acknowledgement to send when the slot was still open.
    pub async fn take_unanswered(&self, interaction_id: &str, interaction_kind: u8) -> Option<InteractionResponse> {
        let mut pending = self.pending.lock().await;
        pending.remove(interaction_id)?;
        let ack = InteractionResponse::acknowledge(interaction_kind);
        if ack.is_deferred_reply() {
            self.deferred.lock().await.insert(interaction_id.to_string());
        }
        Some(ack)
    }

    pub async fn finish(&self, interaction_id: &str) {
        self.pending.lock().await.remove(interaction_id);
        self.deferred.lock().await.remove(interaction_id);
    }

    /// Sends `response` as the initial answer if that slot is still open.
    async fn answer(&self, interaction_id: &str, response: InteractionResponse) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.remove(interaction_id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    async fn take_deferred(&self, interaction_id: &str) -> bool {
        self.deferred.lock().await.remove(interaction_id)
    }

    async fn follow_up(&self, interaction_id: &str, token: &str, payload: MessagePayload) -> Result<(), ChannelError> {
        if self.take_deferred(interaction_id).await {
            self.client.edit_original(token, &payload).await
        } else {
            self.client.create_followup(token, &payload).await
        }
    }

    async fn reply_to_message(
        &self,
        space: SpaceId,
        message_id: u64,
        content: &str,
        transient: bool,
    ) -> Result<(), ChannelError> {
        let sent = self
            .client
            .send_message(space, &MessagePayload::text(content).replying_to(message_id))
            .await?;
        if !transient {
            return Ok(());
        }

        let reply_id = parse_snowflake(&sent.id)?;
        let client = Arc::clone(&self.client);
        let ttl = self.transient_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = client.delete_message(space, reply_id).await {
                debug!("Transient reply {reply_id} in {space} not deleted: {e}");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl Presenter for DiscordPresenter {
    async fn send_announcement(&self, space: SpaceId, announcement: &Announcement) -> Result<(), ChannelError> {
        self.client
            .send_message(space, &MessagePayload::from_announcement(announcement))
            .await
            .map(|_| ())
    }

    async fn show_form(&self, event: &InboundEvent, kind: TicketKind) -> Result<(), ChannelError> {
        let EventSource::Interaction { id, .. } = &event.source else {
            warn!("Forms can only be shown in response to an interaction");
            return Err(ChannelError::NotConfigured);
        };
        let modal = ModalPayload::from_form(&FormSpec::for_kind(kind));
        if self.answer(id, InteractionResponse::modal(modal)).await {
            Ok(())
        } else {
            Err(ChannelError::AlreadyResponded)
        }
    }

    async fn reply_ephemeral(&self, event: &InboundEvent, content: &str) -> Result<(), ChannelError> {
        match &event.source {
            EventSource::Interaction { id, token } => {
                let payload = MessagePayload::ephemeral(content);
                if self.answer(id, InteractionResponse::message(payload.clone())).await {
                    return Ok(());
                }
                self.follow_up(id, token, payload).await
            }
            EventSource::Message { message_id } => {
                self.reply_to_message(event.space, *message_id, content, true).await
            }
        }
    }

    async fn reply_public(&self, event: &InboundEvent, content: &str) -> Result<(), ChannelError> {
        match &event.source {
            EventSource::Interaction { id, token } => {
                let payload = MessagePayload::text(content);
                if self.answer(id, InteractionResponse::message(payload.clone())).await {
                    return Ok(());
                }
                self.follow_up(id, token, payload).await
            }
            EventSource::Message { message_id } => {
                self.reply_to_message(event.space, *message_id, content, false).await
            }
        }
    }

    async fn defer_acknowledgement(&self, event: &InboundEvent) -> Result<(), ChannelError> {
        if let EventSource::Interaction { id, .. } = &event.source {
            if self.answer(id, InteractionResponse::deferred_reply()).await {
                self.deferred.lock().await.insert(id.clone());
            }
        }
        Ok(())
    }

    async fn discard_trigger(&self, event: &InboundEvent) -> Result<(), ChannelError> {
        match &event.source {
            EventSource::Message { message_id } => self.client.delete_message(event.space, *message_id).await,
            EventSource::Interaction { .. } => Ok(()),
        }
    }
}
