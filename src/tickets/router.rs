use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::channels::ChannelError;
use crate::tickets::service::TicketService;
use crate::tickets::ui::Announcement;
use crate::tickets::{RoleId, SpaceId, TicketError, TicketKind, UserId};

/// Stable identifiers carried by commands, buttons and modals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionId {
    SetupPanel,
    OpenSupportForm,
    OpenMediationForm,
    SubmitSupportForm,
    SubmitMediationForm,
    Claim,
    Close,
    AddParticipant,
}

impl ActionId {
    pub const ALL: [ActionId; 8] = [
        Self::SetupPanel,
        Self::OpenSupportForm,
        Self::OpenMediationForm,
        Self::SubmitSupportForm,
        Self::SubmitMediationForm,
        Self::Claim,
        Self::Close,
        Self::AddParticipant,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetupPanel => "setup",
            Self::OpenSupportForm => "open_regular_ticket",
            Self::OpenMediationForm => "open_middleman",
            Self::SubmitSupportForm => "modal_regular",
            Self::SubmitMediationForm => "modal_middleman",
            Self::Claim => "btn_claim",
            Self::Close => "btn_close",
            Self::AddParticipant => "add",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == raw)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub username: String,
    pub roles: HashSet<RoleId>,
    pub is_admin: bool,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    Interaction { id: String, token: String },
    Message { message_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub source: EventSource,
    pub actor: Actor,
    pub action: String,
    pub fields: HashMap<String, String>,
    pub args: Vec<String>,
    pub space: SpaceId,
}

impl InboundEvent {
    /// Adapts a prefixed text command such as `$add <@123…>`. Returns `None`
    /// for bot authors and for messages that are not commands.
    pub fn from_message(
        message_id: u64,
        actor: Actor,
        space: SpaceId,
        content: &str,
        prefix: &str,
    ) -> Option<Self> {
        if actor.is_bot || prefix.is_empty() {
            return None;
        }
        let body = content.strip_prefix(prefix)?;
        let mut parts = body.split_whitespace();
        let command = parts.next()?.to_lowercase();
        Some(Self {
            source: EventSource::Message { message_id },
            actor,
            action: command,
            fields: HashMap::new(),
            args: parts.map(str::to_string).collect(),
            space,
        })
    }

    pub fn is_message(&self) -> bool {
        matches!(self.source, EventSource::Message { .. })
    }
}

/// Presentation side of the platform: everything the actor sees.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn send_announcement(
        &self,
        space: SpaceId,
        announcement: &Announcement,
    ) -> Result<(), ChannelError>;
    async fn show_form(&self, event: &InboundEvent, kind: TicketKind) -> Result<(), ChannelError>;
    /// Visible to the actor only; transient for text-command events.
    async fn reply_ephemeral(&self, event: &InboundEvent, content: &str) -> Result<(), ChannelError>;
    async fn reply_public(&self, event: &InboundEvent, content: &str) -> Result<(), ChannelError>;
    async fn defer_acknowledgement(&self, event: &InboundEvent) -> Result<(), ChannelError>;
    /// Removes the message that carried a text command.
    async fn discard_trigger(&self, event: &InboundEvent) -> Result<(), ChannelError>;
}

pub struct EventRouter {
    service: Arc<TicketService>,
    presenter: Arc<dyn Presenter>,
}

impl EventRouter {
    pub fn new(service: Arc<TicketService>, presenter: Arc<dyn Presenter>) -> Self {
        Self { service, presenter }
    }

    pub fn service(&self) -> &Arc<TicketService> {
        &self.service
    }

    pub async fn route(&self, event: InboundEvent) {
        if event.actor.is_bot {
            return;
        }
        let Some(action) = ActionId::parse(&event.action) else {
            debug!("Ignoring unknown action '{}'", event.action);
            return;
        };
        info!(
            "Routing {action} from {} ({}) in {}",
            event.actor.username, event.actor.id, event.space
        );

        let result = match action {
            ActionId::SetupPanel => self.service.post_panel(&event).await,
            ActionId::OpenSupportForm => self.show_form(&event, TicketKind::Support).await,
            ActionId::OpenMediationForm => self.show_form(&event, TicketKind::Mediation).await,
            ActionId::SubmitSupportForm => self.submit(&event, TicketKind::Support).await,
            ActionId::SubmitMediationForm => self.submit(&event, TicketKind::Mediation).await,
            ActionId::Claim => self.service.claim(&event).await.map(|_| ()),
            ActionId::Close => self.service.close(&event).await.map(|_| ()),
            ActionId::AddParticipant => self.service.add_participant(&event).await.map(|_| ()),
        };

        if let Err(e) = result {
            self.report(&event, action, e).await;
        }
    }

    async fn show_form(&self, event: &InboundEvent, kind: TicketKind) -> Result<(), TicketError> {
        self.presenter.show_form(event, kind).await?;
        Ok(())
    }

    async fn submit(&self, event: &InboundEvent, kind: TicketKind) -> Result<(), TicketError> {
        if let Err(e) = self.presenter.defer_acknowledgement(event).await {
            warn!("Failed to defer form submission: {e}");
        }
        self.service.open_ticket(event, kind).await.map(|_| ())
    }

    async fn report(&self, event: &InboundEvent, action: ActionId, e: TicketError) {
        if e.is_expected() {
            debug!("{action} by {} rejected: {e}", event.actor.id);
        } else {
            error!("{action} by {} failed: {e}", event.actor.id);
        }
        if let Err(send_err) = self.presenter.reply_ephemeral(event, &e.user_message()).await {
            warn!("Failed to tell {} about '{e}': {send_err}", event.actor.id);
        }
    }
}
