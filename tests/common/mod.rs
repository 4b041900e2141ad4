#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ticketdesk::channels::ChannelError;
use ticketdesk::config::TicketConfig;
use ticketdesk::tickets::router::Presenter;
use ticketdesk::tickets::space::SpacePlatform;
use ticketdesk::tickets::store::InMemoryTicketStore;
use ticketdesk::tickets::ui::Announcement;
use ticketdesk::tickets::{
    Actor, EventRouter, EventSource, InboundEvent, RoleId, SpaceId, TicketKind, TicketService, UserId,
};

pub const STAFF_ROLE: RoleId = RoleId(1465061909668565038);
pub const PANEL_CHANNEL: SpaceId = SpaceId(700000000000000000);
pub const CREATOR: UserId = UserId(100000000000000001);
pub const STAFF_A: UserId = UserId(200000000000000001);
pub const STAFF_B: UserId = UserId(200000000000000002);
pub const CLOSE_DELAY: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Create { parent: SpaceId, name: String },
    AddMember { space: SpaceId, user: UserId },
    Rename { space: SpaceId, name: String },
    Delete(SpaceId),
    ListStaff(RoleId),
}

pub struct FakePlatform {
    next_id: AtomicU64,
    pub staff: Mutex<Vec<UserId>>,
    pub calls: Mutex<Vec<PlatformCall>>,
    pub names: Mutex<HashMap<SpaceId, String>>,
    pub members: Mutex<HashMap<SpaceId, HashSet<UserId>>>,
    pub fail_create: AtomicBool,
    pub fail_rename: AtomicBool,
    pub fail_delete: AtomicBool,
    pub rejected_members: Mutex<HashSet<UserId>>,
}

impl FakePlatform {
    pub fn new(staff: Vec<UserId>) -> Self {
        Self {
            next_id: AtomicU64::new(900000000000000000),
            staff: Mutex::new(staff),
            calls: Mutex::new(Vec::new()),
            names: Mutex::new(HashMap::new()),
            members: Mutex::new(HashMap::new()),
            fail_create: AtomicBool::new(false),
            fail_rename: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            rejected_members: Mutex::new(HashSet::new()),
        }
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn name_of(&self, space: SpaceId) -> Option<String> {
        self.names.lock().unwrap().get(&space).cloned()
    }

    pub fn members_of(&self, space: SpaceId) -> HashSet<UserId> {
        self.members.lock().unwrap().get(&space).cloned().unwrap_or_default()
    }

    pub fn exists(&self, space: SpaceId) -> bool {
        self.names.lock().unwrap().contains_key(&space)
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SpacePlatform for FakePlatform {
    async fn create_private_space(
        &self,
        parent: SpaceId,
        name: &str,
        _reason: &str,
    ) -> Result<SpaceId, ChannelError> {
        self.record(PlatformCall::Create {
            parent,
            name: name.to_string(),
        });
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ChannelError::Forbidden("Missing Access".to_string()));
        }
        let id = SpaceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.names.lock().unwrap().insert(id, name.to_string());
        Ok(id)
    }

    async fn add_member(&self, space: SpaceId, user: UserId) -> Result<(), ChannelError> {
        self.record(PlatformCall::AddMember { space, user });
        if self.rejected_members.lock().unwrap().contains(&user) {
            return Err(ChannelError::NotFound("Unknown Member".to_string()));
        }
        self.members.lock().unwrap().entry(space).or_default().insert(user);
        Ok(())
    }

    async fn rename_space(&self, space: SpaceId, name: &str) -> Result<(), ChannelError> {
        self.record(PlatformCall::Rename {
            space,
            name: name.to_string(),
        });
        if self.fail_rename.load(Ordering::SeqCst) {
            return Err(ChannelError::RateLimited { retry_after: Some(600.0) });
        }
        self.names.lock().unwrap().insert(space, name.to_string());
        Ok(())
    }

    async fn delete_space(&self, space: SpaceId) -> Result<(), ChannelError> {
        self.record(PlatformCall::Delete(space));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ChannelError::NotFound("Unknown Channel".to_string()));
        }
        self.names.lock().unwrap().remove(&space);
        self.members.lock().unwrap().remove(&space);
        Ok(())
    }

    async fn role_members(&self, role: RoleId) -> Result<Vec<UserId>, ChannelError> {
        self.record(PlatformCall::ListStaff(role));
        Ok(self.staff.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shown {
    Announcement { space: SpaceId, announcement: Announcement },
    Form(TicketKind),
    Ephemeral(String),
    Public(String),
    Deferred,
    Discarded,
}

#[derive(Default)]
pub struct RecordingPresenter {
    shown: Mutex<Vec<Shown>>,
}

impl RecordingPresenter {
    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().unwrap().clone()
    }

    pub fn ephemeral(&self) -> Vec<String> {
        self.shown()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Ephemeral(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn public(&self) -> Vec<String> {
        self.shown()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Public(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn announcements_in(&self, space: SpaceId) -> Vec<Announcement> {
        self.shown()
            .into_iter()
            .filter_map(|s| match s {
                Shown::Announcement { space: s, announcement } if s == space => Some(announcement),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.shown.lock().unwrap().clear();
    }

    fn push(&self, shown: Shown) {
        self.shown.lock().unwrap().push(shown);
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn send_announcement(&self, space: SpaceId, announcement: &Announcement) -> Result<(), ChannelError> {
        self.push(Shown::Announcement {
            space,
            announcement: announcement.clone(),
        });
        Ok(())
    }

    async fn show_form(&self, _event: &InboundEvent, kind: TicketKind) -> Result<(), ChannelError> {
        self.push(Shown::Form(kind));
        Ok(())
    }

    async fn reply_ephemeral(&self, _event: &InboundEvent, content: &str) -> Result<(), ChannelError> {
        self.push(Shown::Ephemeral(content.to_string()));
        Ok(())
    }

    async fn reply_public(&self, _event: &InboundEvent, content: &str) -> Result<(), ChannelError> {
        self.push(Shown::Public(content.to_string()));
        Ok(())
    }

    async fn defer_acknowledgement(&self, _event: &InboundEvent) -> Result<(), ChannelError> {
        self.push(Shown::Deferred);
        Ok(())
    }

    async fn discard_trigger(&self, _event: &InboundEvent) -> Result<(), ChannelError> {
        self.push(Shown::Discarded);
        Ok(())
    }
}

pub struct Harness {
    pub platform: Arc<FakePlatform>,
    pub presenter: Arc<RecordingPresenter>,
    pub router: Arc<EventRouter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TicketConfig::new(STAFF_ROLE))
    }

    pub fn with_config(config: TicketConfig) -> Self {
        let platform = Arc::new(FakePlatform::new(vec![STAFF_A, STAFF_B]));
        let presenter = Arc::new(RecordingPresenter::default());
        let service = Arc::new(TicketService::new(
            &config,
            platform.clone(),
            presenter.clone(),
            Arc::new(InMemoryTicketStore::new()),
        ));
        let router = Arc::new(EventRouter::new(service, presenter.clone()));
        Self {
            platform,
            presenter,
            router,
        }
    }

    pub fn service(&self) -> &Arc<TicketService> {
        self.router.service()
    }

    /// Submits a support form as `alice` and returns the new thread.
    pub async fn open_support_ticket(&self) -> SpaceId {
        self.router
            .route(submit_support(user(CREATOR, "alice"), "payment issue"))
            .await;
        self.service()
            .tickets()
            .await
            .into_iter()
            .map(|t| t.id)
            .max()
            .expect("ticket opened")
    }
}

pub fn user(id: UserId, username: &str) -> Actor {
    Actor {
        id,
        username: username.to_string(),
        roles: HashSet::new(),
        is_admin: false,
        is_bot: false,
    }
}

pub fn staff(id: UserId, username: &str) -> Actor {
    Actor {
        roles: [STAFF_ROLE].into_iter().collect(),
        ..user(id, username)
    }
}

pub fn interaction(actor: Actor, action: &str, space: SpaceId) -> InboundEvent {
    InboundEvent {
        source: EventSource::Interaction {
            id: "1".to_string(),
            token: "token".to_string(),
        },
        actor,
        action: action.to_string(),
        fields: HashMap::new(),
        args: Vec::new(),
        space,
    }
}

pub fn submit_support(actor: Actor, reason: &str) -> InboundEvent {
    let mut event = interaction(actor, "modal_regular", PANEL_CHANNEL);
    event.fields.insert("reason".to_string(), reason.to_string());
    event
}

pub fn submit_mediation(actor: Actor, fields: &[(&str, &str)]) -> InboundEvent {
    let mut event = interaction(actor, "modal_middleman", PANEL_CHANNEL);
    for (key, value) in fields {
        event.fields.insert(key.to_string(), value.to_string());
    }
    event
}

pub fn text_command(actor: Actor, space: SpaceId, content: &str) -> InboundEvent {
    InboundEvent::from_message(555, actor, space, content, "$").expect("prefixed command")
}
