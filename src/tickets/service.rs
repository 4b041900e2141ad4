use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TicketConfig;
use crate::tickets::auth::AuthorizationGate;
use crate::tickets::intake::intake;
use crate::tickets::machine::{Effect, LifecycleEvent, StateMachine, Transition};
use crate::tickets::router::{InboundEvent, Presenter};
use crate::tickets::scheduler::CloseScheduler;
use crate::tickets::space::{SpaceManager, SpacePlatform};
use crate::tickets::store::{TicketLocks, TicketStore};
use crate::tickets::ui::{self, Announcement};
use crate::tickets::{SpaceId, Ticket, TicketError, TicketKind};

pub struct TicketService {
    machine: StateMachine,
    spaces: SpaceManager,
    presenter: Arc<dyn Presenter>,
    store: Arc<dyn TicketStore>,
    scheduler: CloseScheduler,
    locks: Arc<TicketLocks>,
    log_space: Option<SpaceId>,
}

impl TicketService {
    pub fn new(
        config: &TicketConfig,
        platform: Arc<dyn SpacePlatform>,
        presenter: Arc<dyn Presenter>,
        store: Arc<dyn TicketStore>,
    ) -> Self {
        Self {
            machine: StateMachine::new(
                AuthorizationGate::new(config.staff_role),
                config.close_delay,
            ),
            spaces: SpaceManager::new(platform),
            presenter,
            store,
            scheduler: CloseScheduler::new(),
            locks: Arc::new(TicketLocks::new()),
            log_space: config.log_channel,
        }
    }

    pub fn scheduler(&self) -> &CloseScheduler {
        &self.scheduler
    }

    pub fn locks(&self) -> &TicketLocks {
        &self.locks
    }

    pub fn close_delay(&self) -> Duration {
        self.machine.close_delay()
    }

    pub async fn ticket(&self, id: SpaceId) -> Option<Ticket> {
        self.store.get(id).await
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        self.store.list().await
    }

    pub async fn post_panel(&self, event: &InboundEvent) -> Result<(), TicketError> {
        if !event.actor.is_admin {
            return Err(TicketError::AdminRequired);
        }
        self.presenter
            .send_announcement(event.space, &ui::setup_panel())
            .await?;
        self.best_effort("panel confirmation", self.presenter.reply_ephemeral(event, "Panel created!").await);
        Ok(())
    }

    pub async fn open_ticket(&self, event: &InboundEvent, kind: TicketKind) -> Result<Ticket, TicketError> {
        let payload = intake(kind, &event.fields)?;
        let lifecycle = LifecycleEvent::Submit {
            creator: event.actor.id,
            username: event.actor.username.clone(),
            parent: event.space,
            payload,
        };
        let transition = self.machine.decide(None, &event.actor.roles, &lifecycle)?;
        let ticket = self.execute(event, &lifecycle, transition, None).await?;
        let ticket = ticket.ok_or(TicketError::NotATicket)?;

        info!(
            "Opened {} ticket {} for {} ({})",
            ticket.kind, ticket.id, event.actor.username, event.actor.id
        );
        self.audit(format!(
            "{} {} opened by {}",
            ticket.kind.label(),
            ticket.id.mention(),
            ticket.creator_id.mention()
        ))
        .await;
        Ok(ticket)
    }

    pub async fn claim(&self, event: &InboundEvent) -> Result<Ticket, TicketError> {
        let lifecycle = LifecycleEvent::Claim {
            actor: event.actor.id,
        };
        let ticket = self.transition(event, lifecycle).await?.ok_or(TicketError::NotATicket)?;
        info!("Ticket {} claimed by {}", ticket.id, event.actor.id);
        self.audit(format!(
            "Ticket {} claimed by {}",
            ticket.id.mention(),
            event.actor.id.mention()
        ))
        .await;
        Ok(ticket)
    }

    pub async fn close(&self, event: &InboundEvent) -> Result<Ticket, TicketError> {
        let lifecycle = LifecycleEvent::Close {
            actor: event.actor.id,
        };
        let ticket = self.transition(event, lifecycle).await?.ok_or(TicketError::NotATicket)?;
        self.audit(format!(
            "Ticket {} closing, requested by {}",
            ticket.id.mention(),
            event.actor.id.mention()
        ))
        .await;
        Ok(ticket)
    }

    pub async fn add_participant(&self, event: &InboundEvent) -> Result<Ticket, TicketError> {
        let lifecycle = LifecycleEvent::AddParticipant {
            actor: event.actor.id,
            target: event.args.first().cloned(),
        };
        self.transition(event, lifecycle).await?.ok_or(TicketError::NotATicket)
    }

    /// Decide, commit and apply under the ticket's lock.
    async fn transition(
        &self,
        event: &InboundEvent,
        lifecycle: LifecycleEvent,
    ) -> Result<Option<Ticket>, TicketError> {
        let guard = self.locks.acquire(event.space).await;

        let mut current = self.store.get(event.space).await;
        if current.is_none() {
            drop(guard);
            self.locks.forget(event.space).await;
        }
        let transition = self
            .machine
            .decide(current.as_ref(), &event.actor.roles, &lifecycle)?;

        if let Some(ticket) = current.as_mut() {
            let before = ticket.state;
            transition.commit(ticket, &lifecycle)?;
            if ticket.state != before {
                self.store.update(ticket.clone()).await;
            }
        }

        self.execute(event, &lifecycle, transition, current).await
    }

    async fn execute(
        &self,
        event: &InboundEvent,
        lifecycle: &LifecycleEvent,
        transition: Transition,
        mut ticket: Option<Ticket>,
    ) -> Result<Option<Ticket>, TicketError> {
        for effect in transition.effects {
            match effect {
                Effect::CreateSpace { parent, name } => {
                    let LifecycleEvent::Submit { creator, payload, .. } = lifecycle else {
                        continue;
                    };
                    let id = self.spaces.create_space(parent, &name, payload.kind()).await?;
                    let created = Ticket::open(id, *creator, name, payload.clone());
                    self.store.insert(created.clone()).await;
                    ticket = Some(created);
                }
                Effect::AddCreator(user) => {
                    if let Some(t) = ticket.as_ref() {
                        self.spaces.add_member(t.id, user).await;
                    }
                }
                Effect::AddStaff { except } => {
                    if let Some(t) = ticket.as_mut() {
                        let role = self.machine.gate().staff_role();
                        let added = self.spaces.add_staff(t.id, role, except).await;
                        t.participants.extend(added);
                        self.store.update(t.clone()).await;
                    }
                }
                Effect::AnnounceOpening => {
                    if let Some(t) = ticket.as_ref() {
                        let announcement =
                            ui::opening_announcement(t, Some(self.machine.gate().staff_role()));
                        self.best_effort(
                            "opening announcement",
                            self.presenter.send_announcement(t.id, &announcement).await,
                        );
                    }
                }
                Effect::ConfirmToRequester => {
                    if let Some(t) = ticket.as_ref() {
                        let link = format!("\u{2192} {}", t.id.mention());
                        self.best_effort(
                            "ticket link",
                            self.presenter.reply_ephemeral(event, &link).await,
                        );
                    }
                }
                Effect::RenameSpace { name } => {
                    if let Some(t) = ticket.as_mut() {
                        // The claim is already committed; a failed rename leaves it claimed.
                        let applied = self.spaces.rename_space(t.id, &name).await?;
                        t.name = applied;
                        self.store.update(t.clone()).await;
                    }
                }
                Effect::AddMember(user) => {
                    if let Some(t) = ticket.as_mut() {
                        self.spaces.add_requested_member(t.id, user).await?;
                        if t.add_participant(user) {
                            self.store.update(t.clone()).await;
                        }
                        info!("Added {user} to ticket {}", t.id);
                    }
                }
                Effect::Respond(content) => {
                    self.best_effort("reply", self.presenter.reply_public(event, &content).await);
                }
                Effect::Announce(content) if event.is_message() => {
                    self.best_effort(
                        "announcement",
                        self.presenter
                            .send_announcement(event.space, &Announcement::text(content))
                            .await,
                    );
                }
                // An interaction must be answered, so the announcement is its reply.
                Effect::Announce(content) => {
                    self.best_effort("announcement", self.presenter.reply_public(event, &content).await);
                }
                Effect::ScheduleDeletion { after } => {
                    if let Some(t) = ticket.as_ref() {
                        self.schedule_deletion(t.id, after).await;
                    }
                }
                Effect::DiscardTrigger => {
                    if event.is_message() {
                        self.best_effort("command cleanup", self.presenter.discard_trigger(event).await);
                    }
                }
            }
        }
        Ok(ticket)
    }

    async fn schedule_deletion(&self, id: SpaceId, after: Duration) {
        let spaces = self.spaces.clone();
        let store = Arc::clone(&self.store);
        let locks = Arc::clone(&self.locks);
        self.scheduler
            .schedule(id, after, async move {
                if spaces.delete_space(id).await {
                    info!("Deleted ticket thread {id}");
                }
                store.remove(id).await;
                locks.forget(id).await;
            })
            .await;
    }

    async fn audit(&self, line: String) {
        if let Some(log_space) = self.log_space {
            self.best_effort(
                "audit log",
                self.presenter
                    .send_announcement(log_space, &Announcement::text(line))
                    .await,
            );
        }
    }

    fn best_effort<E: std::fmt::Display>(&self, what: &str, result: Result<(), E>) {
        if let Err(e) = result {
            warn!("Failed to send {what}: {e}");
        }
    }
}
