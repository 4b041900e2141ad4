//! Lifecycle decisions.
//!
//! `StateMachine::decide` is pure: given the current ticket (if any), the
//! actor's roles and an event, it returns the next state and the ordered list
//! of side effects. `TicketService` executes them.

use std::collections::HashSet;
use std::time::Duration;

use crate::tickets::auth::{Action, AuthorizationGate};
use crate::tickets::intake::{parse_member_reference, Payload};
use crate::tickets::space::{carries_claim_marker, claimed_name, space_name};
use crate::tickets::{RoleId, SpaceId, Ticket, TicketError, TicketState, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Submit {
        creator: UserId,
        username: String,
        parent: SpaceId,
        payload: Payload,
    },
    Claim {
        actor: UserId,
    },
    Close {
        actor: UserId,
    },
    AddParticipant {
        actor: UserId,
        target: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CreateSpace { parent: SpaceId, name: String },
    AddCreator(UserId),
    AddStaff { except: UserId },
    AnnounceOpening,
    ConfirmToRequester,
    RenameSpace { name: String },
    AddMember(UserId),
    Respond(String),
    Announce(String),
    ScheduleDeletion { after: Duration },
    DiscardTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Option<TicketState>,
    pub effects: Vec<Effect>,
}

impl Transition {
    /// Writes the state change into the ticket. Membership effects are
    /// recorded by the executor once the platform confirms them.
    pub fn commit(&self, ticket: &mut Ticket, event: &LifecycleEvent) -> Result<(), TicketError> {
        match (self.next, event) {
            (Some(TicketState::Claimed), LifecycleEvent::Claim { actor }) => ticket.claim(*actor),
            (Some(next), _) if next != ticket.state => ticket.advance(next),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    gate: AuthorizationGate,
    close_delay: Duration,
}

impl StateMachine {
    pub fn new(gate: AuthorizationGate, close_delay: Duration) -> Self {
        Self { gate, close_delay }
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    pub fn close_delay(&self) -> Duration {
        self.close_delay
    }

    pub fn decide(
        &self,
        ticket: Option<&Ticket>,
        actor_roles: &HashSet<RoleId>,
        event: &LifecycleEvent,
    ) -> Result<Transition, TicketError> {
        match event {
            LifecycleEvent::Submit {
                creator,
                username,
                parent,
                payload,
            } => Ok(Transition {
                next: Some(TicketState::Open),
                effects: vec![
                    Effect::CreateSpace {
                        parent: *parent,
                        name: space_name(payload.kind(), username),
                    },
                    Effect::AddCreator(*creator),
                    Effect::AddStaff { except: *creator },
                    Effect::AnnounceOpening,
                    Effect::ConfirmToRequester,
                ],
            }),

            LifecycleEvent::Claim { actor } => {
                self.gate.require(actor_roles, Action::Claim)?;
                let ticket = live(ticket)?;
                if ticket.is_claimed() || carries_claim_marker(&ticket.name) {
                    return Err(TicketError::AlreadyClaimed);
                }
                Ok(Transition {
                    next: Some(TicketState::Claimed),
                    effects: vec![
                        Effect::RenameSpace {
                            name: claimed_name(&ticket.name, *actor),
                        },
                        Effect::Respond(format!("**Claimed by** {}", actor.mention())),
                    ],
                })
            }

            LifecycleEvent::Close { .. } => {
                self.gate.require(actor_roles, Action::Close)?;
                let ticket = ticket.ok_or(TicketError::NotATicket)?;
                if ticket.state == TicketState::Closing {
                    return Err(TicketError::AlreadyClosing);
                }
                Ok(Transition {
                    next: Some(TicketState::Closing),
                    effects: vec![
                        Effect::Respond(format!(
                            "Closing in {} seconds...",
                            self.close_delay.as_secs()
                        )),
                        Effect::ScheduleDeletion {
                            after: self.close_delay,
                        },
                    ],
                })
            }

            LifecycleEvent::AddParticipant { actor, target } => {
                self.gate.require(actor_roles, Action::AddParticipant)?;
                let target = parse_member_reference(target.as_deref())?;
                live(ticket)?;
                Ok(Transition {
                    next: None,
                    effects: vec![
                        Effect::AddMember(target),
                        Effect::Announce(format!("{} added {}", actor.mention(), target.mention())),
                        Effect::DiscardTrigger,
                    ],
                })
            }
        }
    }
}

fn live(ticket: Option<&Ticket>) -> Result<&Ticket, TicketError> {
    let ticket = ticket.ok_or(TicketError::NotATicket)?;
    if ticket.state == TicketState::Closing {
        return Err(TicketError::Closing);
    }
    Ok(ticket)
}
