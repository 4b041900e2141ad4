pub mod auth;
pub mod intake;
pub mod machine;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod space;
pub mod store;
pub mod ui;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::channels::ChannelError;
use crate::tickets::intake::{IntakeError, Payload};

pub use crate::tickets::auth::{Action, AuthorizationGate};
pub use crate::tickets::router::{Actor, EventRouter, EventSource, InboundEvent};
pub use crate::tickets::service::TicketService;

macro_rules! snowflake_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

snowflake_id!(UserId);
snowflake_id!(RoleId);
snowflake_id!(SpaceId);

impl UserId {
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl RoleId {
    pub fn mention(self) -> String {
        format!("<@&{}>", self.0)
    }
}

impl SpaceId {
    pub fn mention(self) -> String {
        format!("<#{}>", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Support,
    Mediation,
}

impl TicketKind {
    pub fn name_prefix(self) -> &'static str {
        match self {
            Self::Support => "ticket-",
            Self::Mediation => "mm-",
        }
    }

    pub fn color(self) -> u32 {
        match self {
            Self::Support => 0x00FF9D,
            Self::Mediation => 0xFFAA00,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Support => "Ticket",
            Self::Mediation => "Middleman",
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Support => write!(f, "support"),
            Self::Mediation => write!(f, "mediation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Open,
    Claimed,
    Closing,
}

impl TicketState {
    /// Forward-only: Open -> Claimed -> Closing, or Open -> Closing.
    pub fn can_advance_to(self, next: TicketState) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Claimed) | (Self::Open, Self::Closing) | (Self::Claimed, Self::Closing)
        )
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Claimed => write!(f, "claimed"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: SpaceId,
    pub kind: TicketKind,
    pub creator_id: UserId,
    pub state: TicketState,
    pub claimant_id: Option<UserId>,
    pub participants: BTreeSet<UserId>,
    pub payload: Payload,
    pub name: String,
    pub opened_at: DateTime<Utc>,
}

impl Ticket {
    pub fn open(id: SpaceId, creator_id: UserId, name: String, payload: Payload) -> Self {
        let mut participants = BTreeSet::new();
        participants.insert(creator_id);
        Self {
            id,
            kind: payload.kind(),
            creator_id,
            state: TicketState::Open,
            claimant_id: None,
            participants,
            payload,
            name,
            opened_at: Utc::now(),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimant_id.is_some()
    }

    pub fn advance(&mut self, next: TicketState) -> Result<(), TicketError> {
        if !self.state.can_advance_to(next) {
            return Err(TicketError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn claim(&mut self, claimant: UserId) -> Result<(), TicketError> {
        if self.claimant_id.is_some() {
            return Err(TicketError::AlreadyClaimed);
        }
        self.advance(TicketState::Claimed)?;
        self.claimant_id = Some(claimant);
        Ok(())
    }

    pub fn add_participant(&mut self, user: UserId) -> bool {
        self.participants.insert(user)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Only {} can {}.", .role.mention(), .action)]
    AuthorizationDenied { action: Action, role: RoleId },
    #[error("Only admins can run /setup")]
    AdminRequired,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Intake(#[from] IntakeError),
    #[error("Thread creation rejected: {0}")]
    SpaceCreation(ChannelError),
    #[error("Error: {0}")]
    Membership(ChannelError),
    #[error("Thread rename failed: {0}")]
    Rename(ChannelError),
    #[error("Thread deletion failed: {0}")]
    Deletion(ChannelError),
    #[error("This thread is not an active ticket.")]
    NotATicket,
    #[error("Ticket already claimed.")]
    AlreadyClaimed,
    #[error("Ticket is already closing.")]
    AlreadyClosing,
    #[error("Ticket is closing.")]
    Closing,
    #[error("Cannot move ticket from {from} to {to}")]
    InvalidTransition { from: TicketState, to: TicketState },
    #[error("Platform error: {0}")]
    Platform(#[from] ChannelError),
}

impl TicketError {
    /// Outcomes the actor caused and can correct; not worth more than a debug line.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationDenied { .. }
                | Self::AdminRequired
                | Self::Validation(_)
                | Self::Intake(_)
                | Self::NotATicket
                | Self::AlreadyClaimed
                | Self::AlreadyClosing
                | Self::Closing
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::SpaceCreation(_) => {
                "Could not create your ticket thread. Please try again in a moment.".to_string()
            }
            Self::Rename(_) => "Something went wrong while claiming this ticket.".to_string(),
            Self::Intake(_) => "Your form was incomplete. Please fill in every field.".to_string(),
            Self::InvalidTransition { .. } | Self::Deletion(_) | Self::Platform(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::intake::Payload;

    fn support_ticket() -> Ticket {
        Ticket::open(
            SpaceId(900_000_000_000_000_001),
            UserId(100_000_000_000_000_001),
            "ticket-alice".to_string(),
            Payload::Support {
                reason: "payment issue".to_string(),
            },
        )
    }

    #[test]
    fn test_open_ticket_contains_creator() {
        let ticket = support_ticket();
        assert_eq!(ticket.state, TicketState::Open);
        assert_eq!(ticket.kind, TicketKind::Support);
        assert!(ticket.participants.contains(&ticket.creator_id));
        assert!(ticket.claimant_id.is_none());
    }

    #[test]
    fn test_state_only_moves_forward() {
        use TicketState::*;
        assert!(Open.can_advance_to(Claimed));
        assert!(Open.can_advance_to(Closing));
        assert!(Claimed.can_advance_to(Closing));
        assert!(!Claimed.can_advance_to(Open));
        assert!(!Closing.can_advance_to(Open));
        assert!(!Closing.can_advance_to(Claimed));
        assert!(!Open.can_advance_to(Open));
        assert!(!Closing.can_advance_to(Closing));
    }

    #[test]
    fn test_claim_sets_claimant_once() {
        let mut ticket = support_ticket();
        let staff = UserId(200_000_000_000_000_001);
        ticket.claim(staff).unwrap();
        assert_eq!(ticket.state, TicketState::Claimed);
        assert_eq!(ticket.claimant_id, Some(staff));

        let err = ticket.claim(UserId(200_000_000_000_000_002)).unwrap_err();
        assert!(matches!(err, TicketError::AlreadyClaimed));
        assert_eq!(ticket.claimant_id, Some(staff));
    }

    #[test]
    fn test_closing_keeps_claimant() {
        let mut ticket = support_ticket();
        let staff = UserId(200_000_000_000_000_001);
        ticket.claim(staff).unwrap();
        ticket.advance(TicketState::Closing).unwrap();
        assert_eq!(ticket.claimant_id, Some(staff));
        assert!(ticket.advance(TicketState::Claimed).is_err());
    }

    #[test]
    fn test_denial_message_mentions_role() {
        let err = TicketError::AuthorizationDenied {
            action: Action::Claim,
            role: RoleId(1465061909668565038),
        };
        assert_eq!(err.to_string(), "Only <@&1465061909668565038> can claim tickets.");
        assert!(err.is_expected());
    }

    #[test]
    fn test_id_parsing_and_mentions() {
        let id: UserId = " 123456789012345678 ".parse().unwrap();
        assert_eq!(id.mention(), "<@123456789012345678>");
        assert_eq!(SpaceId(5).mention(), "<#5>");
        assert!("abc".parse::<RoleId>().is_err());
    }
}
