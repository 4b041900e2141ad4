use async_trait::async_trait;
use log::{debug, error, warn};
use std::sync::Arc;

use crate::channels::ChannelError;
use crate::tickets::intake::truncate_chars;
use crate::tickets::{RoleId, SpaceId, TicketError, TicketKind, UserId};

/// Names get 90 characters at creation so a claim suffix still fits later.
pub const CREATE_NAME_LIMIT: usize = 90;
pub const NAME_LIMIT: usize = 100;
pub const CLAIM_MARKER: &str = "claimed-by-";

#[async_trait]
pub trait SpacePlatform: Send + Sync {
    async fn create_private_space(
        &self,
        parent: SpaceId,
        name: &str,
        reason: &str,
    ) -> Result<SpaceId, ChannelError>;
    async fn add_member(&self, space: SpaceId, user: UserId) -> Result<(), ChannelError>;
    async fn rename_space(&self, space: SpaceId, name: &str) -> Result<(), ChannelError>;
    async fn delete_space(&self, space: SpaceId) -> Result<(), ChannelError>;
    /// Human members currently holding `role`.
    async fn role_members(&self, role: RoleId) -> Result<Vec<UserId>, ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceOp {
    Create,
    AddMember,
    AddRequestedMember,
    ListStaff,
    Rename,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Fatal,
    BestEffort,
}

impl SpaceOp {
    pub fn criticality(self) -> Criticality {
        match self {
            Self::Create | Self::AddRequestedMember | Self::Rename => Criticality::Fatal,
            Self::AddMember | Self::ListStaff | Self::Delete => Criticality::BestEffort,
        }
    }

    fn into_error(self, e: ChannelError) -> TicketError {
        match self {
            Self::Create => TicketError::SpaceCreation(e),
            Self::AddMember | Self::AddRequestedMember => TicketError::Membership(e),
            Self::Rename => TicketError::Rename(e),
            Self::Delete => TicketError::Deletion(e),
            Self::ListStaff => TicketError::Platform(e),
        }
    }
}

/// Applies the operation's criticality: best-effort failures are logged and
/// become `Ok(None)`, fatal ones become the matching `TicketError`.
pub fn settle<T>(
    op: SpaceOp,
    space: Option<SpaceId>,
    result: Result<T, ChannelError>,
) -> Result<Option<T>, TicketError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => match op.criticality() {
            Criticality::BestEffort => {
                match space {
                    Some(id) => warn!("{op:?} on thread {id} failed (ignored): {e}"),
                    None => warn!("{op:?} failed (ignored): {e}"),
                }
                Ok(None)
            }
            Criticality::Fatal => {
                error!("{op:?} on thread {space:?} failed: {e}");
                Err(op.into_error(e))
            }
        },
    }
}

pub fn space_name(kind: TicketKind, username: &str) -> String {
    truncate_chars(&format!("{}{}", kind.name_prefix(), username), CREATE_NAME_LIMIT)
}

/// The base name gives way so the claim suffix always survives the limit.
pub fn claimed_name(current: &str, claimant: UserId) -> String {
    let suffix = format!(" - {CLAIM_MARKER}{claimant}");
    let base = truncate_chars(current, NAME_LIMIT.saturating_sub(suffix.chars().count()));
    format!("{base}{suffix}")
}

pub fn carries_claim_marker(name: &str) -> bool {
    name.contains(CLAIM_MARKER)
}

#[derive(Clone)]
pub struct SpaceManager {
    platform: Arc<dyn SpacePlatform>,
}

impl SpaceManager {
    pub fn new(platform: Arc<dyn SpacePlatform>) -> Self {
        Self { platform }
    }

    pub async fn create_space(
        &self,
        parent: SpaceId,
        name: &str,
        kind: TicketKind,
    ) -> Result<SpaceId, TicketError> {
        let name = truncate_chars(name, CREATE_NAME_LIMIT);
        let reason = format!("{} request", kind.label());
        let result = self.platform.create_private_space(parent, &name, &reason).await;
        settle(SpaceOp::Create, None, result)?
            .ok_or(TicketError::SpaceCreation(ChannelError::NotConfigured))
    }

    /// Best effort: returns whether the member landed in the thread.
    pub async fn add_member(&self, space: SpaceId, user: UserId) -> bool {
        let result = self.platform.add_member(space, user).await;
        matches!(settle(SpaceOp::AddMember, Some(space), result), Ok(Some(())))
    }

    pub async fn add_requested_member(&self, space: SpaceId, user: UserId) -> Result<(), TicketError> {
        let result = self.platform.add_member(space, user).await;
        settle(SpaceOp::AddRequestedMember, Some(space), result).map(|_| ())
    }

    /// Adds every staff member, skipping `except`; returns the ones added.
    pub async fn add_staff(&self, space: SpaceId, role: RoleId, except: UserId) -> Vec<UserId> {
        let result = self.platform.role_members(role).await;
        let staff = match settle(SpaceOp::ListStaff, Some(space), result) {
            Ok(Some(staff)) => staff,
            _ => return Vec::new(),
        };

        let mut added = Vec::with_capacity(staff.len());
        for member in staff.into_iter().filter(|m| *m != except) {
            if self.add_member(space, member).await {
                added.push(member);
            }
        }
        debug!("Added {} staff member(s) to thread {space}", added.len());
        added
    }

    pub async fn rename_space(&self, space: SpaceId, name: &str) -> Result<String, TicketError> {
        let name = truncate_chars(name, NAME_LIMIT);
        let result = self.platform.rename_space(space, &name).await;
        settle(SpaceOp::Rename, Some(space), result)?;
        Ok(name)
    }

    pub async fn delete_space(&self, space: SpaceId) -> bool {
        let result = self.platform.delete_space(space).await;
        matches!(settle(SpaceOp::Delete, Some(space), result), Ok(Some(())))
    }
}
