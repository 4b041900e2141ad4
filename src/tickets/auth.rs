use std::collections::HashSet;
use std::fmt;

use crate::tickets::{RoleId, TicketError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Claim,
    Close,
    AddParticipant,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim => write!(f, "claim tickets"),
            Self::Close => write!(f, "close tickets"),
            Self::AddParticipant => write!(f, "add users"),
        }
    }
}

/// Single-role gate: holding the staff role permits every staff action.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationGate {
    staff_role: RoleId,
}

impl AuthorizationGate {
    pub fn new(staff_role: RoleId) -> Self {
        Self { staff_role }
    }

    pub fn staff_role(&self) -> RoleId {
        self.staff_role
    }

    pub fn authorize(&self, actor_roles: &HashSet<RoleId>, _action: Action) -> bool {
        actor_roles.contains(&self.staff_role)
    }

    pub fn require(&self, actor_roles: &HashSet<RoleId>, action: Action) -> Result<(), TicketError> {
        if self.authorize(actor_roles, action) {
            Ok(())
        } else {
            Err(TicketError::AuthorizationDenied {
                action,
                role: self.staff_role,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAFF: RoleId = RoleId(1465061909668565038);

    #[test]
    fn test_staff_role_authorizes_every_action() {
        let gate = AuthorizationGate::new(STAFF);
        let roles: HashSet<RoleId> = [RoleId(1), STAFF].into_iter().collect();
        for action in [Action::Claim, Action::Close, Action::AddParticipant] {
            assert!(gate.authorize(&roles, action));
            assert!(gate.require(&roles, action).is_ok());
        }
    }

    #[test]
    fn test_missing_role_is_denied() {
        let gate = AuthorizationGate::new(STAFF);
        let roles: HashSet<RoleId> = [RoleId(1), RoleId(2)].into_iter().collect();
        assert!(!gate.authorize(&roles, Action::Close));
        assert!(!gate.authorize(&HashSet::new(), Action::Claim));

        match gate.require(&roles, Action::AddParticipant) {
            Err(TicketError::AuthorizationDenied { action, role }) => {
                assert_eq!(action, Action::AddParticipant);
                assert_eq!(role, STAFF);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }
}
