//! Caller identity as handed to the engine by the authentication layer.
//!
//! Role names are free text in the store; they are mapped to a closed
//! [`RoleKind`] exactly once, here, so policy code never compares strings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};

/// Name of the one role that carries administrative privilege.
pub const ADMINISTRATOR_ROLE: &str = "Administrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    Administrator,
    Member,
}

impl RoleKind {
    pub fn from_role_name(name: &str) -> Self {
        if name == ADMINISTRATOR_ROLE {
            RoleKind::Administrator
        } else {
            RoleKind::Member
        }
    }
}

/// The authenticated principal of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Ulid,
    pub role: RoleKind,
    pub active: bool,
}

impl Caller {
    pub fn new(user_id: Ulid, role: RoleKind) -> Self {
        Self {
            user_id,
            role,
            active: true,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == RoleKind::Administrator
    }

    pub(crate) fn ensure_active(&self) -> Result<(), EngineError> {
        if self.active {
            Ok(())
        } else {
            Err(EngineError::Forbidden("account is deactivated"))
        }
    }

    pub(crate) fn ensure_admin(&self) -> Result<(), EngineError> {
        self.ensure_active()?;
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden("administrator role required"))
        }
    }
}

/// Resolves an authenticated user id into a [`Caller`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, user_id: Ulid) -> Result<Caller, EngineError>;
}

#[async_trait]
impl IdentityProvider for Engine {
    async fn resolve(&self, user_id: Ulid) -> Result<Caller, EngineError> {
        self.resolve_caller(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_administrator_name_is_privileged() {
        assert_eq!(RoleKind::from_role_name("Administrator"), RoleKind::Administrator);
        assert_eq!(RoleKind::from_role_name("administrator"), RoleKind::Member);
        assert_eq!(RoleKind::from_role_name("Employee"), RoleKind::Member);
        assert_eq!(RoleKind::from_role_name(""), RoleKind::Member);
    }

    #[test]
    fn inactive_caller_is_rejected() {
        let mut caller = Caller::new(Ulid::new(), RoleKind::Administrator);
        assert!(caller.ensure_admin().is_ok());
        caller.active = false;
        assert!(matches!(caller.ensure_active(), Err(EngineError::Forbidden(_))));
        assert!(matches!(caller.ensure_admin(), Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn member_is_not_admin() {
        let caller = Caller::new(Ulid::new(), RoleKind::Member);
        assert!(caller.ensure_active().is_ok());
        assert!(matches!(caller.ensure_admin(), Err(EngineError::Forbidden(_))));
    }
}
