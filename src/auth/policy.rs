//! One place that decides who may do what.
//!
//! Handlers describe the resource they are about to touch and the action
//! they want to perform; [`authorize`] answers with `Ok(())` or a forbidden
//! error.

use crate::auth::{AuthenticatedUser, FORBIDDEN_MESSAGE};
use crate::error::{AppError, AppResult};
use crate::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    /// Changing another account's role or status.
    Administer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Listing { owner_id: Option<i32> },
    Inquiry,
    Media,
    UserDirectory,
    UserAccount { id: i32 },
}

pub fn authorize(actor: &AuthenticatedUser, action: Action, resource: Resource) -> AppResult<()> {
    if permits(actor.id, actor.role, action, resource) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = actor.id,
            role = %actor.role,
            ?action,
            ?resource,
            "authorization denied"
        );
        Err(AppError::forbidden(FORBIDDEN_MESSAGE))
    }
}

pub fn permits(actor_id: i32, role: Role, action: Action, resource: Resource) -> bool {
    let admin = role == Role::Admin;
    match resource {
        Resource::Listing { owner_id } => match action {
            Action::Read => true,
            Action::Create => role.is_staff(),
            Action::Update | Action::Delete | Action::Administer => {
                role.is_staff() && (admin || owner_id == Some(actor_id))
            }
        },
        Resource::Inquiry | Resource::Media => role.is_staff(),
        Resource::UserDirectory => admin,
        Resource::UserAccount { id } => match action {
            Action::Read | Action::Update => admin || id == actor_id,
            Action::Create | Action::Delete | Action::Administer => admin,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staff_create_listings() {
        let listing = Resource::Listing { owner_id: None };
        assert!(permits(1, Role::Agent, Action::Create, listing));
        assert!(permits(1, Role::Manager, Action::Create, listing));
        assert!(!permits(1, Role::User, Action::Create, listing));
    }

    #[test]
    fn listing_changes_require_ownership_unless_admin() {
        let owned_by_7 = Resource::Listing { owner_id: Some(7) };
        assert!(permits(7, Role::Agent, Action::Update, owned_by_7));
        assert!(!permits(8, Role::Agent, Action::Delete, owned_by_7));
        assert!(!permits(8, Role::Manager, Action::Update, owned_by_7));
        assert!(permits(1, Role::Admin, Action::Delete, owned_by_7));
        // Owner whose role was downgraded loses write access.
        assert!(!permits(7, Role::User, Action::Delete, owned_by_7));
    }

    #[test]
    fn orphaned_listings_are_admin_only() {
        let orphan = Resource::Listing { owner_id: None };
        assert!(permits(1, Role::Admin, Action::Update, orphan));
        assert!(!permits(2, Role::Agent, Action::Update, orphan));
    }

    #[test]
    fn anyone_reads_listings() {
        assert!(permits(5, Role::User, Action::Read, Resource::Listing { owner_id: Some(1) }));
    }

    #[test]
    fn user_accounts_admin_or_self() {
        let account = Resource::UserAccount { id: 4 };
        assert!(permits(4, Role::User, Action::Read, account));
        assert!(permits(4, Role::User, Action::Update, account));
        assert!(!permits(4, Role::User, Action::Administer, account));
        assert!(!permits(5, Role::Manager, Action::Read, account));
        assert!(permits(1, Role::Admin, Action::Delete, account));
        assert!(!permits(4, Role::Agent, Action::Delete, account));
    }

    #[test]
    fn directory_and_inquiries() {
        assert!(permits(1, Role::Admin, Action::Read, Resource::UserDirectory));
        assert!(!permits(1, Role::Manager, Action::Read, Resource::UserDirectory));
        assert!(permits(1, Role::Agent, Action::Update, Resource::Inquiry));
        assert!(!permits(1, Role::User, Action::Read, Resource::Inquiry));
        assert!(!permits(1, Role::User, Action::Create, Resource::Media));
    }
}
