/*
    permissions.rs - Host-issued permission grants

    Resolution for a participant, highest precedence first:
    1. the host is always allowed everything
    2. an unexpired grant naming the participant
    3. an unexpired grant for all guests
    4. default: allow all
*/

use crate::core_model::{Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    /// Emit document edits
    Edit,
    /// Send chat messages
    Chat,
    /// Import a snapshot
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Room,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantTarget {
    AllGuests,
    Participant(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub resource_type: ResourceType,
    pub granted_to: GrantTarget,
    pub actions: Vec<Action>,
    pub expires_at: Option<Timestamp>,
}

impl PermissionGrant {
    pub fn new(granted_to: GrantTarget, actions: impl IntoIterator<Item = Action>) -> Self {
        let mut actions: Vec<Action> = actions.into_iter().collect();
        actions.sort();
        actions.dedup();
        PermissionGrant {
            resource_type: ResourceType::Room,
            granted_to,
            actions,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_active(&self, now: Timestamp) -> bool {
        !self.expires_at.is_some_and(|at| at.has_passed(now))
    }
}

/// What a participant may currently do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedActions {
    pub edit: bool,
    pub chat: bool,
    pub import: bool,
}

impl AllowedActions {
    pub fn all() -> Self {
        AllowedActions {
            edit: true,
            chat: true,
            import: true,
        }
    }

    pub fn none() -> Self {
        AllowedActions {
            edit: false,
            chat: false,
            import: false,
        }
    }

    fn from_grant(grant: &PermissionGrant) -> Self {
        AllowedActions {
            edit: grant.actions.contains(&Action::Edit),
            chat: grant.actions.contains(&Action::Chat),
            import: grant.actions.contains(&Action::Import),
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Edit => self.edit,
            Action::Chat => self.chat,
            Action::Import => self.import,
        }
    }
}

impl Default for AllowedActions {
    fn default() -> Self {
        Self::all()
    }
}

/// Resolve the effective permissions of `user_id`
pub fn allowed_actions(
    grants: &[PermissionGrant],
    user_id: &UserId,
    is_host: bool,
    now: Timestamp,
) -> AllowedActions {
    if is_host {
        return AllowedActions::all();
    }

    let active = || {
        grants
            .iter()
            .filter(|g| g.resource_type == ResourceType::Room && g.is_active(now))
    };

    active()
        .find(|g| matches!(&g.granted_to, GrantTarget::Participant(u) if u == user_id))
        .or_else(|| active().find(|g| g.granted_to == GrantTarget::AllGuests))
        .map(AllowedActions::from_grant)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    #[test]
    fn test_default_allows_everything() {
        let allowed = allowed_actions(&[], &alice(), false, Timestamp::now());
        assert_eq!(allowed, AllowedActions::all());
    }

    #[test]
    fn test_all_guests_grant_narrows() {
        let grants = vec![PermissionGrant::new(GrantTarget::AllGuests, [Action::Chat])];
        let allowed = allowed_actions(&grants, &alice(), false, Timestamp::now());
        assert!(!allowed.edit);
        assert!(allowed.chat);
        assert!(!allowed.import);
    }

    #[test]
    fn test_participant_grant_beats_all_guests() {
        let grants = vec![
            PermissionGrant::new(GrantTarget::AllGuests, []),
            PermissionGrant::new(GrantTarget::Participant(alice()), [Action::Edit]),
        ];
        let now = Timestamp::now();
        assert!(allowed_actions(&grants, &alice(), false, now).edit);
        assert_eq!(
            allowed_actions(&grants, &UserId::new("bob"), false, now),
            AllowedActions::none()
        );
    }

    #[test]
    fn test_host_ignores_grants() {
        let grants = vec![PermissionGrant::new(GrantTarget::AllGuests, [])];
        let allowed = allowed_actions(&grants, &UserId::new("host"), true, Timestamp::now());
        assert_eq!(allowed, AllowedActions::all());
    }

    #[test]
    fn test_expired_grant_is_ignored() {
        let now = Timestamp::now();
        let grants = vec![PermissionGrant::new(GrantTarget::AllGuests, [])
            .with_expiry(now.after(Duration::from_secs(5)))];

        assert_eq!(allowed_actions(&grants, &alice(), false, now), AllowedActions::none());
        let later = now.after(Duration::from_secs(6));
        assert_eq!(allowed_actions(&grants, &alice(), false, later), AllowedActions::all());
    }
}
