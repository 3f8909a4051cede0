//! Voter eligibility derived from the event's participant → role → right graph.
//!
//! Nothing here is stored: the eligible set is recomputed from the roster
//! whenever quorum or admission is evaluated, so role changes between
//! sessions take effect automatically.

use polity_types::{EventId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Action rights a role may grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// May cast votes.
    ActiveVoting,
    /// May stand as a candidate.
    PassiveVoting,
    /// May open, advance and close voting sessions.
    ManageVoting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Events,
    Amendments,
    Elections,
}

/// A single (action, resource) grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionRight {
    pub action: Action,
    pub resource: Resource,
}

impl ActionRight {
    pub const fn new(action: Action, resource: Resource) -> Self {
        Self { action, resource }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub rights: BTreeSet<ActionRight>,
}

impl Role {
    pub fn new(id: impl Into<RoleId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rights: BTreeSet::new(),
        }
    }

    pub fn grant(mut self, action: Action, resource: Resource) -> Self {
        self.rights.insert(ActionRight::new(action, resource));
        self
    }

    pub fn grants(&self, action: Action, resource: Resource) -> bool {
        self.rights.contains(&ActionRight::new(action, resource))
    }
}

/// Participants of one event and the roles assigned to them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRoster {
    pub event_id: EventId,
    roles: BTreeMap<RoleId, Role>,
    participants: BTreeMap<UserId, BTreeSet<RoleId>>,
}

impl EventRoster {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            roles: BTreeMap::new(),
            participants: BTreeMap::new(),
        }
    }

    /// Define (or redefine) a role.
    pub fn define_role(&mut self, role: Role) {
        self.roles.insert(role.id.clone(), role);
    }

    /// Add a participant without roles, or add a role to an existing one.
    pub fn assign(&mut self, user: UserId, role: Option<RoleId>) {
        let roles = self.participants.entry(user).or_default();
        if let Some(role) = role {
            roles.insert(role);
        }
    }

    pub fn revoke(&mut self, user: &UserId, role: &RoleId) {
        if let Some(roles) = self.participants.get_mut(user) {
            roles.remove(role);
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Whether any of the user's roles grants the right (union semantics).
    ///
    /// Role ids that are assigned but not defined grant nothing.
    pub fn can(&self, user: &UserId, action: Action, resource: Resource) -> bool {
        self.participants
            .get(user)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(|r| self.roles.get(r))
                    .any(|role| role.grants(action, resource))
            })
            .unwrap_or(false)
    }

    /// Everyone granted `action` on `resource`.
    pub fn holders_of(&self, action: Action, resource: Resource) -> BTreeSet<UserId> {
        self.participants
            .keys()
            .filter(|user| self.can(user, action, resource))
            .cloned()
            .collect()
    }

    /// Participants entitled to cast binding votes at this event.
    pub fn eligible_voters(&self) -> BTreeSet<UserId> {
        self.holders_of(Action::ActiveVoting, Resource::Events)
    }

    pub fn is_eligible(&self, user: &UserId) -> bool {
        self.can(user, Action::ActiveVoting, Resource::Events)
    }

    /// Whether the user may stand for election.
    pub fn may_stand(&self, user: &UserId) -> bool {
        self.can(user, Action::PassiveVoting, Resource::Events)
    }

    pub fn is_manager(&self, user: &UserId) -> bool {
        self.can(user, Action::ManageVoting, Resource::Events)
    }
}
