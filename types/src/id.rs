//! String-backed identifier newtypes.
//!
//! The surrounding application stores documents under opaque string ids.
//! Each entity kind gets its own type so a `UserId` can never be passed
//! where a `SessionId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used by [`Self::from_parts`] for generated ids.
            pub const PREFIX: &'static str = $prefix;

            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Build a generated id from a node epoch and a sequence number.
            pub fn from_parts(epoch: u64, sequence: u64) -> Self {
                Self(format!("{}{:x}_{:06}", Self::PREFIX, epoch, sequence))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// A principal of the application (participant, manager, candidate).
    UserId,
    "usr_"
);
string_id!(
    /// An organizational event (assembly, congress, meeting).
    EventId,
    "evt_"
);
string_id!(
    /// A scheduled item inside an event's agenda.
    AgendaItemId,
    "agi_"
);
string_id!(
    /// A voting session hosted by an agenda item.
    SessionId,
    "vs_"
);
string_id!(VoteId, "vote_");
string_id!(AmendmentId, "amd_");
string_id!(ElectionId, "elc_");
string_id!(
    /// A proposed change to an amendment's text.
    ChangeRequestId,
    "cr_"
);
string_id!(CandidateId, "cand_");
string_id!(RoleId, "role_");

/// The entity a voting session decides on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum TargetId {
    Amendment(AmendmentId),
    Election(ElectionId),
    ChangeRequest {
        amendment: AmendmentId,
        change_request: ChangeRequestId,
    },
}

impl TargetId {
    /// The amendment this target belongs to, if any.
    pub fn amendment(&self) -> Option<&AmendmentId> {
        match self {
            Self::Amendment(id) => Some(id),
            Self::ChangeRequest { amendment, .. } => Some(amendment),
            Self::Election(_) => None,
        }
    }

    pub fn election(&self) -> Option<&ElectionId> {
        match self {
            Self::Election(id) => Some(id),
            _ => None,
        }
    }

    pub fn change_request(&self) -> Option<&ChangeRequestId> {
        match self {
            Self::ChangeRequest { change_request, .. } => Some(change_request),
            _ => None,
        }
    }

    /// Raw id of the decided entity, for audit entries.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Amendment(id) => id.as_str(),
            Self::Election(id) => id.as_str(),
            Self::ChangeRequest { change_request, .. } => change_request.as_str(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amendment(id) => write!(f, "amendment:{id}"),
            Self::Election(id) => write!(f, "election:{id}"),
            Self::ChangeRequest {
                amendment,
                change_request,
            } => write!(f, "change_request:{amendment}/{change_request}"),
        }
    }
}
