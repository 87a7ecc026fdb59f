//! # Actors
//!
//! Every state-changing operation in the platform records who performed
//! it. [`Actor`] distinguishes the two contracting parties, platform
//! administrators, and the system itself (scheduled jobs, workers).

use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// The party responsible for a state-changing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user", rename_all = "snake_case")]
pub enum Actor {
    /// The client who funds the project.
    Client(UserId),
    /// The freelancer delivering milestones.
    Freelancer(UserId),
    /// A platform administrator.
    Admin(UserId),
    /// The platform itself: schedulers, settlement workers, triage.
    System,
}

impl Actor {
    /// The user behind this actor, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Client(id) | Self::Freelancer(id) | Self::Admin(id) => Some(*id),
            Self::System => None,
        }
    }

    /// The canonical string name of the actor kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Client(_) => "client",
            Self::Freelancer(_) => "freelancer",
            Self::Admin(_) => "admin",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client(id) => write!(f, "client:{id}"),
            Self::Freelancer(id) => write!(f, "freelancer:{id}"),
            Self::Admin(id) => write!(f, "admin:{id}"),
            Self::System => f.write_str("system"),
        }
    }
}
