//! Roles and the capabilities they grant.
//!
//! Ownership-gated grants never look up an artefact themselves; callers pass
//! the acting principal and the artefact's `created_by` explicitly.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::VaultError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single capability is granted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    Always,
    /// Granted only when the actor created the artefact.
    OwnerOnly,
}

impl Grant {
    #[must_use]
    pub fn allows(self, actor: &str, owner: Option<&str>) -> bool {
        match self {
            Self::Always => true,
            Self::OwnerOnly => owner.is_some_and(|owner| owner == actor),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Capabilities {
    pub create: Grant,
    pub read: Grant,
    pub update: Grant,
    pub delete: Grant,
}

impl Capabilities {
    #[must_use]
    pub fn grant(&self, operation: Operation) -> Grant {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    #[must_use]
    pub fn can_create(&self) -> bool {
        self.create == Grant::Always
    }

    #[must_use]
    pub fn can_read(&self) -> bool {
        self.read == Grant::Always
    }

    #[must_use]
    pub fn can_update(&self, actor: &str, owner: &str) -> bool {
        self.update.allows(actor, Some(owner))
    }

    #[must_use]
    pub fn can_delete(&self, actor: &str, owner: &str) -> bool {
        self.delete.allows(actor, Some(owner))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    /// Resolve a role by name. Only `admin` and `user` are recognized.
    ///
    /// # Errors
    /// Returns [`VaultError::UnknownRole`] for every other name.
    pub fn resolve(name: &str) -> Result<Self, VaultError> {
        match name {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(VaultError::UnknownRole(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    #[must_use]
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Admin => Capabilities {
                create: Grant::Always,
                read: Grant::Always,
                update: Grant::Always,
                delete: Grant::Always,
            },
            Self::User => Capabilities {
                create: Grant::Always,
                read: Grant::Always,
                update: Grant::OwnerOnly,
                delete: Grant::OwnerOnly,
            },
        }
    }

    /// Evaluate one operation for `actor`; `owner` is the artefact's
    /// `created_by`, or `None` when no artefact is involved.
    #[must_use]
    pub fn permits(self, operation: Operation, actor: &str, owner: Option<&str>) -> bool {
        self.capabilities().grant(operation).allows(actor, owner)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = VaultError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::resolve(value)
    }
}
