//! Request principal contract.
//!
//! Authentication lives outside this workspace. Whatever layer verifies
//! credentials inserts a [`Caller`] into the request extensions; the cache
//! layer only reads it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller roles relevant to cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    /// Regular authenticated user.
    #[default]
    User,
    /// Administrator with full access.
    Admin,
}

impl CallerRole {
    /// Parses a role from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Returns the role name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for CallerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated principal attached to an inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Stable subject identifier.
    pub subject: String,
    /// Role granted by the authentication layer.
    pub role: CallerRole,
}

impl Caller {
    /// Creates a new caller.
    pub fn new(subject: impl Into<String>, role: CallerRole) -> Self {
        Self {
            subject: subject.into(),
            role,
        }
    }

    /// Returns true if the caller is an administrator.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == CallerRole::Admin
    }
}
