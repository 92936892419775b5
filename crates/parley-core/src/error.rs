use std::fmt;

use thiserror::Error;

use crate::permission::Permission;

/// Why an actor was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
    NotMember,
    Banned,
    Blocked,
    MissingPermission(Permission),
    OwnerOnly,
    AdminOnly,
    /// The target is the owner and cannot be acted upon.
    TargetIsOwner,
    /// The target is an admin and only the owner may act on them.
    TargetIsAdmin,
    NotAuthor,
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMember => f.write_str("not a member"),
            Self::Banned => f.write_str("banned"),
            Self::Blocked => f.write_str("blocked"),
            Self::MissingPermission(p) => write!(f, "missing permission {}", p),
            Self::OwnerOnly => f.write_str("owner only"),
            Self::AdminOnly => f.write_str("admins only"),
            Self::TargetIsOwner => f.write_str("cannot act on the owner"),
            Self::TargetIsAdmin => f.write_str("only the owner can act on an admin"),
            Self::NotAuthor => f.write_str("only the author can do this"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(ForbiddenReason),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

impl From<ForbiddenReason> for CoreError {
    fn from(reason: ForbiddenReason) -> Self {
        Self::Forbidden(reason)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
