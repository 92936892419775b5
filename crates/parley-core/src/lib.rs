//! Domain state for groups, channels and communities, and the rules that
//! decide who may change them.
//!
//! Every mutating operation takes the acting user first and either applies
//! the whole change or returns a [`CoreError`] without touching the value.

pub mod channel;
pub mod community;
pub mod error;
pub mod group;
pub mod permission;

pub use channel::{Channel, ChannelStats, Post};
pub use community::Community;
pub use error::{CoreError, ForbiddenReason};
pub use group::{Ban, Group, LeaveOutcome};
pub use permission::Permission;
