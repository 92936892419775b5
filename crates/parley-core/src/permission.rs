use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const OWNER_ROLE: &str = "owner";
pub const ADMIN_ROLE: &str = "admin";
pub const MEMBER_ROLE: &str = "member";

pub const BUILTIN_ROLES: [&str; 3] = [OWNER_ROLE, ADMIN_ROLE, MEMBER_ROLE];

/// Longest custom role name accepted.
pub const MAX_ROLE_NAME: usize = 32;

/// Something a group role can grant or withhold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    SendMessages,
    SendMedia,
    AddMembers,
    RemoveMembers,
    BanMembers,
    EditInfo,
    PinMessages,
    DeleteMessages,
    ManageRoles,
    ManageInvites,
}

impl Permission {
    pub const ALL: [Permission; 10] = [
        Permission::SendMessages,
        Permission::SendMedia,
        Permission::AddMembers,
        Permission::RemoveMembers,
        Permission::BanMembers,
        Permission::EditInfo,
        Permission::PinMessages,
        Permission::DeleteMessages,
        Permission::ManageRoles,
        Permission::ManageInvites,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessages => "send_messages",
            Self::SendMedia => "send_media",
            Self::AddMembers => "add_members",
            Self::RemoveMembers => "remove_members",
            Self::BanMembers => "ban_members",
            Self::EditInfo => "edit_info",
            Self::PinMessages => "pin_messages",
            Self::DeleteMessages => "delete_messages",
            Self::ManageRoles => "manage_roles",
            Self::ManageInvites => "manage_invites",
        }
    }

    /// Permissions that admin-only chat withholds from regular members.
    pub fn is_chat(&self) -> bool {
        matches!(self, Self::SendMessages | Self::SendMedia)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_builtin_role(role: &str) -> bool {
    BUILTIN_ROLES.contains(&role)
}

/// Built-in permission set for a role that has no explicit entry in the
/// group's permission table. Unknown custom roles get the member defaults.
pub fn default_permissions(role: &str) -> BTreeSet<Permission> {
    match role {
        OWNER_ROLE | ADMIN_ROLE => Permission::ALL.into_iter().collect(),
        _ => [
            Permission::SendMessages,
            Permission::SendMedia,
            Permission::AddMembers,
        ]
        .into_iter()
        .collect(),
    }
}

/// Trim and validate a custom role name.
pub fn normalize_role_name(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() || name.len() > MAX_ROLE_NAME {
        return None;
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == ' ')
    {
        return None;
    }
    Some(name)
}
