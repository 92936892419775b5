use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, ForbiddenReason, Result};
use crate::permission::{
    ADMIN_ROLE, BUILTIN_ROLES, MEMBER_ROLE, OWNER_ROLE, Permission, default_permissions,
    is_builtin_role, normalize_role_name,
};

pub const INVITE_CODE_LEN: usize = 12;
pub const MAX_GROUP_NAME: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub user_id: Uuid,
    pub by: Uuid,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// A chat room with members, admins and per-member roles.
///
/// `creator` is the owner. The owner is always a member, always in `admins`
/// and always holds the `owner` role; [`Group::check_invariants`] verifies
/// this along with the rest of the membership bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub creator: Uuid,
    pub members: BTreeSet<Uuid>,
    pub admins: BTreeSet<Uuid>,
    pub roles: Vec<String>,
    pub member_roles: BTreeMap<Uuid, String>,
    pub role_permissions: BTreeMap<String, BTreeSet<Permission>>,
    pub bans: Vec<Ban>,
    pub admin_only_chat: bool,
    pub invite_code: Option<String>,
    pub community_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// The last member left; the group should be deleted.
    Emptied,
}

pub(crate) fn validate_name(name: &str, max: usize) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > max {
        return Err(CoreError::invalid(format!("name must be 1-{} characters", max)));
    }
    Ok(name.to_string())
}

impl Group {
    pub fn create(
        creator: Uuid,
        name: &str,
        members: impl IntoIterator<Item = Uuid>,
    ) -> Result<Self> {
        let name = validate_name(name, MAX_GROUP_NAME)?;
        let now = Utc::now();

        let mut group = Self {
            id: Uuid::new_v4(),
            name,
            description: None,
            avatar: None,
            creator,
            members: BTreeSet::from([creator]),
            admins: BTreeSet::from([creator]),
            roles: BUILTIN_ROLES.iter().map(|r| r.to_string()).collect(),
            member_roles: BTreeMap::from([(creator, OWNER_ROLE.to_string())]),
            role_permissions: BTreeMap::new(),
            bans: Vec::new(),
            admin_only_chat: false,
            invite_code: None,
            community_id: None,
            created_at: now,
            updated_at: now,
        };

        for member in members {
            if member != creator && group.members.insert(member) {
                group.member_roles.insert(member, MEMBER_ROLE.to_string());
            }
        }

        Ok(group)
    }

    // -- Queries --

    pub fn is_member(&self, user: Uuid) -> bool {
        self.members.contains(&user)
    }

    pub fn is_owner(&self, user: Uuid) -> bool {
        self.creator == user
    }

    pub fn is_admin(&self, user: Uuid) -> bool {
        self.admins.contains(&user)
    }

    pub fn is_banned(&self, user: Uuid) -> bool {
        self.bans.iter().any(|b| b.user_id == user)
    }

    pub fn role_exists(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn member_ids(&self) -> Vec<Uuid> {
        self.members.iter().copied().collect()
    }

    /// The role a member holds, or `None` for non-members.
    pub fn role_of(&self, user: Uuid) -> Option<&str> {
        if !self.is_member(user) {
            return None;
        }
        if self.is_owner(user) {
            return Some(OWNER_ROLE);
        }
        Some(
            self.member_roles
                .get(&user)
                .map(String::as_str)
                .unwrap_or(MEMBER_ROLE),
        )
    }

    /// Permissions a role grants in this group, falling back to the
    /// built-in defaults when the role has no explicit entry.
    pub fn permissions_for_role(&self, role: &str) -> BTreeSet<Permission> {
        if role == OWNER_ROLE || role == ADMIN_ROLE {
            return default_permissions(role);
        }
        self.role_permissions
            .get(role)
            .cloned()
            .unwrap_or_else(|| default_permissions(role))
    }

    fn check(&self, user: Uuid, perm: Permission) -> std::result::Result<(), ForbiddenReason> {
        if self.is_banned(user) {
            return Err(ForbiddenReason::Banned);
        }
        if !self.is_member(user) {
            return Err(ForbiddenReason::NotMember);
        }
        if self.is_owner(user) || self.is_admin(user) {
            return Ok(());
        }
        if perm.is_chat() && self.admin_only_chat {
            return Err(ForbiddenReason::AdminOnly);
        }
        let role = self.role_of(user).unwrap_or(MEMBER_ROLE);
        if self.permissions_for_role(role).contains(&perm) {
            Ok(())
        } else {
            Err(ForbiddenReason::MissingPermission(perm))
        }
    }

    pub fn permits(&self, user: Uuid, perm: Permission) -> bool {
        self.check(user, perm).is_ok()
    }

    pub fn authorize(&self, user: Uuid, perm: Permission) -> Result<()> {
        self.check(user, perm).map_err(CoreError::from)
    }

    pub fn effective_permissions(&self, user: Uuid) -> BTreeSet<Permission> {
        Permission::ALL
            .into_iter()
            .filter(|p| self.permits(user, *p))
            .collect()
    }

    pub fn require_member(&self, user: Uuid) -> Result<()> {
        if self.is_banned(user) {
            return Err(ForbiddenReason::Banned.into());
        }
        if !self.is_member(user) {
            return Err(ForbiddenReason::NotMember.into());
        }
        Ok(())
    }

    pub fn require_owner(&self, user: Uuid) -> Result<()> {
        self.require_member(user)?;
        if !self.is_owner(user) {
            return Err(ForbiddenReason::OwnerOnly.into());
        }
        Ok(())
    }

    pub fn require_admin(&self, user: Uuid) -> Result<()> {
        self.require_member(user)?;
        if !self.is_admin(user) {
            return Err(ForbiddenReason::AdminOnly.into());
        }
        Ok(())
    }

    /// Owners may act on anyone but themselves; admins are shielded from
    /// everyone but the owner.
    fn guard_target(&self, actor: Uuid, target: Uuid) -> Result<()> {
        if self.is_owner(target) {
            return Err(ForbiddenReason::TargetIsOwner.into());
        }
        if self.is_admin(target) && !self.is_owner(actor) {
            return Err(ForbiddenReason::TargetIsAdmin.into());
        }
        Ok(())
    }

    /// Non-admin role managers cannot hand out more than they hold.
    fn guard_escalation(&self, actor: Uuid, granted: &BTreeSet<Permission>) -> Result<()> {
        if self.is_owner(actor) || self.is_admin(actor) {
            return Ok(());
        }
        let held = self.effective_permissions(actor);
        match granted.iter().find(|p| !held.contains(p)) {
            Some(p) => Err(ForbiddenReason::MissingPermission(*p).into()),
            None => Ok(()),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn drop_member(&mut self, user: Uuid) {
        self.members.remove(&user);
        self.admins.remove(&user);
        self.member_roles.remove(&user);
    }

    // -- Membership --

    /// Admit a user without a permission check. Used by invite links and
    /// community joins. Returns `false` if they were already a member.
    pub fn admit(&mut self, user: Uuid) -> Result<bool> {
        if self.is_banned(user) {
            return Err(ForbiddenReason::Banned.into());
        }
        if !self.members.insert(user) {
            return Ok(false);
        }
        self.member_roles.insert(user, MEMBER_ROLE.to_string());
        self.touch();
        Ok(true)
    }

    pub fn add_member(&mut self, actor: Uuid, user: Uuid) -> Result<bool> {
        self.authorize(actor, Permission::AddMembers)?;
        self.admit(user)
    }

    pub fn remove_member(&mut self, actor: Uuid, user: Uuid) -> Result<()> {
        self.authorize(actor, Permission::RemoveMembers)?;
        if actor == user {
            return Err(CoreError::invalid("use leave to remove yourself"));
        }
        if !self.is_member(user) {
            return Err(CoreError::NotFound("member"));
        }
        self.guard_target(actor, user)?;
        self.drop_member(user);
        self.touch();
        Ok(())
    }

    pub fn leave(&mut self, user: Uuid) -> Result<LeaveOutcome> {
        if !self.is_member(user) {
            return Err(ForbiddenReason::NotMember.into());
        }
        if self.is_owner(user) && self.members.len() > 1 {
            return Err(CoreError::conflict(
                "the owner must transfer ownership before leaving",
            ));
        }
        self.drop_member(user);
        self.touch();
        if self.members.is_empty() {
            Ok(LeaveOutcome::Emptied)
        } else {
            Ok(LeaveOutcome::Left)
        }
    }

    // -- Admins and roles --

    pub fn promote_admin(&mut self, actor: Uuid, user: Uuid) -> Result<bool> {
        self.require_owner(actor)?;
        if !self.is_member(user) {
            return Err(CoreError::NotFound("member"));
        }
        if !self.admins.insert(user) {
            return Ok(false);
        }
        self.member_roles.insert(user, ADMIN_ROLE.to_string());
        self.touch();
        Ok(true)
    }

    pub fn demote_admin(&mut self, actor: Uuid, user: Uuid) -> Result<bool> {
        self.require_owner(actor)?;
        if !self.is_member(user) {
            return Err(CoreError::NotFound("member"));
        }
        if self.is_owner(user) {
            return Err(ForbiddenReason::TargetIsOwner.into());
        }
        if !self.is_admin(user) {
            return Ok(false);
        }
        if self.admins.len() <= 1 {
            return Err(CoreError::conflict("cannot demote the last admin"));
        }
        self.admins.remove(&user);
        self.member_roles.insert(user, MEMBER_ROLE.to_string());
        self.touch();
        Ok(true)
    }

    /// Assign a role to a member. `admin` routes through promotion and
    /// moving an admin to any other role routes through demotion, so both
    /// stay owner-only.
    pub fn set_member_role(&mut self, actor: Uuid, user: Uuid, role: &str) -> Result<bool> {
        self.authorize(actor, Permission::ManageRoles)?;
        let role = role.trim().to_lowercase();
        if !self.is_member(user) {
            return Err(CoreError::NotFound("member"));
        }
        if role == OWNER_ROLE {
            return Err(CoreError::invalid("ownership changes through a transfer"));
        }
        if self.is_owner(user) {
            return Err(ForbiddenReason::TargetIsOwner.into());
        }
        if !self.role_exists(&role) {
            return Err(CoreError::NotFound("role"));
        }
        if role == ADMIN_ROLE {
            return self.promote_admin(actor, user);
        }

        let was_admin = self.is_admin(user);
        if was_admin {
            self.demote_admin(actor, user)?;
        } else {
            self.guard_escalation(actor, &self.permissions_for_role(&role))?;
        }

        let previous = self.member_roles.insert(user, role.clone());
        self.touch();
        Ok(was_admin || previous.as_deref() != Some(role.as_str()))
    }

    pub fn create_role(&mut self, actor: Uuid, name: &str) -> Result<String> {
        self.authorize(actor, Permission::ManageRoles)?;
        let name = normalize_role_name(name)
            .ok_or_else(|| CoreError::invalid("role names are 1-32 letters, digits, '-', '_' or spaces"))?;
        if self.role_exists(&name) {
            return Err(CoreError::conflict(format!("role '{}' already exists", name)));
        }
        self.roles.push(name.clone());
        self.touch();
        Ok(name)
    }

    /// Delete a custom role. Returns how many members fell back to `member`.
    pub fn delete_role(&mut self, actor: Uuid, name: &str) -> Result<usize> {
        self.authorize(actor, Permission::ManageRoles)?;
        let name = name.trim().to_lowercase();
        if is_builtin_role(&name) {
            return Err(CoreError::invalid("built-in roles cannot be deleted"));
        }
        if !self.role_exists(&name) {
            return Err(CoreError::NotFound("role"));
        }

        self.roles.retain(|r| *r != name);
        self.role_permissions.remove(&name);

        let mut reassigned = 0;
        for role in self.member_roles.values_mut() {
            if *role == name {
                *role = MEMBER_ROLE.to_string();
                reassigned += 1;
            }
        }
        self.touch();
        Ok(reassigned)
    }

    pub fn update_role_permissions(
        &mut self,
        actor: Uuid,
        role: &str,
        permissions: BTreeSet<Permission>,
    ) -> Result<()> {
        self.authorize(actor, Permission::ManageRoles)?;
        let role = role.trim().to_lowercase();
        if role == OWNER_ROLE || role == ADMIN_ROLE {
            return Err(CoreError::invalid(format!("'{}' permissions are fixed", role)));
        }
        if !self.role_exists(&role) {
            return Err(CoreError::NotFound("role"));
        }
        self.guard_escalation(actor, &permissions)?;
        self.role_permissions.insert(role, permissions);
        self.touch();
        Ok(())
    }

    // -- Moderation --

    pub fn ban_member(&mut self, actor: Uuid, user: Uuid, reason: Option<String>) -> Result<()> {
        self.authorize(actor, Permission::BanMembers)?;
        if actor == user {
            return Err(CoreError::invalid("cannot ban yourself"));
        }
        self.guard_target(actor, user)?;
        if self.is_banned(user) {
            return Err(CoreError::conflict("user is already banned"));
        }
        self.drop_member(user);
        self.bans.push(Ban {
            user_id: user,
            by: actor,
            reason: reason.filter(|r| !r.trim().is_empty()),
            at: Utc::now(),
        });
        self.touch();
        Ok(())
    }

    pub fn unban_member(&mut self, actor: Uuid, user: Uuid) -> Result<()> {
        self.authorize(actor, Permission::BanMembers)?;
        let idx = self
            .bans
            .iter()
            .position(|b| b.user_id == user)
            .ok_or(CoreError::NotFound("ban"))?;
        self.bans.remove(idx);
        self.touch();
        Ok(())
    }

    pub fn set_admin_only_chat(&mut self, actor: Uuid, enabled: bool) -> Result<bool> {
        self.require_admin(actor)?;
        if self.admin_only_chat == enabled {
            return Ok(false);
        }
        self.admin_only_chat = enabled;
        self.touch();
        Ok(true)
    }

    // -- Settings --

    pub fn update_info(
        &mut self,
        actor: Uuid,
        name: Option<&str>,
        description: Option<String>,
        avatar: Option<String>,
    ) -> Result<()> {
        self.authorize(actor, Permission::EditInfo)?;
        if let Some(name) = name {
            self.name = validate_name(name, MAX_GROUP_NAME)?;
        }
        if let Some(description) = description {
            self.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(avatar) = avatar {
            self.avatar = Some(avatar).filter(|a| !a.trim().is_empty());
        }
        self.touch();
        Ok(())
    }

    /// Hand the group to another member. The previous owner stays an admin.
    pub fn transfer_ownership(&mut self, actor: Uuid, new_owner: Uuid) -> Result<()> {
        self.require_owner(actor)?;
        if new_owner == actor {
            return Err(CoreError::invalid("already the owner"));
        }
        if !self.is_member(new_owner) {
            return Err(CoreError::NotFound("member"));
        }
        self.creator = new_owner;
        self.admins.insert(new_owner);
        self.member_roles.insert(new_owner, OWNER_ROLE.to_string());
        self.member_roles.insert(actor, ADMIN_ROLE.to_string());
        self.touch();
        Ok(())
    }

    /// Only the owner may delete a group.
    pub fn authorize_delete(&self, actor: Uuid) -> Result<()> {
        self.require_owner(actor)
    }

    pub fn regenerate_invite(&mut self, actor: Uuid) -> Result<String> {
        self.authorize(actor, Permission::ManageInvites)?;
        let code: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(INVITE_CODE_LEN)
            .map(char::from)
            .collect();
        self.invite_code = Some(code.clone());
        self.touch();
        Ok(code)
    }

    pub fn revoke_invite(&mut self, actor: Uuid) -> Result<()> {
        self.authorize(actor, Permission::ManageInvites)?;
        self.invite_code = None;
        self.touch();
        Ok(())
    }

    pub fn join_by_invite(&mut self, user: Uuid, code: &str) -> Result<bool> {
        match &self.invite_code {
            Some(current) if current == code => self.admit(user),
            _ => Err(CoreError::NotFound("invite")),
        }
    }

    /// Structural invariants every persisted group must satisfy.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: &str| Err(CoreError::invalid(format!("group {}: {}", self.id, msg)));

        if !self.is_member(self.creator) || !self.is_admin(self.creator) {
            return fail("owner must be a member and an admin");
        }
        if self.member_roles.get(&self.creator).map(String::as_str) != Some(OWNER_ROLE) {
            return fail("owner must hold the owner role");
        }
        if !self.admins.is_subset(&self.members) {
            return fail("every admin must be a member");
        }
        for builtin in BUILTIN_ROLES {
            if !self.role_exists(builtin) {
                return fail("built-in role missing");
            }
        }
        for (user, role) in &self.member_roles {
            if !self.is_member(*user) {
                return fail("role assigned to a non-member");
            }
            if !self.role_exists(role) {
                return fail("role assignment refers to an unknown role");
            }
            if role == OWNER_ROLE && *user != self.creator {
                return fail("only the creator may hold the owner role");
            }
            if role == ADMIN_ROLE && !self.is_admin(*user) {
                return fail("admin role held outside the admin list");
            }
        }
        if self.bans.iter().any(|b| self.is_member(b.user_id)) {
            return fail("a banned user is still a member");
        }
        Ok(())
    }
}
