use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, ForbiddenReason, Result};
use crate::group::{Group, validate_name};

pub const MAX_COMMUNITY_NAME: usize = 64;

/// One announcement group plus any number of linked sub-groups.
///
/// Membership of the community is membership of the announcement group;
/// the community record itself only tracks which groups belong to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner: Uuid,
    pub announcement_group: Uuid,
    pub linked_groups: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Community {
    /// Create a community together with its announcement group. The
    /// announcement group starts in admin-only chat.
    pub fn create(owner: Uuid, name: &str, description: Option<String>) -> Result<(Self, Group)> {
        let name = validate_name(name, MAX_COMMUNITY_NAME)?;
        let description = description.filter(|d| !d.trim().is_empty());
        let id = Uuid::new_v4();

        let mut announcements = Group::create(owner, &name, [])?;
        announcements.admin_only_chat = true;
        announcements.community_id = Some(id);
        announcements.description = description.clone();

        let now = Utc::now();
        let community = Self {
            id,
            name,
            description,
            owner,
            announcement_group: announcements.id,
            linked_groups: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };
        Ok((community, announcements))
    }

    fn expect_announcements(&self, group: &Group) -> Result<()> {
        if group.id != self.announcement_group {
            return Err(CoreError::invalid("not this community's announcement group"));
        }
        Ok(())
    }

    /// Link an existing group. The actor must administer both the
    /// announcement group and the group being linked.
    pub fn link_group(
        &mut self,
        actor: Uuid,
        announcements: &Group,
        target: &mut Group,
    ) -> Result<bool> {
        self.expect_announcements(announcements)?;
        announcements.require_admin(actor)?;
        target.require_admin(actor)?;

        if target.id == self.announcement_group {
            return Err(CoreError::invalid("the announcement group is always part of the community"));
        }
        match target.community_id {
            Some(existing) if existing == self.id => return Ok(false),
            Some(_) => return Err(CoreError::conflict("group already belongs to a community")),
            None => {}
        }

        target.community_id = Some(self.id);
        self.linked_groups.insert(target.id);
        self.updated_at = Utc::now();
        Ok(true)
    }

    pub fn unlink_group(
        &mut self,
        actor: Uuid,
        announcements: &Group,
        target: &mut Group,
    ) -> Result<()> {
        self.expect_announcements(announcements)?;
        announcements.require_admin(actor)?;
        if !self.linked_groups.remove(&target.id) {
            return Err(CoreError::NotFound("linked group"));
        }
        target.community_id = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Drop a linked group that no longer exists.
    pub fn forget_group(&mut self, group_id: Uuid) -> bool {
        let removed = self.linked_groups.remove(&group_id);
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn join(&self, user: Uuid, announcements: &mut Group) -> Result<bool> {
        self.expect_announcements(announcements)?;
        announcements.admit(user)
    }

    /// Leave the announcement group and every linked group the user is in.
    /// Returns the ids of the groups that changed.
    pub fn leave(
        &self,
        user: Uuid,
        announcements: &mut Group,
        linked: &mut [Group],
    ) -> Result<Vec<Uuid>> {
        self.expect_announcements(announcements)?;
        if announcements.is_owner(user) {
            return Err(CoreError::conflict("the community owner cannot leave"));
        }
        if !announcements.is_member(user) {
            return Err(ForbiddenReason::NotMember.into());
        }

        // Check every group first so a refusal leaves all of them untouched.
        for group in linked.iter() {
            if group.is_member(user) && group.is_owner(user) && group.members.len() > 1 {
                return Err(CoreError::conflict(format!(
                    "transfer ownership of '{}' before leaving the community",
                    group.name
                )));
            }
        }

        let mut changed = vec![announcements.id];
        announcements.leave(user)?;
        for group in linked.iter_mut() {
            if self.linked_groups.contains(&group.id) && group.is_member(user) {
                group.leave(user)?;
                changed.push(group.id);
            }
        }
        Ok(changed)
    }

    /// Hand the community to another member. Ownership of the community is
    /// ownership of its announcement group, so both move together.
    pub fn transfer_ownership(
        &mut self,
        actor: Uuid,
        announcements: &mut Group,
        new_owner: Uuid,
    ) -> Result<()> {
        self.expect_announcements(announcements)?;
        announcements.transfer_ownership(actor, new_owner)?;
        self.owner = new_owner;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn update_info(
        &mut self,
        actor: Uuid,
        announcements: &mut Group,
        name: Option<&str>,
        description: Option<String>,
    ) -> Result<()> {
        self.expect_announcements(announcements)?;
        announcements.require_admin(actor)?;
        if let Some(name) = name {
            self.name = validate_name(name, MAX_COMMUNITY_NAME)?;
            announcements.name = self.name.clone();
        }
        if let Some(description) = description {
            self.description = Some(description).filter(|d| !d.trim().is_empty());
            announcements.description = self.description.clone();
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn check_invariants(&self, announcements: &Group) -> Result<()> {
        if announcements.id != self.announcement_group
            || announcements.community_id != Some(self.id)
        {
            return Err(CoreError::invalid(format!(
                "community {}: announcement group is not linked back",
                self.id
            )));
        }
        if self.linked_groups.contains(&self.announcement_group) {
            return Err(CoreError::invalid(format!(
                "community {}: announcement group listed as linked",
                self.id
            )));
        }
        if self.owner != announcements.creator {
            return Err(CoreError::invalid(format!(
                "community {}: owner differs from the announcement group's owner",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permission;

    #[test]
    fn announcements_are_admin_only() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let (community, mut ann) = Community::create(owner, "Neighbours", None).unwrap();
        community.check_invariants(&ann).unwrap();

        assert!(community.join(member, &mut ann).unwrap());
        assert!(!ann.permits(member, Permission::SendMessages));
        assert!(ann.permits(owner, Permission::SendMessages));
    }

    #[test]
    fn linking_needs_admin_on_both_sides() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (mut community, mut ann) = Community::create(owner, "Club", None).unwrap();
        let mut foreign = Group::create(other, "chess", [owner]).unwrap();

        assert_eq!(
            community.link_group(owner, &ann, &mut foreign),
            Err(CoreError::Forbidden(ForbiddenReason::AdminOnly))
        );

        community.join(other, &mut ann).unwrap();
        assert_eq!(
            community.link_group(other, &ann, &mut foreign),
            Err(CoreError::Forbidden(ForbiddenReason::AdminOnly))
        );

        ann.promote_admin(owner, other).unwrap();
        assert!(community.link_group(other, &ann, &mut foreign).unwrap());
        assert!(!community.link_group(other, &ann, &mut foreign).unwrap());
        assert_eq!(foreign.community_id, Some(community.id));

        community.unlink_group(owner, &ann, &mut foreign).unwrap();
        assert_eq!(foreign.community_id, None);
        assert!(community.unlink_group(owner, &ann, &mut foreign).is_err());
    }

    #[test]
    fn group_belongs_to_one_community() {
        let owner = Uuid::new_v4();
        let (mut first, ann1) = Community::create(owner, "one", None).unwrap();
        let (mut second, ann2) = Community::create(owner, "two", None).unwrap();
        let mut group = Group::create(owner, "shared", []).unwrap();

        first.link_group(owner, &ann1, &mut group).unwrap();
        assert!(matches!(
            second.link_group(owner, &ann2, &mut group),
            Err(CoreError::Conflict(_))
        ));
        assert!(matches!(
            second.link_group(owner, &ann1, &mut group),
            Err(CoreError::Invalid(_))
        ));
    }

    #[test]
    fn leaving_drops_linked_groups() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let (mut community, mut ann) = Community::create(owner, "c", None).unwrap();
        let mut a = Group::create(owner, "a", [member]).unwrap();
        let mut b = Group::create(owner, "b", []).unwrap();
        community.link_group(owner, &ann, &mut a).unwrap();
        community.link_group(owner, &ann, &mut b).unwrap();
        community.join(member, &mut ann).unwrap();

        let mut linked = vec![a, b];
        let changed = community.leave(member, &mut ann, &mut linked).unwrap();
        assert_eq!(changed.len(), 2);
        assert!(!ann.is_member(member));
        assert!(!linked[0].is_member(member));

        assert!(matches!(
            community.leave(owner, &mut ann, &mut linked),
            Err(CoreError::Conflict(_))
        ));
    }

    #[test]
    fn leaving_is_refused_while_owning_a_busy_group() {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let (mut community, mut ann) = Community::create(owner, "c", None).unwrap();
        let mut own = Group::create(member, "mine", [owner, friend]).unwrap();
        own.promote_admin(member, owner).unwrap();
        community.link_group(owner, &ann, &mut own).unwrap();
        community.join(member, &mut ann).unwrap();

        let mut linked = vec![own];
        assert!(matches!(
            community.leave(member, &mut ann, &mut linked),
            Err(CoreError::Conflict(_))
        ));
        assert!(ann.is_member(member));
    }

    #[test]
    fn ownership_moves_with_the_announcement_group() {
        let owner = Uuid::new_v4();
        let heir = Uuid::new_v4();
        let (mut community, mut ann) = Community::create(owner, "c", None).unwrap();
        community.join(heir, &mut ann).unwrap();

        assert!(community.transfer_ownership(heir, &mut ann, owner).is_err());
        community.transfer_ownership(owner, &mut ann, heir).unwrap();
        assert_eq!(community.owner, heir);
        assert!(ann.is_owner(heir));
        community.check_invariants(&ann).unwrap();

        // The previous owner is now an ordinary member and may leave.
        let changed = community.leave(owner, &mut ann, &mut []).unwrap();
        assert_eq!(changed, vec![ann.id]);
        assert!(matches!(
            community.leave(heir, &mut ann, &mut []),
            Err(CoreError::Conflict(_))
        ));
    }

    #[test]
    fn owner_drift_is_an_invariant_violation() {
        let owner = Uuid::new_v4();
        let heir = Uuid::new_v4();
        let (community, mut ann) = Community::create(owner, "c", None).unwrap();
        community.join(heir, &mut ann).unwrap();

        // Transferring the group alone leaves the community record behind.
        ann.transfer_ownership(owner, heir).unwrap();
        assert!(matches!(
            community.check_invariants(&ann),
            Err(CoreError::Invalid(_))
        ));
    }

    #[test]
    fn renaming_updates_announcements() {
        let owner = Uuid::new_v4();
        let (mut community, mut ann) = Community::create(owner, "old", None).unwrap();
        community
            .update_info(owner, &mut ann, Some("new"), Some("desc".into()))
            .unwrap();
        assert_eq!(ann.name, "new");
        assert_eq!(ann.description.as_deref(), Some("desc"));
    }
}
