use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, ForbiddenReason, Result};
use crate::group::validate_name;

pub const MAX_CHANNEL_NAME: usize = 64;
pub const MAX_POST_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub media_id: Option<Uuid>,
    pub views: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub views: u64,
    pub posts_published: u64,
    pub peak_followers: usize,
}

/// Broadcast room: admins post, followers read. Posts live outside the
/// channel record; the channel only decides who may publish, delete and view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub owner: Uuid,
    pub admins: BTreeSet<Uuid>,
    pub followers: BTreeSet<Uuid>,
    pub blocked: BTreeSet<Uuid>,
    pub stats: ChannelStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn create(owner: Uuid, name: &str, description: Option<String>) -> Result<Self> {
        let name = validate_name(name, MAX_CHANNEL_NAME)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            description: description.filter(|d| !d.trim().is_empty()),
            avatar: None,
            owner,
            admins: BTreeSet::from([owner]),
            followers: BTreeSet::from([owner]),
            blocked: BTreeSet::new(),
            stats: ChannelStats {
                peak_followers: 1,
                ..ChannelStats::default()
            },
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owner(&self, user: Uuid) -> bool {
        self.owner == user
    }

    pub fn is_admin(&self, user: Uuid) -> bool {
        self.admins.contains(&user)
    }

    pub fn is_follower(&self, user: Uuid) -> bool {
        self.followers.contains(&user)
    }

    pub fn is_blocked(&self, user: Uuid) -> bool {
        self.blocked.contains(&user)
    }

    pub fn follower_ids(&self) -> Vec<Uuid> {
        self.followers.iter().copied().collect()
    }

    fn require_owner(&self, actor: Uuid) -> Result<()> {
        if !self.is_owner(actor) {
            return Err(ForbiddenReason::OwnerOnly.into());
        }
        Ok(())
    }

    fn require_admin(&self, actor: Uuid) -> Result<()> {
        if !self.is_admin(actor) {
            return Err(ForbiddenReason::AdminOnly.into());
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn follow(&mut self, user: Uuid) -> Result<bool> {
        if self.is_blocked(user) {
            return Err(ForbiddenReason::Blocked.into());
        }
        if !self.followers.insert(user) {
            return Ok(false);
        }
        self.stats.peak_followers = self.stats.peak_followers.max(self.followers.len());
        self.touch();
        Ok(true)
    }

    pub fn unfollow(&mut self, user: Uuid) -> Result<bool> {
        if self.is_owner(user) {
            return Err(CoreError::conflict("the owner cannot unfollow their channel"));
        }
        if !self.followers.remove(&user) {
            return Ok(false);
        }
        self.admins.remove(&user);
        self.touch();
        Ok(true)
    }

    pub fn add_admin(&mut self, actor: Uuid, user: Uuid) -> Result<bool> {
        self.require_owner(actor)?;
        if !self.is_follower(user) {
            return Err(CoreError::NotFound("follower"));
        }
        let added = self.admins.insert(user);
        if added {
            self.touch();
        }
        Ok(added)
    }

    pub fn remove_admin(&mut self, actor: Uuid, user: Uuid) -> Result<bool> {
        self.require_owner(actor)?;
        if self.is_owner(user) {
            return Err(ForbiddenReason::TargetIsOwner.into());
        }
        let removed = self.admins.remove(&user);
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    pub fn block(&mut self, actor: Uuid, user: Uuid) -> Result<bool> {
        self.require_admin(actor)?;
        if self.is_owner(user) {
            return Err(ForbiddenReason::TargetIsOwner.into());
        }
        if self.is_admin(user) && !self.is_owner(actor) {
            return Err(ForbiddenReason::TargetIsAdmin.into());
        }
        if !self.blocked.insert(user) {
            return Ok(false);
        }
        self.followers.remove(&user);
        self.admins.remove(&user);
        self.touch();
        Ok(true)
    }

    pub fn unblock(&mut self, actor: Uuid, user: Uuid) -> Result<bool> {
        self.require_admin(actor)?;
        let removed = self.blocked.remove(&user);
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    /// Validate and build a new post, counting it in the channel's stats.
    /// Storing it is up to the caller.
    pub fn post(&mut self, actor: Uuid, body: &str, media_id: Option<Uuid>) -> Result<Post> {
        self.require_admin(actor)?;
        let body = body.trim();
        if body.is_empty() && media_id.is_none() {
            return Err(CoreError::invalid("post is empty"));
        }
        if body.len() > MAX_POST_LEN {
            return Err(CoreError::invalid("post is too long"));
        }
        self.stats.posts_published += 1;
        self.touch();
        Ok(Post {
            id: Uuid::new_v4(),
            author_id: actor,
            body: body.to_string(),
            media_id,
            views: 0,
            created_at: Utc::now(),
        })
    }

    pub fn authorize_post_delete(&self, actor: Uuid) -> Result<()> {
        self.require_admin(actor)
    }

    /// Reading posts and counting views is open to anyone not blocked.
    pub fn authorize_view(&self, viewer: Uuid) -> Result<()> {
        if self.is_blocked(viewer) {
            return Err(ForbiddenReason::Blocked.into());
        }
        Ok(())
    }

    pub fn update_info(
        &mut self,
        actor: Uuid,
        name: Option<&str>,
        description: Option<String>,
        avatar: Option<String>,
    ) -> Result<()> {
        self.require_admin(actor)?;
        if let Some(name) = name {
            self.name = validate_name(name, MAX_CHANNEL_NAME)?;
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

    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: &str| Err(CoreError::invalid(format!("channel {}: {}", self.id, msg)));

        if !self.is_admin(self.owner) || !self.is_follower(self.owner) {
            return fail("owner must be an admin and a follower");
        }
        if !self.admins.is_subset(&self.followers) {
            return fail("every admin must follow the channel");
        }
        if !self.blocked.is_disjoint(&self.followers) {
            return fail("a blocked user is still following");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Channel, Uuid, Uuid, Uuid) {
        let (owner, admin, reader) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut c = Channel::create(owner, "news", Some("daily".into())).unwrap();
        c.follow(admin).unwrap();
        c.follow(reader).unwrap();
        c.add_admin(owner, admin).unwrap();
        (c, owner, admin, reader)
    }

    #[test]
    fn follow_is_idempotent_and_tracks_peak() {
        let (mut c, _, _, reader) = fixture();
        assert!(!c.follow(reader).unwrap());
        assert_eq!(c.stats.peak_followers, 3);
        assert!(c.unfollow(reader).unwrap());
        assert!(!c.unfollow(reader).unwrap());
        assert_eq!(c.stats.peak_followers, 3);
    }

    #[test]
    fn owner_cannot_unfollow() {
        let (mut c, owner, _, _) = fixture();
        assert!(matches!(c.unfollow(owner), Err(CoreError::Conflict(_))));
    }

    #[test]
    fn blocked_users_cannot_follow() {
        let (mut c, _, admin, reader) = fixture();
        assert!(c.block(admin, reader).unwrap());
        assert!(!c.is_follower(reader));
        assert_eq!(c.follow(reader), Err(CoreError::Forbidden(ForbiddenReason::Blocked)));
        assert!(c.unblock(admin, reader).unwrap());
        assert!(c.follow(reader).unwrap());
        c.check_invariants().unwrap();
    }

    #[test]
    fn block_respects_rank() {
        let (mut c, owner, admin, reader) = fixture();
        assert_eq!(c.block(reader, admin), Err(CoreError::Forbidden(ForbiddenReason::AdminOnly)));
        assert_eq!(c.block(admin, owner), Err(CoreError::Forbidden(ForbiddenReason::TargetIsOwner)));
        c.add_admin(owner, reader).unwrap();
        assert_eq!(c.block(admin, reader), Err(CoreError::Forbidden(ForbiddenReason::TargetIsAdmin)));
        assert!(c.block(owner, reader).unwrap());
        assert!(!c.is_admin(reader));
        c.check_invariants().unwrap();
    }

    #[test]
    fn only_owner_manages_admins() {
        let (mut c, owner, admin, reader) = fixture();
        assert_eq!(
            c.add_admin(admin, reader),
            Err(CoreError::Forbidden(ForbiddenReason::OwnerOnly))
        );
        assert_eq!(c.add_admin(owner, Uuid::new_v4()), Err(CoreError::NotFound("follower")));
        assert_eq!(
            c.remove_admin(owner, owner),
            Err(CoreError::Forbidden(ForbiddenReason::TargetIsOwner))
        );
        assert!(c.remove_admin(owner, admin).unwrap());
        assert!(!c.remove_admin(owner, admin).unwrap());
    }

    #[test]
    fn posts_are_admin_only() {
        let (mut c, _, admin, reader) = fixture();
        assert_eq!(
            c.post(reader, "hi", None),
            Err(CoreError::Forbidden(ForbiddenReason::AdminOnly))
        );
        assert!(matches!(c.post(admin, "   ", None), Err(CoreError::Invalid(_))));
        assert!(matches!(
            c.post(admin, &"x".repeat(MAX_POST_LEN + 1), None),
            Err(CoreError::Invalid(_))
        ));

        let first = c.post(admin, "  first ", None).unwrap();
        assert_eq!(first.body, "first");
        assert_eq!(first.author_id, admin);
        assert!(c.post(admin, "", Some(Uuid::new_v4())).is_ok());
        assert_eq!(c.stats.posts_published, 2);

        assert_eq!(
            c.authorize_post_delete(reader),
            Err(CoreError::Forbidden(ForbiddenReason::AdminOnly))
        );
        c.authorize_post_delete(admin).unwrap();
    }

    #[test]
    fn blocked_users_cannot_view() {
        let (mut c, _, admin, reader) = fixture();
        let stranger = Uuid::new_v4();
        c.authorize_view(stranger).unwrap();
        c.block(admin, reader).unwrap();
        assert_eq!(
            c.authorize_view(reader),
            Err(CoreError::Forbidden(ForbiddenReason::Blocked))
        );
    }

    #[test]
    fn unfollowing_admin_loses_admin() {
        let (mut c, _, admin, _) = fixture();
        c.unfollow(admin).unwrap();
        assert!(!c.is_admin(admin));
        c.check_invariants().unwrap();
    }
}
