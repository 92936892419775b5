//! Whole-document storage for groups, channels and communities.
//!
//! Loads and saves take a plain `&Connection` so several aggregates can be
//! changed inside one [`Database::write`] transaction. Saves re-check the
//! aggregate's invariants and refuse to persist a broken record.

use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use parley_core::{Channel, Community, CoreError, Group, Post};

use crate::queries::OptionalExt;
use crate::{Database, parse_ts, ts};

// -- Groups --

pub fn load_group(conn: &Connection, id: Uuid) -> Result<Group> {
    let data: Option<String> = conn
        .query_row("SELECT data FROM groups WHERE id = ?1", [id.to_string()], |row| row.get(0))
        .optional()?;
    let data = data.ok_or(CoreError::NotFound("group"))?;
    Ok(serde_json::from_str(&data)?)
}

pub fn save_group(conn: &Connection, group: &Group) -> Result<()> {
    group.check_invariants()?;
    let id = group.id.to_string();
    conn.execute(
        "INSERT INTO groups (id, data, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        (&id, serde_json::to_string(group)?, ts(&group.updated_at)),
    )?;

    conn.execute("DELETE FROM group_members WHERE group_id = ?1", [&id])?;
    let mut stmt = conn.prepare("INSERT INTO group_members (group_id, user_id) VALUES (?1, ?2)")?;
    for member in &group.members {
        stmt.execute((&id, member.to_string()))?;
    }
    Ok(())
}

pub fn delete_group(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute("DELETE FROM groups WHERE id = ?1", [id.to_string()])?;
    Ok(())
}

/// Delete a group with its history, unlinking it from its community.
/// A community's announcement group cannot be removed this way.
pub fn remove_group(conn: &Connection, group: &Group) -> Result<()> {
    if let Some(community_id) = group.community_id {
        let mut community = load_community(conn, community_id)?;
        if community.announcement_group == group.id {
            return Err(CoreError::conflict(
                "the announcement group lives as long as its community",
            )
            .into());
        }
        community.forget_group(group.id);
        let announcements = load_group(conn, community.announcement_group)?;
        save_community(conn, &community, &announcements)?;
    }
    let id = group.id.to_string();
    conn.execute(
        "DELETE FROM messages WHERE chat_kind = 'group' AND chat_id = ?1",
        [&id],
    )?;
    delete_group(conn, group.id)
}

pub fn groups_for_user(conn: &Connection, user_id: Uuid) -> Result<Vec<Group>> {
    let mut stmt = conn.prepare(
        "SELECT g.data FROM groups g
         JOIN group_members m ON m.group_id = g.id
         WHERE m.user_id = ?1
         ORDER BY g.updated_at DESC",
    )?;
    let rows = stmt
        .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|data| Ok(serde_json::from_str(data)?))
        .collect()
}

// -- Channels --

fn channel_from_row(data: &str, views: i64) -> Result<Channel> {
    let mut channel: Channel = serde_json::from_str(data)?;
    channel.stats.views = views.max(0) as u64;
    Ok(channel)
}

pub fn load_channel(conn: &Connection, id: Uuid) -> Result<Channel> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT data, views FROM channels WHERE id = ?1",
            [id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (data, views) = row.ok_or(CoreError::NotFound("channel"))?;
    channel_from_row(&data, views)
}

/// The `views` column is left alone; it only moves through
/// [`record_post_view`].
pub fn save_channel(conn: &Connection, channel: &Channel) -> Result<()> {
    channel.check_invariants()?;
    let id = channel.id.to_string();
    conn.execute(
        "INSERT INTO channels (id, name, data, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, data = excluded.data,
             updated_at = excluded.updated_at",
        (
            &id,
            &channel.name,
            serde_json::to_string(channel)?,
            ts(&channel.updated_at),
        ),
    )?;

    conn.execute("DELETE FROM channel_followers WHERE channel_id = ?1", [&id])?;
    let mut stmt =
        conn.prepare("INSERT INTO channel_followers (channel_id, user_id) VALUES (?1, ?2)")?;
    for follower in &channel.followers {
        stmt.execute((&id, follower.to_string()))?;
    }
    Ok(())
}

/// Escape `LIKE` wildcards so user input only matches literally.
fn like_literal(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Channel directory, optionally filtered by a case-insensitive name match.
pub fn list_channels(conn: &Connection, search: Option<&str>, limit: u32) -> Result<Vec<Channel>> {
    let pattern = format!("%{}%", like_literal(search.unwrap_or("")));
    let mut stmt = conn.prepare(
        "SELECT data, views FROM channels WHERE name LIKE ?1 ESCAPE '\\'
         ORDER BY updated_at DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![pattern, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|(data, views)| channel_from_row(data, *views))
        .collect()
}

// -- Channel posts --

const POST_COLUMNS: &str = "id, author_id, body, media_id, views, created_at";

type PostRow = (String, String, String, Option<String>, i64, String);

fn post_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn parse_post((id, author_id, body, media_id, views, created_at): PostRow) -> Result<Post> {
    Ok(Post {
        id: id.parse()?,
        author_id: author_id.parse()?,
        body,
        media_id: media_id.map(|m| m.parse()).transpose()?,
        views: views.max(0) as u64,
        created_at: parse_ts(&created_at)?,
    })
}

pub fn insert_post(conn: &Connection, channel_id: Uuid, post: &Post) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO channel_posts (channel_id, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            POST_COLUMNS
        ),
        rusqlite::params![
            channel_id.to_string(),
            post.id.to_string(),
            post.author_id.to_string(),
            post.body,
            post.media_id.map(|m| m.to_string()),
            post.views as i64,
            ts(&post.created_at),
        ],
    )?;
    Ok(())
}

/// Newest first. `before` is the id of the oldest post the client already
/// has; posts sharing its timestamp are ordered by id.
pub fn channel_posts(
    conn: &Connection,
    channel_id: Uuid,
    before: Option<Uuid>,
    limit: u32,
) -> Result<Vec<Post>> {
    let sql = format!(
        "SELECT {} FROM channel_posts
         WHERE channel_id = ?1
           AND (?2 IS NULL OR (created_at, id) <
                (SELECT created_at, id FROM channel_posts WHERE id = ?2))
         ORDER BY created_at DESC, id DESC
         LIMIT ?3",
        POST_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![channel_id.to_string(), before.map(|b| b.to_string()), limit],
            post_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse_post).collect()
}

pub fn delete_post(conn: &Connection, channel_id: Uuid, post_id: Uuid) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM channel_posts WHERE id = ?1 AND channel_id = ?2",
        (post_id.to_string(), channel_id.to_string()),
    )?;
    if removed == 0 {
        return Err(CoreError::NotFound("post").into());
    }
    Ok(())
}

/// Bump one post's counter and the channel total in place. Returns the
/// post's new count.
pub fn record_post_view(conn: &Connection, channel_id: Uuid, post_id: Uuid) -> Result<u64> {
    let views: Option<i64> = conn
        .query_row(
            "UPDATE channel_posts SET views = views + 1
             WHERE id = ?1 AND channel_id = ?2
             RETURNING views",
            (post_id.to_string(), channel_id.to_string()),
            |row| row.get(0),
        )
        .optional()?;
    let views = views.ok_or(CoreError::NotFound("post"))?;
    conn.execute(
        "UPDATE channels SET views = views + 1 WHERE id = ?1",
        [channel_id.to_string()],
    )?;
    Ok(views.max(0) as u64)
}

// -- Communities --

pub fn load_community(conn: &Connection, id: Uuid) -> Result<Community> {
    let data: Option<String> = conn
        .query_row("SELECT data FROM communities WHERE id = ?1", [id.to_string()], |row| {
            row.get(0)
        })
        .optional()?;
    let data = data.ok_or(CoreError::NotFound("community"))?;
    Ok(serde_json::from_str(&data)?)
}

pub fn save_community(conn: &Connection, community: &Community, announcements: &Group) -> Result<()> {
    community.check_invariants(announcements)?;
    conn.execute(
        "INSERT INTO communities (id, data, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        (
            community.id.to_string(),
            serde_json::to_string(community)?,
            ts(&community.updated_at),
        ),
    )?;
    Ok(())
}

impl Database {
    pub fn get_group(&self, id: Uuid) -> Result<Group> {
        self.with_conn(|conn| load_group(conn, id))
    }

    pub fn get_channel(&self, id: Uuid) -> Result<Channel> {
        self.with_conn(|conn| load_channel(conn, id))
    }

    pub fn get_community(&self, id: Uuid) -> Result<Community> {
        self.with_conn(|conn| load_community(conn, id))
    }

    pub fn get_groups_for_user(&self, user_id: Uuid) -> Result<Vec<Group>> {
        self.with_conn(|conn| groups_for_user(conn, user_id))
    }

    pub fn insert_group(&self, group: &Group) -> Result<()> {
        self.write(|tx| save_group(tx, group))
    }

    pub fn insert_channel(&self, channel: &Channel) -> Result<()> {
        self.write(|tx| save_channel(tx, channel))
    }

    /// Atomically load, mutate and store one group. Nothing is written if
    /// `f` fails or the result breaks a group invariant.
    pub fn update_group<F, T>(&self, id: Uuid, f: F) -> Result<(Group, T)>
    where
        F: FnOnce(&mut Group) -> parley_core::error::Result<T>,
    {
        self.write(|tx| {
            let mut group = load_group(tx, id)?;
            let out = f(&mut group)?;
            save_group(tx, &group)?;
            Ok((group, out))
        })
    }

    pub fn update_channel<F, T>(&self, id: Uuid, f: F) -> Result<(Channel, T)>
    where
        F: FnOnce(&mut Channel) -> parley_core::error::Result<T>,
    {
        self.write(|tx| {
            let mut channel = load_channel(tx, id)?;
            let out = f(&mut channel)?;
            save_channel(tx, &channel)?;
            Ok((channel, out))
        })
    }

    /// Publish a post built by `f` from the channel, in one transaction.
    pub fn publish_post<F>(&self, channel_id: Uuid, f: F) -> Result<(Channel, Post)>
    where
        F: FnOnce(&mut Channel) -> parley_core::error::Result<Post>,
    {
        self.write(|tx| {
            let mut channel = load_channel(tx, channel_id)?;
            let post = f(&mut channel)?;
            save_channel(tx, &channel)?;
            insert_post(tx, channel_id, &post)?;
            Ok((channel, post))
        })
    }

    pub fn get_channel_posts(
        &self,
        channel_id: Uuid,
        before: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Post>> {
        self.with_conn(|conn| channel_posts(conn, channel_id, before, limit))
    }

    pub fn delete_channel_post(
        &self,
        channel_id: Uuid,
        actor: Uuid,
        post_id: Uuid,
    ) -> Result<Channel> {
        self.write(|tx| {
            let channel = load_channel(tx, channel_id)?;
            channel.authorize_post_delete(actor)?;
            delete_post(tx, channel_id, post_id)?;
            Ok(channel)
        })
    }

    /// Count a view without rewriting the channel record.
    pub fn view_channel_post(&self, channel_id: Uuid, viewer: Uuid, post_id: Uuid) -> Result<u64> {
        self.write(|tx| {
            load_channel(tx, channel_id)?.authorize_view(viewer)?;
            record_post_view(tx, channel_id, post_id)
        })
    }

    pub fn group_id_by_invite(&self, code: &str) -> Result<Uuid> {
        self.with_conn(|conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM groups WHERE json_extract(data, '$.invite_code') = ?1",
                    [code],
                    |row| row.get(0),
                )
                .optional()?;
            let id = id.ok_or(CoreError::NotFound("invite"))?;
            Ok(id.parse()?)
        })
    }

    /// Atomically mutate a community together with its announcement group.
    pub fn update_community<F, T>(&self, id: Uuid, f: F) -> Result<(Community, Group, T)>
    where
        F: FnOnce(&mut Community, &mut Group) -> parley_core::error::Result<T>,
    {
        self.write(|tx| {
            let mut community = load_community(tx, id)?;
            let mut announcements = load_group(tx, community.announcement_group)?;
            let out = f(&mut community, &mut announcements)?;
            save_group(tx, &announcements)?;
            save_community(tx, &community, &announcements)?;
            Ok((community, announcements, out))
        })
    }

    /// Groups both users belong to.
    pub fn common_groups(&self, a: Uuid, b: Uuid) -> Result<Vec<Group>> {
        Ok(self
            .get_groups_for_user(a)?
            .into_iter()
            .filter(|g| g.is_member(b))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Permission;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn group_roundtrip_and_membership_index() {
        let db = db();
        let (owner, member) = (Uuid::new_v4(), Uuid::new_v4());
        let group = Group::create(owner, "book club", [member]).unwrap();
        db.insert_group(&group).unwrap();

        let loaded = db.get_group(group.id).unwrap();
        assert_eq!(loaded.name, "book club");
        assert!(loaded.is_member(member));

        assert_eq!(db.get_groups_for_user(member).unwrap().len(), 1);
        assert_eq!(db.common_groups(owner, member).unwrap().len(), 1);
        assert!(db.common_groups(owner, Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn refused_update_writes_nothing() {
        let db = db();
        let (owner, member) = (Uuid::new_v4(), Uuid::new_v4());
        let group = Group::create(owner, "g", [member]).unwrap();
        db.insert_group(&group).unwrap();

        let err = db
            .update_group(group.id, |g| g.ban_member(member, owner, None))
            .unwrap_err();
        assert!(err.downcast_ref::<CoreError>().is_some());

        let (updated, _) = db
            .update_group(group.id, |g| g.remove_member(owner, member))
            .unwrap();
        assert!(!updated.is_member(member));
        assert!(db.get_groups_for_user(member).unwrap().is_empty());
    }

    #[test]
    fn broken_invariants_are_not_persisted() {
        let db = db();
        let owner = Uuid::new_v4();
        let group = Group::create(owner, "g", []).unwrap();
        db.insert_group(&group).unwrap();

        let result = db.update_group(group.id, |g| {
            g.admins.clear();
            Ok(())
        });
        assert!(result.is_err());
        assert!(db.get_group(group.id).unwrap().is_admin(owner));
    }

    #[test]
    fn missing_group_is_not_found() {
        let err = db().get_group(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.downcast_ref::<CoreError>(), Some(&CoreError::NotFound("group")));
    }

    #[test]
    fn community_and_groups_commit_together() {
        let db = db();
        let owner = Uuid::new_v4();
        let (community, ann) = Community::create(owner, "town", None).unwrap();
        db.write(|tx| {
            save_group(tx, &ann)?;
            save_community(tx, &community, &ann)
        })
        .unwrap();

        let loaded = db.get_community(community.id).unwrap();
        let ann = db.get_group(loaded.announcement_group).unwrap();
        assert!(!ann.permits(Uuid::new_v4(), Permission::SendMessages));
        assert!(ann.admin_only_chat);
    }

    #[test]
    fn invite_codes_resolve_to_their_group() {
        let db = db();
        let owner = Uuid::new_v4();
        let group = Group::create(owner, "g", []).unwrap();
        db.insert_group(&group).unwrap();
        let (_, code) = db
            .update_group(group.id, |g| g.regenerate_invite(owner))
            .unwrap();

        assert_eq!(db.group_id_by_invite(&code).unwrap(), group.id);
        let err = db.group_id_by_invite("nope").unwrap_err();
        assert_eq!(err.downcast_ref::<CoreError>(), Some(&CoreError::NotFound("invite")));
    }

    #[test]
    fn community_update_touches_announcements() {
        let db = db();
        let owner = Uuid::new_v4();
        let (community, ann) = Community::create(owner, "town", None).unwrap();
        db.write(|tx| {
            save_group(tx, &ann)?;
            save_community(tx, &community, &ann)
        })
        .unwrap();

        let joiner = Uuid::new_v4();
        let (_, ann, joined) = db
            .update_community(community.id, |c, ann| c.join(joiner, ann))
            .unwrap();
        assert!(joined);
        assert!(ann.is_member(joiner));
        assert!(db.get_group(ann.id).unwrap().is_member(joiner));
    }

    #[test]
    fn removing_a_linked_group_unlinks_it() {
        let db = db();
        let owner = Uuid::new_v4();
        let (mut community, ann) = Community::create(owner, "town", None).unwrap();
        let mut linked = Group::create(owner, "chess", []).unwrap();
        community.link_group(owner, &ann, &mut linked).unwrap();
        db.write(|tx| {
            save_group(tx, &ann)?;
            save_group(tx, &linked)?;
            save_community(tx, &community, &ann)
        })
        .unwrap();

        let refused = db.write(|tx| remove_group(tx, &ann)).unwrap_err();
        assert!(matches!(refused.downcast_ref::<CoreError>(), Some(CoreError::Conflict(_))));

        db.write(|tx| remove_group(tx, &linked)).unwrap();
        assert!(db.get_community(community.id).unwrap().linked_groups.is_empty());
        assert!(db.get_group(linked.id).is_err());
    }

    #[test]
    fn channel_directory_search() {
        let db = db();
        let owner = Uuid::new_v4();
        db.insert_channel(&Channel::create(owner, "Rust News", None).unwrap()).unwrap();
        db.insert_channel(&Channel::create(owner, "Cooking", None).unwrap()).unwrap();

        let hits = db.with_conn(|c| list_channels(c, Some("rust"), 10)).unwrap();
        assert_eq!(hits.len(), 1);
        let all = db.with_conn(|c| list_channels(c, None, 10)).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn search_wildcards_match_literally() {
        let db = db();
        let owner = Uuid::new_v4();
        for name in ["a_b", "axb", "50% off", "back\\slash"] {
            db.insert_channel(&Channel::create(owner, name, None).unwrap()).unwrap();
        }
        let search = |q: &str| {
            db.with_conn(|c| list_channels(c, Some(q), 10))
                .unwrap()
                .into_iter()
                .map(|c| c.name)
                .collect::<Vec<_>>()
        };
        assert_eq!(search("a_b"), vec!["a_b"]);
        assert_eq!(search("%"), vec!["50% off"]);
        assert_eq!(search("k\\s"), vec!["back\\slash"]);
    }

    fn channel_with_admin(db: &Database) -> (Channel, Uuid) {
        let owner = Uuid::new_v4();
        let channel = Channel::create(owner, "news", None).unwrap();
        db.insert_channel(&channel).unwrap();
        (channel, owner)
    }

    #[test]
    fn posts_live_outside_the_channel_record() {
        let db = db();
        let (channel, owner) = channel_with_admin(&db);
        let (updated, post) = db
            .publish_post(channel.id, |c| c.post(owner, "hello", None))
            .unwrap();
        assert_eq!(updated.stats.posts_published, 1);

        let data: String = db
            .with_conn(|c| {
                Ok(c.query_row("SELECT data FROM channels WHERE id = ?1", [channel.id.to_string()], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert!(!data.contains("hello"));

        let reader = Uuid::new_v4();
        assert_eq!(db.view_channel_post(channel.id, reader, post.id).unwrap(), 1);
        assert_eq!(db.view_channel_post(channel.id, reader, post.id).unwrap(), 2);
        assert_eq!(db.get_channel(channel.id).unwrap().stats.views, 2);
        assert_eq!(db.get_channel_posts(channel.id, None, 10).unwrap()[0].views, 2);

        // Saving the channel again keeps the counter.
        db.update_channel(channel.id, |c| c.follow(reader)).unwrap();
        assert_eq!(db.get_channel(channel.id).unwrap().stats.views, 2);

        let err = db.view_channel_post(channel.id, reader, Uuid::new_v4()).unwrap_err();
        assert_eq!(err.downcast_ref::<CoreError>(), Some(&CoreError::NotFound("post")));
    }

    #[test]
    fn post_deletion_needs_an_admin() {
        let db = db();
        let (channel, owner) = channel_with_admin(&db);
        let (_, post) = db
            .publish_post(channel.id, |c| c.post(owner, "oops", None))
            .unwrap();

        let err = db.delete_channel_post(channel.id, Uuid::new_v4(), post.id).unwrap_err();
        assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::Forbidden(_))));

        db.delete_channel_post(channel.id, owner, post.id).unwrap();
        assert!(db.get_channel_posts(channel.id, None, 10).unwrap().is_empty());
        let err = db.delete_channel_post(channel.id, owner, post.id).unwrap_err();
        assert_eq!(err.downcast_ref::<CoreError>(), Some(&CoreError::NotFound("post")));
        assert_eq!(db.get_channel(channel.id).unwrap().stats.posts_published, 1);
    }

    #[test]
    fn post_pages_break_timestamp_ties_by_id() {
        let db = db();
        let (channel, owner) = channel_with_admin(&db);
        let at = chrono::Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let post = Post {
                id: Uuid::new_v4(),
                author_id: owner,
                body: format!("post {i}"),
                media_id: None,
                views: 0,
                created_at: at,
            };
            db.with_conn(|c| insert_post(c, channel.id, &post)).unwrap();
            ids.push(post.id);
        }
        ids.sort();
        ids.reverse();

        let first = db.get_channel_posts(channel.id, None, 2).unwrap();
        assert_eq!(first.iter().map(|p| p.id).collect::<Vec<_>>(), ids[..2]);
        let rest = db.get_channel_posts(channel.id, Some(first[1].id), 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[2]);
    }
}
