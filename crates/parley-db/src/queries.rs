use crate::models::{
    ArchiveRow, CallRow, MessageRow, NewMessage, ReactionRow, StoryRow, StoryViewRow, UploadRow,
    UserRow,
};
use crate::{Database, ts};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, password, display_name, about, created_at";

const MESSAGE_COLUMNS: &str = "m.id, m.chat_kind, m.chat_id, m.author_id, u.username, m.body,
     m.media_id, m.reply_to, m.pinned, m.deleted, m.created_at, m.edited_at";

const CALL_COLUMNS: &str =
    "id, caller_id, chat_kind, chat_id, kind, status, started_at, answered_at, ended_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, ts(&Utc::now())),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS), username)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS), id)
        })
    }

    pub fn update_profile(
        &self,
        id: &str,
        display_name: Option<&str>,
        about: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            // COALESCE keeps fields the caller did not send; an empty string clears.
            conn.execute(
                "UPDATE users SET
                    display_name = NULLIF(COALESCE(?2, display_name), ''),
                    about = NULLIF(COALESCE(?3, about), '')
                 WHERE id = ?1",
                (id, display_name, about),
            )?;
            Ok(())
        })
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_kind, chat_id, author_id, body, media_id, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    msg.id,
                    msg.chat_kind,
                    msg.chat_id,
                    msg.author_id,
                    msg.body,
                    msg.media_id,
                    msg.reply_to,
                    msg.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m LEFT JOIN users u ON m.author_id = u.id WHERE m.id = ?1",
                MESSAGE_COLUMNS
            );
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// Newest first. `before` is the id of the oldest message the client
    /// already has; messages sharing its timestamp are ordered by id.
    pub fn get_messages(
        &self,
        chat_kind: &str,
        chat_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, chat_kind, chat_id, limit, before))
    }

    pub fn edit_message(&self, id: &str, body: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET body = ?2, edited_at = ?3 WHERE id = ?1 AND deleted = 0",
                (id, body, ts(&Utc::now())),
            )?;
            Ok(())
        })
    }

    /// Soft delete: the row stays so replies keep their anchor.
    pub fn delete_message(&self, id: &str) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "UPDATE messages SET body = '', media_id = NULL, pinned = 0, deleted = 1 WHERE id = ?1",
                [id],
            )?;
            conn.execute("DELETE FROM reactions WHERE message_id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE messages SET pinned = ?2 WHERE id = ?1", (id, pinned))?;
            Ok(())
        })
    }

    pub fn get_pinned_messages(&self, chat_kind: &str, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m LEFT JOIN users u ON m.author_id = u.id
                 WHERE m.chat_kind = ?1 AND m.chat_id = ?2 AND m.pinned = 1
                 ORDER BY m.created_at DESC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_kind, chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if exists, inserts if not.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<bool> {
        self.write(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, message_id, user_id, emoji, ts(&Utc::now())],
                )?;
                Ok(true)
            }
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({}) ORDER BY created_at",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Calls --

    pub fn insert_call(&self, call: &CallRow, participants: &[String]) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                &format!("INSERT INTO calls ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)", CALL_COLUMNS),
                rusqlite::params![
                    call.id,
                    call.caller_id,
                    call.chat_kind,
                    call.chat_id,
                    call.kind,
                    call.status,
                    call.started_at,
                    call.answered_at,
                    call.ended_at
                ],
            )?;
            let mut stmt =
                conn.prepare("INSERT OR IGNORE INTO call_participants (call_id, user_id) VALUES (?1, ?2)")?;
            for user_id in participants {
                stmt.execute((&call.id, user_id))?;
            }
            Ok(())
        })
    }

    pub fn get_call(&self, id: &str) -> Result<Option<CallRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM calls WHERE id = ?1", CALL_COLUMNS),
                [id],
                call_from_row,
            )
            .optional()
        })
    }

    pub fn get_call_participants(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM call_participants WHERE call_id = ?1")?;
            let rows = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Move a call from `from` to `to`. Returns false, writing nothing, when
    /// the call is no longer in `from`.
    pub fn transition_call(
        &self,
        id: &str,
        from: &str,
        to: &str,
        answered_at: Option<&str>,
        ended_at: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE calls SET status = ?3,
                    answered_at = COALESCE(?4, answered_at),
                    ended_at = COALESCE(?5, ended_at)
                 WHERE id = ?1 AND status = ?2",
                (id, from, to, answered_at, ended_at),
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_calls_for_user(&self, user_id: &str, limit: u32) -> Result<Vec<CallRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM calls WHERE id IN
                    (SELECT call_id FROM call_participants WHERE user_id = ?1)
                 ORDER BY started_at DESC LIMIT ?2",
                CALL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], call_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Stories --

    pub fn insert_story(
        &self,
        id: &str,
        author_id: &str,
        body: Option<&str>,
        media_id: Option<&str>,
        created_at: &DateTime<Utc>,
        expires_at: &DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stories (id, author_id, body, media_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, author_id, body, media_id, ts(created_at), ts(expires_at)),
            )?;
            Ok(())
        })
    }

    pub fn get_story(&self, id: &str) -> Result<Option<StoryRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT s.id, s.author_id, u.username, s.body, s.media_id, s.created_at, s.expires_at,
                        (SELECT COUNT(*) FROM story_views v WHERE v.story_id = s.id)
                 FROM stories s LEFT JOIN users u ON s.author_id = u.id
                 WHERE s.id = ?1",
                [id],
                story_from_row,
            )
            .optional()
        })
    }

    /// Unexpired stories, newest first.
    pub fn get_active_stories(&self, now: &DateTime<Utc>) -> Result<Vec<StoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.author_id, u.username, s.body, s.media_id, s.created_at, s.expires_at,
                        (SELECT COUNT(*) FROM story_views v WHERE v.story_id = s.id)
                 FROM stories s LEFT JOIN users u ON s.author_id = u.id
                 WHERE s.expires_at > ?1
                 ORDER BY s.created_at DESC",
            )?;
            let rows = stmt
                .query_map([ts(now)], story_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns true the first time a viewer sees a story.
    pub fn record_story_view(&self, story_id: &str, viewer_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO story_views (story_id, viewer_id, viewed_at) VALUES (?1, ?2, ?3)",
                (story_id, viewer_id, ts(&Utc::now())),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn get_story_viewers(&self, story_id: &str) -> Result<Vec<StoryViewRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.viewer_id, COALESCE(u.username, 'unknown'), v.viewed_at
                 FROM story_views v LEFT JOIN users u ON v.viewer_id = u.id
                 WHERE v.story_id = ?1 ORDER BY v.viewed_at DESC",
            )?;
            let rows = stmt
                .query_map([story_id], |row| {
                    Ok(StoryViewRow {
                        viewer_id: row.get(0)?,
                        username: row.get(1)?,
                        viewed_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_story(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM stories WHERE id = ?1", [id])? > 0))
    }

    /// Delete expired stories. Returns how many were removed.
    pub fn purge_expired_stories(&self, now: &DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM stories WHERE expires_at <= ?1", [ts(now)])?)
        })
    }

    // -- Archives --

    pub fn archive_chat(&self, user_id: &str, chat_kind: &str, chat_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO archives (user_id, chat_kind, chat_id, archived_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (user_id, chat_kind, chat_id, ts(&Utc::now())),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn unarchive_chat(&self, user_id: &str, chat_kind: &str, chat_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM archives WHERE user_id = ?1 AND chat_kind = ?2 AND chat_id = ?3",
                (user_id, chat_kind, chat_id),
            )?;
            Ok(removed > 0)
        })
    }

    pub fn get_archives(&self, user_id: &str) -> Result<Vec<ArchiveRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_kind, chat_id, archived_at FROM archives
                 WHERE user_id = ?1 ORDER BY archived_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ArchiveRow {
                        chat_kind: row.get(0)?,
                        chat_id: row.get(1)?,
                        archived_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Uploads --

    pub fn insert_upload(&self, row: &UploadRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO uploads (id, owner_id, content_type, size, sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    &row.id,
                    &row.owner_id,
                    &row.content_type,
                    row.size,
                    &row.sha256,
                    &row.created_at,
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_upload(&self, id: &str) -> Result<Option<UploadRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, owner_id, content_type, size, sha256, created_at FROM uploads WHERE id = ?1",
                [id],
                |row| {
                    Ok(UploadRow {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        content_type: row.get(2)?,
                        size: row.get(3)?,
                        sha256: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }
}

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;

    let row = stmt
        .query_row([key], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                display_name: row.get(3)?,
                about: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(
    conn: &Connection,
    chat_kind: &str,
    chat_id: &str,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch author_username in a single query (eliminates N+1)
    let sql = format!(
        "SELECT {} FROM messages m
         LEFT JOIN users u ON m.author_id = u.id
         WHERE m.chat_kind = ?1 AND m.chat_id = ?2
           AND (?4 IS NULL OR (m.created_at, m.id) <
                (SELECT created_at, id FROM messages WHERE id = ?4))
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?3",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(rusqlite::params![chat_kind, chat_id, limit, before], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_kind: row.get(1)?,
        chat_id: row.get(2)?,
        author_id: row.get(3)?,
        author_username: row.get::<_, Option<String>>(4)?.unwrap_or_else(|| "unknown".to_string()),
        body: row.get(5)?,
        media_id: row.get(6)?,
        reply_to: row.get(7)?,
        pinned: row.get(8)?,
        deleted: row.get(9)?,
        created_at: row.get(10)?,
        edited_at: row.get(11)?,
    })
}

fn call_from_row(row: &Row<'_>) -> rusqlite::Result<CallRow> {
    Ok(CallRow {
        id: row.get(0)?,
        caller_id: row.get(1)?,
        chat_kind: row.get(2)?,
        chat_id: row.get(3)?,
        kind: row.get(4)?,
        status: row.get(5)?,
        started_at: row.get(6)?,
        answered_at: row.get(7)?,
        ended_at: row.get(8)?,
    })
}

fn story_from_row(row: &Row<'_>) -> rusqlite::Result<StoryRow> {
    Ok(StoryRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_username: row.get::<_, Option<String>>(2)?.unwrap_or_else(|| "unknown".to_string()),
        body: row.get(3)?,
        media_id: row.get(4)?,
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
        view_count: row.get(7)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
