use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password      TEXT NOT NULL,
            display_name  TEXT,
            about         TEXT,
            created_at    TEXT NOT NULL
        );

        -- Aggregates are stored whole; the membership tables mirror them
        -- for lookups and are rewritten on every save.
        CREATE TABLE IF NOT EXISTS groups (
            id          TEXT PRIMARY KEY,
            data        TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(user_id);

        -- views is bumped in place; it overrides stats.views in data.
        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            data        TEXT NOT NULL,
            views       INTEGER NOT NULL DEFAULT 0,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_followers (
            channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_followers_user
            ON channel_followers(user_id);

        CREATE TABLE IF NOT EXISTS channel_posts (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL,
            body        TEXT NOT NULL,
            media_id    TEXT,
            views       INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_channel_posts_channel
            ON channel_posts(channel_id, created_at, id);

        CREATE TABLE IF NOT EXISTS communities (
            id          TEXT PRIMARY KEY,
            data        TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            chat_kind   TEXT NOT NULL,
            chat_id     TEXT NOT NULL,
            author_id   TEXT NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            media_id    TEXT,
            reply_to    TEXT,
            pinned      INTEGER NOT NULL DEFAULT 0,
            deleted     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            edited_at   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_kind, chat_id, created_at, id);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        CREATE TABLE IF NOT EXISTS calls (
            id           TEXT PRIMARY KEY,
            caller_id    TEXT NOT NULL REFERENCES users(id),
            chat_kind    TEXT NOT NULL,
            chat_id      TEXT NOT NULL,
            kind         TEXT NOT NULL,
            status       TEXT NOT NULL,
            started_at   TEXT NOT NULL,
            answered_at  TEXT,
            ended_at     TEXT
        );

        CREATE TABLE IF NOT EXISTS call_participants (
            call_id     TEXT NOT NULL REFERENCES calls(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (call_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_call_participants_user
            ON call_participants(user_id);

        CREATE TABLE IF NOT EXISTS stories (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id),
            body        TEXT,
            media_id    TEXT,
            created_at  TEXT NOT NULL,
            expires_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stories_expiry
            ON stories(expires_at);

        CREATE TABLE IF NOT EXISTS story_views (
            story_id    TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            viewer_id   TEXT NOT NULL REFERENCES users(id),
            viewed_at   TEXT NOT NULL,
            PRIMARY KEY (story_id, viewer_id)
        );

        CREATE TABLE IF NOT EXISTS archives (
            user_id      TEXT NOT NULL REFERENCES users(id),
            chat_kind    TEXT NOT NULL,
            chat_id      TEXT NOT NULL,
            archived_at  TEXT NOT NULL,
            PRIMARY KEY (user_id, chat_kind, chat_id)
        );

        CREATE TABLE IF NOT EXISTS uploads (
            id            TEXT PRIMARY KEY,
            owner_id      TEXT NOT NULL REFERENCES users(id),
            content_type  TEXT NOT NULL,
            size          INTEGER NOT NULL,
            sha256        TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
