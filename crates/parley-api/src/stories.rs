use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use parley_core::{CoreError, ForbiddenReason};
use parley_db::models::StoryRow;
use parley_db::{Database, parse_ts};
use parley_types::api::{Claims, CreateStoryRequest, StoryViewer};
use parley_types::events::GatewayEvent;

use crate::chat::story_from_row;
use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

const MAX_STORY_LEN: usize = 1024;

/// A story that still exists and has not expired.
fn live_story(db: &Database, id: Uuid) -> anyhow::Result<StoryRow> {
    let row = db
        .get_story(&id.to_string())?
        .ok_or(CoreError::NotFound("story"))?;
    if parse_ts(&row.expires_at)? <= Utc::now() {
        return Err(CoreError::NotFound("story").into());
    }
    Ok(row)
}

fn require_author(row: &StoryRow, user: Uuid) -> Result<(), CoreError> {
    if row.author_id != user.to_string() {
        return Err(ForbiddenReason::NotAuthor.into());
    }
    Ok(())
}

pub async fn create_story(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateStoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let body = req
        .body
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());
    if body.is_none() && req.media_id.is_none() {
        return Err(ApiError::bad_request("story needs text or media"));
    }
    if body.as_ref().is_some_and(|b| b.chars().count() > MAX_STORY_LEN) {
        return Err(ApiError::bad_request("story is too long"));
    }

    let author = claims.sub;
    let ttl = state.story_ttl;
    let story = blocking(&state.db, move |db| {
        let media = req.media_id.map(|m| m.to_string());
        if let Some(media_id) = &media {
            if db.get_upload(media_id)?.is_none() {
                return Err(CoreError::NotFound("upload").into());
            }
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        db.insert_story(
            &id,
            &author.to_string(),
            body.as_deref(),
            media.as_deref(),
            &now,
            &(now + ttl),
        )?;
        let row = db.get_story(&id)?.ok_or(CoreError::NotFound("story"))?;
        story_from_row(row)
    })
    .await?;

    info!("{} posted story {}", claims.username, story.id);
    state.dispatcher.broadcast(GatewayEvent::StoryCreate {
        story: story.clone(),
    });
    Ok((StatusCode::CREATED, Json(story)))
}

pub async fn list_stories(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stories = blocking(&state.db, |db| {
        db.get_active_stories(&Utc::now())?
            .into_iter()
            .map(story_from_row)
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;
    Ok(Json(stories))
}

pub async fn view_story(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let viewer = claims.sub;
    let first = blocking(&state.db, move |db| {
        let row = live_story(db, story_id)?;
        if row.author_id == viewer.to_string() {
            return Ok(false);
        }
        db.record_story_view(&row.id, &viewer.to_string())
    })
    .await?;
    Ok(Json(serde_json::json!({ "first_view": first })))
}

pub async fn story_viewers(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let viewers = blocking(&state.db, move |db| {
        let row = live_story(db, story_id)?;
        require_author(&row, claims.sub)?;
        db.get_story_viewers(&row.id)?
            .into_iter()
            .map(|v| {
                Ok(StoryViewer {
                    user_id: v.viewer_id.parse()?,
                    username: v.username,
                    viewed_at: parse_ts(&v.viewed_at)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;
    Ok(Json(viewers))
}

pub async fn delete_story(
    State(state): State<AppState>,
    Path(story_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    blocking(&state.db, move |db| {
        let row = db
            .get_story(&story_id.to_string())?
            .ok_or(CoreError::NotFound("story"))?;
        require_author(&row, claims.sub)?;
        db.delete_story(&row.id)
    })
    .await?;

    state
        .dispatcher
        .broadcast(GatewayEvent::StoryDelete { story_id });
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_stories_are_gone() {
        let db = Database::open_in_memory().unwrap();
        let author = Uuid::new_v4();
        db.create_user(&author.to_string(), "alice", "hash").unwrap();

        let id = Uuid::new_v4();
        let past = Utc::now() - chrono::Duration::hours(48);
        db.insert_story(
            &id.to_string(),
            &author.to_string(),
            Some("old news"),
            None,
            &past,
            &(past + chrono::Duration::hours(24)),
        )
        .unwrap();

        let err = live_story(&db, id).unwrap_err();
        assert_eq!(err.downcast_ref::<CoreError>(), Some(&CoreError::NotFound("story")));
    }

    #[test]
    fn only_the_author_sees_viewers() {
        let author = Uuid::new_v4();
        let row = StoryRow {
            id: Uuid::new_v4().to_string(),
            author_id: author.to_string(),
            author_username: "alice".into(),
            body: Some("hi".into()),
            media_id: None,
            created_at: String::new(),
            expires_at: String::new(),
            view_count: 0,
        };
        assert!(require_author(&row, author).is_ok());
        assert_eq!(
            require_author(&row, Uuid::new_v4()),
            Err(CoreError::Forbidden(ForbiddenReason::NotAuthor))
        );
    }
}
