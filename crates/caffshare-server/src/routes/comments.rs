//! Comment endpoints.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use caffshare_ids::{IdCodec, Namespace};
use sqlx::PgPool;

use super::caffs::{caff_not_found, find_active_caff};
use super::users::{find_active_user, user_not_found};
use crate::error::AppError;
use crate::models::comment::{Comment, CommentDto, NewCommentRequest};
use crate::state::AppState;

/// Columns of [`Comment`], joined with the author's username.
const COMMENT_SELECT: &str = "SELECT c.id, c.text, c.user_id, u.username, c.caff_id, \
     c.is_active, c.created_at \
     FROM comments c JOIN users u ON u.id = c.user_id";

const EMPTY_TEXT_MESSAGE: &str = "The commentText must be at least 1 character long!";

/// Creates the comments router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_comments).post(create_comment))
        .route(
            "/{id}",
            get(get_comment).patch(edit_comment).delete(delete_comment),
        )
        .with_state(state)
}

/// GET /api/comments
async fn list_comments(State(state): State<AppState>) -> Result<Json<Vec<CommentDto>>, AppError> {
    let comments: Vec<Comment> =
        sqlx::query_as(&format!("{COMMENT_SELECT} WHERE c.is_active ORDER BY c.id"))
            .fetch_all(&state.pool)
            .await?;

    Ok(Json(
        comments
            .iter()
            .map(|comment| comment.to_dto(&state.ids))
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

/// GET /api/comments/{id}
async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommentDto>, AppError> {
    let key = decode_comment_id(&state, &id)?;

    let comment: Option<Comment> =
        sqlx::query_as(&format!("{COMMENT_SELECT} WHERE c.id = $1 AND c.is_active"))
            .bind(key)
            .fetch_optional(&state.pool)
            .await?;

    let comment = comment.ok_or_else(|| comment_not_found(&id))?;
    Ok(Json(comment.to_dto(&state.ids)?))
}

/// POST /api/comments
///
/// Adds a comment to an active record on behalf of an active user.
async fn create_comment(
    State(state): State<AppState>,
    Json(request): Json<NewCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.comment_text.is_empty() {
        return Err(AppError::BadRequest(EMPTY_TEXT_MESSAGE.to_string()));
    }

    let caff_key = state
        .ids
        .decode_key(Namespace::Caff, &request.caff_id)
        .map_err(|_| caff_not_found(&request.caff_id))?;
    let caff = find_active_caff(&state.pool, caff_key)
        .await?
        .ok_or_else(|| caff_not_found(&request.caff_id))?;

    let user_key = state
        .ids
        .decode_key(Namespace::User, &request.user_id)
        .map_err(|_| user_not_found(&request.user_id))?;
    let user = find_active_user(&state.pool, user_key)
        .await?
        .ok_or_else(|| user_not_found(&request.user_id))?;

    let (id, created_at): (i64, chrono::DateTime<chrono::Utc>) = sqlx::query_as(
        r#"
        INSERT INTO comments (text, user_id, caff_id)
        VALUES ($1, $2, $3)
        RETURNING id, created_at
        "#,
    )
    .bind(&request.comment_text)
    .bind(user.id)
    .bind(caff.id)
    .fetch_one(&state.pool)
    .await?;

    let comment = Comment {
        id,
        text: request.comment_text,
        user_id: user.id,
        username: user.username,
        caff_id: caff.id,
        is_active: true,
        created_at,
    };

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, comment.url_path(&state.ids)?)],
        Json(comment.to_dto(&state.ids)?),
    ))
}

/// PATCH /api/comments/{id}
///
/// Replaces the text of a comment. The body is a JSON string.
async fn edit_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(text): Json<String>,
) -> Result<StatusCode, AppError> {
    if text.is_empty() {
        return Err(AppError::BadRequest(EMPTY_TEXT_MESSAGE.to_string()));
    }
    let key = decode_comment_id(&state, &id)?;

    let result = sqlx::query("UPDATE comments SET text = $1 WHERE id = $2 AND is_active")
        .bind(&text)
        .bind(key)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(comment_not_found(&id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/comments/{id}
async fn delete_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let key = decode_comment_id(&state, &id)?;

    let result = sqlx::query("UPDATE comments SET is_active = FALSE WHERE id = $1 AND is_active")
        .bind(key)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(comment_not_found(&id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Loads the active comments of the given records, grouped by record key.
pub(crate) async fn comments_for_caffs(
    pool: &PgPool,
    ids: &IdCodec,
    caff_keys: &[i64],
) -> Result<HashMap<i64, Vec<CommentDto>>, AppError> {
    if caff_keys.is_empty() {
        return Ok(HashMap::new());
    }

    let comments: Vec<Comment> = sqlx::query_as(&format!(
        "{COMMENT_SELECT} WHERE c.caff_id = ANY($1) AND c.is_active ORDER BY c.id"
    ))
    .bind(caff_keys.to_vec())
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<i64, Vec<CommentDto>> = HashMap::new();
    for comment in &comments {
        grouped
            .entry(comment.caff_id)
            .or_default()
            .push(comment.to_dto(ids)?);
    }
    Ok(grouped)
}

fn comment_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("No Comment was found with the id {}!", id))
}

fn decode_comment_id(state: &AppState, id: &str) -> Result<i64, AppError> {
    state
        .ids
        .decode_key(Namespace::Comment, id)
        .map_err(|_| comment_not_found(id))
}
