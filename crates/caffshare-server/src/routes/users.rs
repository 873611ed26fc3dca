//! User registration and lookup endpoints.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use caffshare_ids::Namespace;
use sqlx::PgPool;
use tracing::info;

use crate::error::AppError;
use crate::models::user::{hash_password, RegisterUser, User, UserDto};
use crate::state::AppState;

const USERNAME_TAKEN_MESSAGE: &str = "The Username is already in use!";

/// Creates the users router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_users).post(register_user))
        .route("/{id}", get(get_user).delete(delete_user))
        .with_state(state)
}

/// GET /api/users
async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserDto>>, AppError> {
    let users: Vec<User> = sqlx::query_as(
        "SELECT id, username, password_hash, is_active, created_at FROM users WHERE is_active ORDER BY id",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(
        users
            .iter()
            .map(|user| user.to_dto(&state.ids))
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

/// GET /api/users/{id}
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserDto>, AppError> {
    let key = decode_user_id(&state, &id)?;
    let user = find_active_user(&state.pool, key)
        .await?
        .ok_or_else(|| user_not_found(&id))?;
    Ok(Json(user.to_dto(&state.ids)?))
}

/// POST /api/users
///
/// Registers a new user. Usernames are unique across active and deleted users.
async fn register_user(
    State(state): State<AppState>,
    Json(request): Json<RegisterUser>,
) -> Result<impl IntoResponse, AppError> {
    request.validate().map_err(AppError::BadRequest)?;

    let taken: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1 LIMIT 1")
        .bind(&request.username)
        .fetch_optional(&state.pool)
        .await?;
    if taken.is_some() {
        return Err(AppError::BadRequest(USERNAME_TAKEN_MESSAGE.to_string()));
    }

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (username, password_hash)
        VALUES ($1, $2)
        RETURNING id, username, password_hash, is_active, created_at
        "#,
    )
    .bind(&request.username)
    .bind(hash_password(&request.password))
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::BadRequest(USERNAME_TAKEN_MESSAGE.to_string())
        }
        e => AppError::Database(e),
    })?;

    let dto = user.to_dto(&state.ids)?;
    info!(user = %dto.id, "registered user");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, user.url_path(&state.ids)?)],
        Json(dto),
    ))
}

/// DELETE /api/users/{id}
///
/// Soft-deletes a user. Their uploads and comments stay visible.
async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let key = decode_user_id(&state, &id)?;

    let result = sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1 AND is_active")
        .bind(key)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(user_not_found(&id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Finds an active user by internal key.
pub(crate) async fn find_active_user(pool: &PgPool, key: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, username, password_hash, is_active, created_at FROM users WHERE id = $1 AND is_active",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
}

pub(crate) fn user_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("No User was found with the id {}!", id))
}

fn decode_user_id(state: &AppState, id: &str) -> Result<i64, AppError> {
    state
        .ids
        .decode_key(Namespace::User, id)
        .map_err(|_| user_not_found(id))
}
