//! CAFF upload, listing, download and moderation endpoints.

use std::path::Path;

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path as UrlPath, Query, State,
    },
    http::{header, HeaderName, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use caffshare_ids::Namespace;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, warn};

use super::comments::comments_for_caffs;
use crate::error::AppError;
use crate::models::caff::{Caff, CaffDto, NewCaff};
use crate::pipeline::{StoredArtifact, UploadRequest};
use crate::state::AppState;

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";

/// Columns of [`Caff`], joined with the uploader's username.
const CAFF_SELECT: &str = "SELECT c.id, c.name, c.file_path_without_extension, c.uploader_id, \
     u.username AS uploader_username, c.is_active, c.created_at \
     FROM caffs c JOIN users u ON u.id = c.uploader_id";

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Case-insensitive substring of the display name.
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

/// Creates the caffs router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(list_caffs).post(upload_caff))
        .route("/{id}", get(get_caff).patch(rename_caff).delete(delete_caff))
        .route("/{id}/download", get(download_caff))
        .route("/{id}/preview", get(preview_caff))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// GET /api/caffs
///
/// Lists active records, optionally filtered by name.
async fn list_caffs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CaffDto>>, AppError> {
    let pattern = query
        .name
        .filter(|name| !name.is_empty())
        .map(|name| format!("%{}%", escape_like(&name)));

    let caffs: Vec<Caff> = sqlx::query_as(&format!(
        "{CAFF_SELECT} WHERE c.is_active AND ($1::TEXT IS NULL OR c.name ILIKE $1) ORDER BY c.id"
    ))
    .bind(pattern)
    .fetch_all(&state.pool)
    .await?;

    let keys: Vec<i64> = caffs.iter().map(|caff| caff.id).collect();
    let mut comments = comments_for_caffs(&state.pool, &state.ids, &keys).await?;

    Ok(Json(
        caffs
            .iter()
            .map(|caff| caff.to_dto(&state.ids, comments.remove(&caff.id).unwrap_or_default()))
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

/// GET /api/caffs/{id}
async fn get_caff(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<CaffDto>, AppError> {
    let caff = require_caff(&state, &id).await?;
    let mut comments = comments_for_caffs(&state.pool, &state.ids, &[caff.id]).await?;
    let comments = comments.remove(&caff.id).unwrap_or_default();
    Ok(Json(caff.to_dto(&state.ids, comments)?))
}

/// GET /api/caffs/{id}/download
///
/// Streams back the stored original.
async fn download_caff(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let caff = require_caff(&state, &id).await?;
    let path = state.store().original_for_key(&caff.file_path_without_extension)?;
    send_file(&path, "application/caff", &caff.download_filename(), &id).await
}

/// GET /api/caffs/{id}/preview
async fn preview_caff(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<impl IntoResponse, AppError> {
    let caff = require_caff(&state, &id).await?;
    let path = state.store().preview_for_key(&caff.file_path_without_extension)?;
    send_file(&path, "image/gif", &caff.preview_filename(), &id).await
}

/// POST /api/caffs?userId=<public id>
///
/// Runs the ingestion pipeline on the multipart `file` field and records the
/// result. Returns 201 with the new record.
async fn upload_caff(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let multipart = multipart.map_err(|_| AppError::BadRequest("Bad content type!".to_string()))?;
    let (declared_filename, contents) = read_file_field(multipart).await?;

    let stored = state
        .pipeline
        .ingest(UploadRequest {
            declared_filename,
            owner_public_id: query.user_id,
            body: &contents[..],
        })
        .await?;

    let caff = match insert_caff(&state.pool, &stored).await {
        Ok(caff) => caff,
        Err(e) => {
            if let Err(cleanup) = state.store().remove_artifact(&stored.key).await {
                warn!(key = %stored.key, error = %cleanup, "failed to remove files of unrecorded upload");
            }
            return Err(e.into());
        }
    };

    let dto = caff.to_dto(&state.ids, Vec::new())?;
    info!(caff = %dto.id, bytes = stored.size_bytes, "recorded upload");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, caff.url_path(&state.ids)?)],
        Json(dto),
    ))
}

/// PATCH /api/caffs/{id}
///
/// Renames a record. The body is a JSON string.
async fn rename_caff(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(name): Json<String>,
) -> Result<StatusCode, AppError> {
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "The name must be at least 1 character long!".to_string(),
        ));
    }
    let key = decode_caff_id(&state, &id)?;

    let result = sqlx::query("UPDATE caffs SET name = $1 WHERE id = $2 AND is_active")
        .bind(&name)
        .bind(key)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(caff_not_found(&id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/caffs/{id}
///
/// Soft-deletes a record. The stored files are kept.
async fn delete_caff(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<StatusCode, AppError> {
    let key = decode_caff_id(&state, &id)?;

    let result = sqlx::query("UPDATE caffs SET is_active = FALSE WHERE id = $1 AND is_active")
        .bind(key)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(caff_not_found(&id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Finds an active record by internal key.
pub(crate) async fn find_active_caff(pool: &PgPool, key: i64) -> Result<Option<Caff>, sqlx::Error> {
    sqlx::query_as(&format!("{CAFF_SELECT} WHERE c.id = $1 AND c.is_active"))
        .bind(key)
        .fetch_optional(pool)
        .await
}

pub(crate) fn caff_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("No CAFF file was found with the id {}!", id))
}

fn decode_caff_id(state: &AppState, id: &str) -> Result<i64, AppError> {
    state
        .ids
        .decode_key(Namespace::Caff, id)
        .map_err(|_| caff_not_found(id))
}

async fn require_caff(state: &AppState, id: &str) -> Result<Caff, AppError> {
    let key = decode_caff_id(state, id)?;
    find_active_caff(&state.pool, key)
        .await?
        .ok_or_else(|| caff_not_found(id))
}

async fn insert_caff(pool: &PgPool, stored: &StoredArtifact) -> Result<Caff, sqlx::Error> {
    let new_caff = NewCaff {
        name: stored.name.clone(),
        file_path_without_extension: stored.key.clone(),
        uploader_id: stored.owner.id,
    };

    let (id, created_at): (i64, chrono::DateTime<chrono::Utc>) = sqlx::query_as(
        r#"
        INSERT INTO caffs (name, file_path_without_extension, uploader_id)
        VALUES ($1, $2, $3)
        RETURNING id, created_at
        "#,
    )
    .bind(&new_caff.name)
    .bind(&new_caff.file_path_without_extension)
    .bind(new_caff.uploader_id)
    .fetch_one(pool)
    .await?;

    Ok(Caff {
        id,
        name: new_caff.name,
        file_path_without_extension: new_caff.file_path_without_extension,
        uploader_id: stored.owner.id,
        uploader_username: stored.owner.username.clone(),
        is_active: true,
        created_at,
    })
}

/// Pulls the `file` field out of the form, skipping any other fields.
async fn read_file_field(mut multipart: Multipart) -> Result<(String, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("Missing file name!".to_string()))?;
        let contents = field.bytes().await.map_err(multipart_error)?;
        return Ok((filename, contents));
    }
    Err(AppError::BadRequest("Missing file field!".to_string()))
}

/// A body over the upload limit keeps its 413; every other form error is a 400.
fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

async fn send_file(
    path: &Path,
    content_type: &'static str,
    filename: &str,
    id: &str,
) -> Result<impl IntoResponse, AppError> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "record points at a missing file");
            return Err(caff_not_found(id));
        }
        Err(e) => {
            return Err(AppError::Internal(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let headers: [(HeaderName, String); 2] = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(filename)),
    ];
    Ok((headers, contents))
}

/// Builds an attachment disposition whose filename survives header encoding.
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

/// Escapes LIKE metacharacters so the filter matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
