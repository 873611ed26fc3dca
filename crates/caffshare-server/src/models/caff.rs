//! CAFF record model.

use caffshare_ids::{IdCodec, IdError, Namespace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::comment::CommentDto;

/// An uploaded CAFF file, joined with its uploader's username.
#[derive(Debug, Clone, FromRow)]
pub struct Caff {
    pub id: i64,
    /// Display name; initially the uploaded file's stem.
    pub name: String,
    /// Storage key of the original and preview (`<owner>/<stem>_<timestamp>`).
    pub file_path_without_extension: String,
    pub uploader_id: i64,
    pub uploader_username: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new CAFF record.
#[derive(Debug, Clone)]
pub struct NewCaff {
    pub name: String,
    pub file_path_without_extension: String,
    pub uploader_id: i64,
}

/// Public representation of a CAFF record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaffDto {
    pub id: String,
    pub name: String,
    pub uploader_id: String,
    pub uploader_username: String,
    pub comments: Vec<CommentDto>,
}

impl Caff {
    pub fn to_dto(&self, ids: &IdCodec, comments: Vec<CommentDto>) -> Result<CaffDto, IdError> {
        Ok(CaffDto {
            id: ids.encode_key(Namespace::Caff, self.id)?,
            name: self.name.clone(),
            uploader_id: ids.encode_key(Namespace::User, self.uploader_id)?,
            uploader_username: self.uploader_username.clone(),
            comments,
        })
    }

    /// Returns the URL path for this record.
    pub fn url_path(&self, ids: &IdCodec) -> Result<String, IdError> {
        Ok(format!("/api/caffs/{}", ids.encode_key(Namespace::Caff, self.id)?))
    }

    /// Filename offered when downloading the original.
    pub fn download_filename(&self) -> String {
        format!("{}.caff", self.name)
    }

    /// Filename offered when downloading the preview.
    pub fn preview_filename(&self) -> String {
        format!("{}.gif", self.name)
    }
}
