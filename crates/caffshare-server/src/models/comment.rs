//! Comment model.

use caffshare_ids::{IdCodec, IdError, Namespace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::user::UserDto;

/// A comment on a CAFF record, joined with its author's username.
#[derive(Debug, Clone, FromRow)]
pub struct Comment {
    pub id: i64,
    pub text: String,
    pub user_id: i64,
    pub username: String,
    pub caff_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request body for a new comment. All ids are public identifiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommentRequest {
    pub caff_id: String,
    pub user_id: String,
    pub comment_text: String,
}

/// Public representation of a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDto {
    pub id: String,
    pub text: String,
    pub user: UserDto,
}

impl Comment {
    pub fn to_dto(&self, ids: &IdCodec) -> Result<CommentDto, IdError> {
        Ok(CommentDto {
            id: ids.encode_key(Namespace::Comment, self.id)?,
            text: self.text.clone(),
            user: UserDto {
                id: ids.encode_key(Namespace::User, self.user_id)?,
                username: self.username.clone(),
            },
        })
    }

    /// Returns the URL path for this comment.
    pub fn url_path(&self, ids: &IdCodec) -> Result<String, IdError> {
        Ok(format!("/api/comments/{}", ids.encode_key(Namespace::Comment, self.id)?))
    }
}
