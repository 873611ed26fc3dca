//! Database models for CAFF Share.

pub mod caff;
pub mod comment;
pub mod user;

pub use caff::{Caff, CaffDto, NewCaff};
pub use comment::{Comment, CommentDto, NewCommentRequest};
pub use user::{RegisterUser, User, UserDto};
