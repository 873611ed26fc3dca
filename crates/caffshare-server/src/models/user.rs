//! User model.

use caffshare_ids::{IdCodec, IdError, Namespace};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

/// Salt length in bytes for password hashes.
const PASSWORD_SALT_BYTES: usize = 16;

/// Represents a registered user stored in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// Internal key. Never exposed; see [`UserDto::id`].
    pub id: i64,
    pub username: String,
    /// `<salt hex>$<sha256 hex>`.
    pub password_hash: String,
    /// False once the user has been deleted.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Registration request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    pub username: String,
    pub password: String,
}

/// Public representation of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    /// Public identifier in the user namespace.
    pub id: String,
    pub username: String,
}

impl User {
    pub fn to_dto(&self, ids: &IdCodec) -> Result<UserDto, IdError> {
        Ok(UserDto {
            id: ids.encode_key(Namespace::User, self.id)?,
            username: self.username.clone(),
        })
    }

    /// Returns the URL path for this user.
    pub fn url_path(&self, ids: &IdCodec) -> Result<String, IdError> {
        Ok(format!("/api/users/{}", ids.encode_key(Namespace::User, self.id)?))
    }
}

impl RegisterUser {
    /// Checks the registration fields, returning the user-facing reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("The Username must not be empty!".to_string());
        }
        if self.password.trim().is_empty() {
            return Err("The Password must not be empty!".to_string());
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err("The Username must not contain whitespaces!".to_string());
        }
        Ok(())
    }
}

/// Hashes a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; PASSWORD_SALT_BYTES] = rand::thread_rng().gen();
    format!("{}${}", hex::encode(salt), digest_password(&salt, password))
}

fn digest_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
