// Reversible, salted encoding of integer keys into public identifiers
//
// Token layout (before Base58 encoding):
//   tag    - leading bytes of SHA-256(key || "tag" || id), at least 4 bytes
//   masked - the 8-byte big-endian id XORed with SHA-256(key || "mask" || tag)
//
// The tag doubles as a synthetic nonce for the mask, so consecutive ids share
// no visible structure, and as an integrity check that ties the token to one
// namespace key.

use std::fmt;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::IdError;
use crate::namespace::Namespace;

/// Domain separator for namespace key derivation.
const KEY_DOMAIN: &[u8] = b"caffshare-ids/v1";

const ID_BYTES: usize = 8;
const MIN_TAG_BYTES: usize = 4;
const MAX_TAG_BYTES: usize = 32;

/// Largest supported minimum token length.
///
/// A token with the longest tag always encodes to more Base58 characters
/// than this.
pub const MAX_MIN_LENGTH: usize = 48;

/// Identifier configuration, supplied once at process start.
///
/// Changing the salt invalidates every identifier issued under the old one.
#[derive(Clone, Deserialize)]
pub struct IdConfig {
    /// Secret salt mixed into every namespace key.
    pub salt: String,
    /// Minimum length of encoded identifiers.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

fn default_min_length() -> usize {
    8
}

impl IdConfig {
    pub fn new(salt: impl Into<String>, min_length: usize) -> Self {
        Self {
            salt: salt.into(),
            min_length,
        }
    }
}

impl fmt::Debug for IdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdConfig")
            .field("salt", &"<redacted>")
            .field("min_length", &self.min_length)
            .finish()
    }
}

/// Encoder/decoder for public identifiers.
///
/// Built once from an [`IdConfig`] and immutable afterwards, so it can be
/// shared freely across threads (typically behind an `Arc`).
#[derive(Clone)]
pub struct IdCodec {
    keys: [[u8; 32]; 3],
    min_length: usize,
}

impl IdCodec {
    /// Validates the configuration and derives the per-namespace keys.
    pub fn new(config: IdConfig) -> Result<Self, IdError> {
        if config.salt.is_empty() {
            return Err(IdError::InvalidConfig("salt must not be empty".to_string()));
        }
        if config.min_length > MAX_MIN_LENGTH {
            return Err(IdError::InvalidConfig(format!(
                "min_length {} exceeds maximum of {}",
                config.min_length, MAX_MIN_LENGTH
            )));
        }

        let mut keys = [[0u8; 32]; 3];
        for namespace in Namespace::ALL {
            keys[namespace.index()] = derive_key(&config.salt, namespace);
        }

        Ok(Self {
            keys,
            min_length: config.min_length,
        })
    }

    /// Minimum length of every identifier this codec produces.
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Encodes `id` as a public identifier in `namespace`.
    ///
    /// Deterministic for a given (namespace, id, salt, min_length).
    pub fn encode(&self, namespace: Namespace, id: u64) -> String {
        let key = self.key(namespace);
        let full_tag = tag_digest(key, id);

        let mut encoded = String::new();
        for tag_len in MIN_TAG_BYTES..=MAX_TAG_BYTES {
            encoded = encode_token(key, &full_tag[..tag_len], id);
            if encoded.len() >= self.min_length {
                break;
            }
        }
        encoded
    }

    /// Decodes a public identifier issued in `namespace`.
    ///
    /// Never panics on arbitrary input: anything this codec would not have
    /// produced for `namespace` yields [`IdError::InvalidIdentifier`].
    pub fn decode(&self, namespace: Namespace, public_id: &str) -> Result<u64, IdError> {
        if public_id.is_empty() || public_id.len() > MAX_TOKEN_CHARS {
            return Err(IdError::InvalidIdentifier);
        }

        let bytes = bs58::decode(public_id)
            .into_vec()
            .map_err(|_| IdError::InvalidIdentifier)?;

        if bytes.len() < ID_BYTES + MIN_TAG_BYTES || bytes.len() > ID_BYTES + MAX_TAG_BYTES {
            return Err(IdError::InvalidIdentifier);
        }

        let key = self.key(namespace);
        let (tag, masked) = bytes.split_at(bytes.len() - ID_BYTES);

        let mask = mask_digest(key, tag);
        let mut id_bytes = [0u8; ID_BYTES];
        for (i, byte) in id_bytes.iter_mut().enumerate() {
            *byte = masked[i] ^ mask[i];
        }
        let id = u64::from_be_bytes(id_bytes);

        let expected = tag_digest(key, id);
        if !constant_time_eq(tag, &expected[..tag.len()]) {
            return Err(IdError::InvalidIdentifier);
        }

        // Only the canonical spelling is accepted (no padded or re-tagged variants).
        if self.encode(namespace, id) != public_id {
            return Err(IdError::InvalidIdentifier);
        }

        Ok(id)
    }

    /// Encodes a signed record key. Negative keys are rejected.
    pub fn encode_key(&self, namespace: Namespace, key: i64) -> Result<String, IdError> {
        let id = u64::try_from(key).map_err(|_| IdError::NegativeKey(key))?;
        Ok(self.encode(namespace, id))
    }

    /// Decodes a public identifier into a signed record key.
    ///
    /// Ids above `i64::MAX` cannot name a record and are rejected.
    pub fn decode_key(&self, namespace: Namespace, public_id: &str) -> Result<i64, IdError> {
        let id = self.decode(namespace, public_id)?;
        i64::try_from(id).map_err(|_| IdError::InvalidIdentifier)
    }

    fn key(&self, namespace: Namespace) -> &[u8; 32] {
        &self.keys[namespace.index()]
    }
}

impl fmt::Debug for IdCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdCodec")
            .field("min_length", &self.min_length)
            .finish_non_exhaustive()
    }
}

/// Upper bound on the Base58 length of the longest token.
const MAX_TOKEN_CHARS: usize = 64;

fn derive_key(salt: &str, namespace: Namespace) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_DOMAIN);
    hasher.update([0u8]);
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(namespace.label().as_bytes());
    hasher.finalize().into()
}

fn tag_digest(key: &[u8; 32], id: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(b"tag");
    hasher.update(id.to_be_bytes());
    hasher.finalize().into()
}

fn mask_digest(key: &[u8; 32], tag: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(b"mask");
    hasher.update(tag);
    hasher.finalize().into()
}

fn encode_token(key: &[u8; 32], tag: &[u8], id: u64) -> String {
    let mask = mask_digest(key, tag);
    let mut token = Vec::with_capacity(tag.len() + ID_BYTES);
    token.extend_from_slice(tag);
    for (i, byte) in id.to_be_bytes().iter().enumerate() {
        token.push(byte ^ mask[i]);
    }
    bs58::encode(token).into_string()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
