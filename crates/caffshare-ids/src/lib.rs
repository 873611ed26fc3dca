// CAFF Share identifiers - opaque public ids for internal record keys

pub mod codec;
pub mod error;
pub mod namespace;

pub use codec::{IdCodec, IdConfig, MAX_MIN_LENGTH};
pub use error::IdError;
pub use namespace::Namespace;
