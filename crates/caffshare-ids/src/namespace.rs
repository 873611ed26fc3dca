// Identifier namespaces

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Independent encoding spaces for public identifiers.
///
/// The same integer key encodes to unrelated strings in each namespace, and a
/// string issued in one namespace is rejected by every other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    User,
    Caff,
    Comment,
}

impl Namespace {
    /// All namespaces, in key-derivation order.
    pub const ALL: [Namespace; 3] = [Namespace::User, Namespace::Caff, Namespace::Comment];

    /// Label mixed into the namespace key.
    pub fn label(self) -> &'static str {
        match self {
            Namespace::User => "user",
            Namespace::Caff => "caff",
            Namespace::Comment => "comment",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Namespace::User => 0,
            Namespace::Caff => 1,
            Namespace::Comment => 2,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(Namespace::User),
            "caff" | "caffs" | "artifact" => Ok(Namespace::Caff),
            "comment" | "comments" => Ok(Namespace::Comment),
            other => Err(format!(
                "unknown namespace '{}' (expected user, caff or comment)",
                other
            )),
        }
    }
}
