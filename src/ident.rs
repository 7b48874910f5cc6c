//! Identifier normalization: heterogeneous caller values to canonical external ids.
//!
//! Callers refer to entities by whatever they have at hand: strings, integers,
//! enum-like tokens, floats, or URI-like composites. [`Identifier`] captures the
//! recognized input kinds and [`Identifier::canonical`] maps each to a canonical
//! UTF-8 [`ExternalId`]. Normalization is total and injective within each input
//! kind; cross-kind collisions are the caller's responsibility.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Reserved external id of the supremum node of every hierarchy.
pub const SUPREMUM: &str = "*";

/// Canonical UTF-8 external id.
///
/// Produced only by normalization; the inner string is NFC-normalized and
/// trimmed. The empty string is the sentinel for blank input, which
/// registration rejects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// The supremum id `"*"`.
    pub fn supremum() -> Self {
        ExternalId(SUPREMUM.to_string())
    }

    /// Borrow the canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is the blank sentinel.
    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this id is the reserved supremum id.
    pub fn is_supremum(&self) -> bool {
        self.0 == SUPREMUM
    }

    /// Consume into the canonical `String`.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExternalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A caller-supplied identifier in one of the recognized input kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    /// Free-form UTF-8 text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Floating-point number.
    Float(f64),
    /// Short symbol-like token; canonicalized to lowercase.
    Token(String),
    /// URI-like composite, canonicalized as `scheme://path`.
    Uri { scheme: String, path: String },
}

impl Identifier {
    /// A symbol-like token identifier.
    pub fn token(t: impl Into<String>) -> Self {
        Identifier::Token(t.into())
    }

    /// A URI-like composite identifier.
    pub fn uri(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Identifier::Uri {
            scheme: scheme.into(),
            path: path.into(),
        }
    }

    /// Canonicalize to an [`ExternalId`].
    ///
    /// Text is NFC-normalized and trimmed; integers and floats use their
    /// shortest round-trip decimal form; tokens are additionally lowercased;
    /// URI composites render as `scheme://path`. Blank text canonicalizes to
    /// the empty sentinel.
    pub fn canonical(&self) -> ExternalId {
        match self {
            Identifier::Text(s) => ExternalId(normalize(s)),
            Identifier::Integer(i) => ExternalId(i.to_string()),
            Identifier::Float(x) => ExternalId(format!("{x}")),
            Identifier::Token(t) => ExternalId(normalize(t).to_lowercase()),
            Identifier::Uri { scheme, path } => {
                ExternalId(format!("{}://{}", normalize(scheme), normalize(path)))
            }
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().nfc().collect()
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical().as_str())
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::Text(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier::Text(s)
    }
}

impl From<&String> for Identifier {
    fn from(s: &String) -> Self {
        Identifier::Text(s.clone())
    }
}

impl From<i64> for Identifier {
    fn from(i: i64) -> Self {
        Identifier::Integer(i)
    }
}

impl From<i32> for Identifier {
    fn from(i: i32) -> Self {
        Identifier::Integer(i64::from(i))
    }
}

impl From<u32> for Identifier {
    fn from(i: u32) -> Self {
        Identifier::Integer(i64::from(i))
    }
}

impl From<f64> for Identifier {
    fn from(x: f64) -> Self {
        Identifier::Float(x)
    }
}

impl From<ExternalId> for Identifier {
    fn from(id: ExternalId) -> Self {
        Identifier::Text(id.into_string())
    }
}

impl From<&ExternalId> for Identifier {
    fn from(id: &ExternalId) -> Self {
        Identifier::Text(id.as_str().to_string())
    }
}
