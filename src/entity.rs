//! Core entity types for the warden engine.
//!
//! Subjects, objects, and permissions share the same structural fields and
//! differ only in which hierarchy they live in. Every entity is identified by
//! an [`EntityId`] surrogate key and described by an [`EntityRecord`].

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique, niche-optimized surrogate key for an entity.
///
/// Uses `NonZeroU64` so that `Option<EntityId>` is the same size as `EntityId`
/// (the niche optimization lets the compiler use 0 as the `None` discriminant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    /// Create an `EntityId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(EntityId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ent:{}", self.0)
    }
}

/// Which of the three independent hierarchies an entity belongs to.
///
/// The three DAGs are deliberately separate: one external id may name both a
/// subject and an object with unrelated hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// An entity attempting an operation.
    Subject,
    /// An entity operated upon.
    Object,
    /// A named discrete capability.
    Permission,
}

impl EntityKind {
    /// All kinds, in storage-key order.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Subject,
        EntityKind::Object,
        EntityKind::Permission,
    ];

    /// Stable one-byte storage code.
    pub(crate) fn code(self) -> u8 {
        match self {
            EntityKind::Subject => 0,
            EntityKind::Object => 1,
            EntityKind::Permission => 2,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Subject => write!(f, "subject"),
            EntityKind::Object => write!(f, "object"),
            EntityKind::Permission => write!(f, "permission"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "subject" => Ok(EntityKind::Subject),
            "object" => Ok(EntityKind::Object),
            "permission" => Ok(EntityKind::Permission),
            other => Err(format!(
                "unknown entity kind \"{other}\" (expected subject, object, or permission)"
            )),
        }
    }
}

/// Which endpoint of a rule a listing query matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSide {
    /// Match rules whose subject is the given entity.
    Subject,
    /// Match rules whose object is the given entity.
    Object,
}

/// A persisted entity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Surrogate key, unique across all kinds.
    pub id: EntityId,
    /// Canonical external id, unique within the kind.
    pub ext_id: String,
    /// Human-readable label, non-empty.
    pub description: String,
    /// True if owned by the declaration reconciler, false if created at runtime.
    pub is_static: bool,
}

/// Sign of an access rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sign {
    /// Positive rule: permits the triple.
    Grant,
    /// Negative rule: vetoes the triple and everything it implies.
    Deny,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Grant => write!(f, "+"),
            Sign::Deny => write!(f, "-"),
        }
    }
}

/// Outcome of an authorization query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Granted,
    Denied,
}

impl Decision {
    /// Whether the decision permits the operation.
    pub fn is_granted(self) -> bool {
        matches!(self, Decision::Granted)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Granted => write!(f, "granted"),
            Decision::Denied => write!(f, "denied"),
        }
    }
}

/// An access rule as returned by listing queries, with external ids resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Rule {
    pub subject: String,
    pub object: String,
    pub permission: String,
    pub sign: Sign,
}

/// The stored payload of a rule row; the triple itself is the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RuleRow {
    pub sign: Sign,
    pub is_static: bool,
}
