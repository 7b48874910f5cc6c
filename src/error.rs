//! Rich diagnostic error types for the warden engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Validation failures form
//! a closed set ([`AccessError`]); backend failures ([`StoreError`]) are fatal and
//! never silently degrade an authorization decision.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the warden engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum WardenError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Declaration(#[from] DeclError),
}

// ---------------------------------------------------------------------------
// Access errors (closed validation set)
// ---------------------------------------------------------------------------

/// Validation errors reported as data from every public operation.
///
/// This set is closed: anything outside it is a [`StoreError`] and treated as a
/// system-level failure.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum AccessError {
    #[error("an external id is required")]
    #[diagnostic(
        code(warden::access::id_is_required),
        help(
            "The external id was empty or whitespace-only after normalization. \
             Pass a non-blank identifier."
        )
    )]
    IdRequired,

    #[error("a description is required")]
    #[diagnostic(
        code(warden::access::description_is_required),
        help("Every registered entity carries a human-readable description. Pass a non-blank one.")
    )]
    DescriptionRequired,

    #[error("unknown subject: \"{id}\"")]
    #[diagnostic(
        code(warden::access::invalid_subject),
        help("Register the subject first with `register_subject`.")
    )]
    InvalidSubject { id: String },

    #[error("unknown object: \"{id}\"")]
    #[diagnostic(
        code(warden::access::invalid_object),
        help("Register the object first with `register_object`.")
    )]
    InvalidObject { id: String },

    #[error("unknown permission: \"{id}\"")]
    #[diagnostic(
        code(warden::access::invalid_permission),
        help("Register the permission first with `register_permission`.")
    )]
    InvalidPermission { id: String },

    #[error("unknown parent: \"{id}\"")]
    #[diagnostic(
        code(warden::access::invalid_parent),
        help("Both endpoints of an edge must be registered entities of the same kind.")
    )]
    InvalidParent { id: String },

    #[error("unknown child: \"{id}\"")]
    #[diagnostic(
        code(warden::access::invalid_child),
        help("Both endpoints of an edge must be registered entities of the same kind.")
    )]
    InvalidChild { id: String },

    #[error("edge \"{parent}\" -> \"{child}\" would create a cycle")]
    #[diagnostic(
        code(warden::access::cyclic_edge),
        help(
            "\"{child}\" is already an ancestor of \"{parent}\". Hierarchies are \
             acyclic; remove the opposing path first if this edge is intended."
        )
    )]
    CyclicEdge { parent: String, child: String },

    #[error("conflicting rule for (\"{subject}\", \"{object}\", \"{permission}\")")]
    #[diagnostic(
        code(warden::access::conflicting_rule_type),
        help(
            "A rule with the opposite sign already exists for this triple. \
             Remove it with `revoke` or `allow` before adding the new one."
        )
    )]
    ConflictingRuleType {
        subject: String,
        object: String,
        permission: String,
    },

    #[error("entity not found: \"{id}\"")]
    #[diagnostic(
        code(warden::access::not_found),
        help("No entity of the requested kind has this external id.")
    )]
    NotFound { id: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Failures of the storage backend. Always fatal to the calling operation.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(warden::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("storage backend error: {message}")]
    #[diagnostic(
        code(warden::store::backend),
        help(
            "The embedded database reported a transaction or table error. \
             This may indicate corruption; try a fresh data directory. \
             If the problem persists, file a bug report."
        )
    )]
    Backend { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(warden::store::serialization),
        help(
            "Failed to encode or decode a stored row. This usually means the \
             stored data format changed between versions."
        )
    )]
    Serialization { message: String },
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Declaration errors
// ---------------------------------------------------------------------------

/// Errors from parsing or loading a policy declaration.
#[derive(Debug, Error, Diagnostic)]
pub enum DeclError {
    #[error("failed to parse declarations: {message}")]
    #[diagnostic(
        code(warden::declare::parse),
        help("Check the TOML syntax of the policy file against the documented format.")
    )]
    Parse { message: String },

    #[error("failed to read declaration file: {path}")]
    #[diagnostic(code(warden::declare::io), help("Ensure the file exists and is readable."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for functions returning warden results.
pub type WardenResult<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_error_converts_to_warden_error() {
        let err = AccessError::InvalidSubject { id: "u1".into() };
        let top: WardenError = err.into();
        assert!(matches!(
            top,
            WardenError::Access(AccessError::InvalidSubject { .. })
        ));
    }

    #[test]
    fn store_error_converts_to_warden_error() {
        let err = StoreError::Serialization {
            message: "bad row".into(),
        };
        let top: WardenError = err.into();
        assert!(matches!(top, WardenError::Store(_)));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = AccessError::CyclicEdge {
            parent: "editors".into(),
            child: "staff".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("editors"));
        assert!(msg.contains("staff"));
        assert!(msg.contains("cycle"));
    }

    #[test]
    fn conflicting_rule_names_the_triple() {
        let err = AccessError::ConflictingRuleType {
            subject: "alice".into(),
            object: "doc".into(),
            permission: "edit".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("alice"));
        assert!(msg.contains("doc"));
        assert!(msg.contains("edit"));
    }
}
