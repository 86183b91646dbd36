//! Error types for type resolution, payload conversion, and the middleware
//! collaborator.

use std::path::PathBuf;

use airbridge_types::BridgeError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while resolving types or converting payloads.
///
/// `path` locates the offending field inside the payload (`pose.position.x`,
/// `points[2].y`).  It is empty at the top level.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error(
        "schema mismatch for {type_name} at {}: missing {missing:?}, unexpected {unexpected:?}",
        display_path(.path)
    )]
    SchemaMismatch {
        type_name: String,
        path: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("type {type_name} not found (at {})", display_path(.path))]
    TypeNotFound { type_name: String, path: String },

    #[error("type name `{0}` must have the form <package>/<kind>/<Type>")]
    TypeMalformed(String),

    #[error("invalid payload at {}: {reason}", display_path(.path))]
    InvalidPayload { path: String, reason: String },
}

impl CodecError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CodecError::InvalidPayload {
            path: String::new(),
            reason: reason.into(),
        }
    }

    /// Prefix the error path with the field it was raised under.
    pub fn within(self, field: &str) -> Self {
        self.map_path(|path| join_path(field, path))
    }

    /// Prefix the error path with a sequence index.
    pub fn at_index(self, index: usize) -> Self {
        self.map_path(|path| join_path(&format!("[{index}]"), path))
    }

    pub fn path(&self) -> &str {
        match self {
            CodecError::SchemaMismatch { path, .. }
            | CodecError::TypeNotFound { path, .. }
            | CodecError::InvalidPayload { path, .. } => path,
            CodecError::TypeMalformed(_) => "",
        }
    }

    fn map_path(self, f: impl FnOnce(&str) -> String) -> Self {
        match self {
            CodecError::SchemaMismatch {
                type_name,
                path,
                missing,
                unexpected,
            } => CodecError::SchemaMismatch {
                type_name,
                path: f(&path),
                missing,
                unexpected,
            },
            CodecError::TypeNotFound { type_name, path } => CodecError::TypeNotFound {
                type_name,
                path: f(&path),
            },
            CodecError::InvalidPayload { path, reason } => CodecError::InvalidPayload {
                path: f(&path),
                reason,
            },
            other @ CodecError::TypeMalformed(_) => other,
        }
    }
}

fn join_path(segment: &str, rest: &str) -> String {
    if rest.is_empty() {
        segment.to_string()
    } else if rest.starts_with('[') {
        format!("{segment}{rest}")
    } else {
        format!("{segment}.{rest}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        format!("`{path}`")
    }
}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        match &err {
            CodecError::SchemaMismatch { .. } => BridgeError::SchemaMismatch(err.to_string()),
            CodecError::TypeNotFound { .. } => BridgeError::TypeNotFound(err.to_string()),
            CodecError::TypeMalformed(_) => BridgeError::TypeMalformed(err.to_string()),
            CodecError::InvalidPayload { .. } => BridgeError::InvalidPayload(err.to_string()),
        }
    }
}

/// Errors reported by a [`MiddlewareClient`][crate::client::MiddlewareClient]
/// implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MiddlewareError {
    #[error("middleware transport error: {0}")]
    Transport(String),

    #[error("service {name} failed: {reason}")]
    ServiceFailed { name: String, reason: String },

    #[error("goal {0} was aborted")]
    GoalAborted(Uuid),

    #[error("goal {0} was canceled")]
    GoalCanceled(Uuid),

    #[error("unknown subscription handle {0}")]
    UnknownSubscription(u64),
}

impl From<MiddlewareError> for BridgeError {
    fn from(err: MiddlewareError) -> Self {
        BridgeError::Middleware(err.to_string())
    }
}

/// Errors raised while loading interface definitions.
#[derive(Error, Debug)]
pub enum IdlError {
    #[error("{type_name}, line {line}: {reason}")]
    Syntax {
        type_name: String,
        line: usize,
        reason: String,
    },

    #[error("{type_name}: expected {expected} section(s) separated by `---`, found {found}")]
    Sections {
        type_name: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Name(#[from] CodecError),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
