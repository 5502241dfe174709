//! Error types for material-strategy

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Group {group_code} not found: {reason}")]
    GroupNotFound { group_code: i64, reason: String },

    #[error("Material {material_code} not found: {reason}")]
    MaterialNotFound { material_code: i64, reason: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable classification of a [`StorageError`] for callers that branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    PreconditionFailed,
    ConflictViolation,
    InvalidInput,
    StoreFailure,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::GroupNotFound { .. } | StorageError::MaterialNotFound { .. } => ErrorKind::NotFound,
            StorageError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            StorageError::Conflict(_) => ErrorKind::ConflictViolation,
            StorageError::InvalidInput(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::StoreFailure,
        }
    }

    /// Map a rusqlite failure, classifying uniqueness/check violations as conflicts.
    ///
    /// `context` names the operation; the statement text is never included.
    pub fn from_sqlite(context: &str, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(format!("{}: {}", context, err))
            }
            _ => StorageError::Database(format!("{}: {}", context, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguishable() {
        let group = StorageError::GroupNotFound { group_code: 7, reason: "no members".into() };
        let material = StorageError::MaterialNotFound { material_code: 9, reason: "unknown".into() };
        assert_eq!(group.kind(), ErrorKind::NotFound);
        assert_eq!(material.kind(), ErrorKind::NotFound);
        assert_eq!(group.to_string(), "Group 7 not found: no members");
        assert_eq!(
            StorageError::PreconditionFailed("x".into()).kind(),
            ErrorKind::PreconditionFailed
        );
        assert_eq!(StorageError::Conflict("x".into()).kind(), ErrorKind::ConflictViolation);
        assert_eq!(StorageError::Database("x".into()).kind(), ErrorKind::StoreFailure);
        assert_eq!(StorageError::Internal("x".into()).kind(), ErrorKind::StoreFailure);
    }

    #[test]
    fn test_constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();

        let mapped = StorageError::from_sqlite("Insert failed", err);
        assert_eq!(mapped.kind(), ErrorKind::ConflictViolation);
        assert!(!mapped.to_string().contains("INSERT"));
    }
}
