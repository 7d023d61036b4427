use std::io;

use thiserror::Error;

/// Errors returned by storage operations.
///
/// Of these, only [BadIndexes](StoreError::BadIndexes) is repairable; callers
/// receiving it are expected to invoke a rebuild explicitly.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The structure file was written by an incompatible engine version
    #[error("structure file version {found} is not supported (expected {expected})")]
    BackwardIncompatibility { found: u8, expected: u8 },
    /// A record marker, offset or counter is structurally invalid
    #[error("bad indexes: {0}")]
    BadIndexes(String),
    /// A file is not in the expected format
    #[error("format error: {0}")]
    Format(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no such table `{0}`")]
    NoSuchTable(String),
    #[error("no such column `{0}`")]
    NoSuchColumn(String),
    #[error("no such index `{0}`")]
    NoSuchIndex(String),
    #[error("duplicate name `{0}`")]
    DuplicateName(String),
    /// A value of the wrong type was assigned to a column
    #[error("column `{column}` expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A non-nullable column was left unset at commit
    #[error("column `{0}` is not nullable and has no value")]
    MissingValue(String),
    /// The record handle refers to a slot that has since been freed or moved
    #[error("record {0} refers to a stale slot")]
    StaleRecord(u32),
    #[error("structure is not loaded")]
    NotLoaded,
}

impl StoreError {
    pub(crate) fn bad_indexes(msg: impl Into<String>) -> Self {
        Self::BadIndexes(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Returns whether the error signals on-disk corruption that a rebuild may repair
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::BadIndexes(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_bad_indexes_is_corruption() {
        assert!(StoreError::bad_indexes("marker").is_corruption());
        assert!(!StoreError::format("magic").is_corruption());
        assert!(!StoreError::BackwardIncompatibility {
            found: 9,
            expected: 1
        }
        .is_corruption());
    }

    #[test]
    fn display_names_versions() {
        let err = StoreError::BackwardIncompatibility {
            found: 9,
            expected: 1,
        };
        assert_eq!(
            err.to_string(),
            "structure file version 9 is not supported (expected 1)"
        );
    }
}
