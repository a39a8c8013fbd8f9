//! Error types for RevDB core.

use crate::types::Revision;
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in RevDB operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Operation invoked on a committed or aborted write transaction.
    #[error("transaction is closed")]
    TransactionClosed,

    /// Compare-and-swap against a primary key that holds no object.
    #[error("object not found")]
    ObjectNotFound,

    /// Optimistic-concurrency mismatch in compare-and-swap or
    /// compare-and-delete: the stored revision differs from the expected one.
    /// No mutation was performed. This is the payload-free form that
    /// [`CasError::RevisionNotEqual`] (which also carries the stored
    /// object) converts into.
    #[error("revision mismatch: expected {expected}, found {actual}")]
    RevisionNotEqual {
        /// Revision the caller expected.
        expected: Revision,
        /// Revision currently stored.
        actual: Revision,
    },

    /// A delete tracker with this name is already active on the table.
    #[error("delete tracker {name:?} already registered")]
    DuplicateTrackerName {
        /// The conflicting tracker name.
        name: String,
    },

    /// The table was not registered with the database, or not declared in
    /// the write transaction being used to mutate it.
    #[error("table {name:?} not registered")]
    TableNotRegistered {
        /// Name of the table.
        name: String,
    },

    /// The table handle is already bound to a database.
    #[error("table {name:?} already registered")]
    TableAlreadyRegistered {
        /// Name of the table.
        name: String,
    },

    /// The database has been stopped; no new transactions are admitted.
    #[error("database is stopped")]
    DatabaseStopped,

    /// An index name is declared more than once on a table.
    #[error("duplicate index {name:?}")]
    DuplicateIndexName {
        /// The conflicting index name.
        name: String,
    },

    /// A table schema is malformed (no indexes, non-unique primary, or a
    /// primary extractor yielding more or fewer than one key).
    #[error("invalid table schema: {message}")]
    InvalidSchema {
        /// Description of the schema problem.
        message: String,
    },

    /// Index key encoding failed.
    #[error("key encoding: {0}")]
    Key(#[from] revdb_key::KeyError),

    /// JSON serialization failed during a snapshot dump.
    #[error("snapshot serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    /// I/O error while writing a snapshot dump.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DbError {
    /// Creates an invalid-schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a table-not-registered error.
    pub fn table_not_registered(name: impl Into<String>) -> Self {
        Self::TableNotRegistered { name: name.into() }
    }

    /// Creates a duplicate-tracker-name error.
    pub fn duplicate_tracker(name: impl Into<String>) -> Self {
        Self::DuplicateTrackerName { name: name.into() }
    }

    /// Creates a duplicate-index-name error.
    pub fn duplicate_index(name: impl Into<String>) -> Self {
        Self::DuplicateIndexName { name: name.into() }
    }
}

/// Error returned by `Table::compare_and_swap` and
/// `Table::compare_and_delete`.
///
/// On a revision mismatch the compare failed against a live object; that
/// object is part of the verdict, so the error carries it and the caller
/// can inspect it and retry without another lookup. Converts into
/// [`DbError`] (dropping the object) for callers that funnel everything
/// into a [`DbResult`].
#[derive(Error)]
pub enum CasError<O> {
    /// The stored revision differs from the expected one. Nothing was
    /// mutated; `current` is the object presently stored under the primary
    /// key.
    #[error("revision mismatch: expected {expected}, found {actual}")]
    RevisionNotEqual {
        /// Revision the caller expected.
        expected: Revision,
        /// Revision currently stored.
        actual: Revision,
        /// The currently stored object.
        current: Arc<O>,
    },

    /// Compare-and-swap against a primary key that holds no object.
    #[error("object not found")]
    ObjectNotFound,

    /// Any other database error (closed transaction, key encoding).
    #[error(transparent)]
    Db(#[from] DbError),
}

impl<O> From<CasError<O>> for DbError {
    fn from(err: CasError<O>) -> Self {
        match err {
            CasError::RevisionNotEqual {
                expected, actual, ..
            } => DbError::RevisionNotEqual { expected, actual },
            CasError::ObjectNotFound => DbError::ObjectNotFound,
            CasError::Db(err) => err,
        }
    }
}

// Manual impl so the error stays usable for object types without `Debug`;
// the object itself is elided either way.
impl<O> fmt::Debug for CasError<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevisionNotEqual {
                expected, actual, ..
            } => f
                .debug_struct("RevisionNotEqual")
                .field("expected", expected)
                .field("actual", actual)
                .finish_non_exhaustive(),
            Self::ObjectNotFound => write!(f, "ObjectNotFound"),
            Self::Db(err) => f.debug_tuple("Db").field(err).finish(),
        }
    }
}
