//! Index definitions and queries.
//!
//! An index is a named extractor that turns an object into a set of
//! [`Key`]s. The first index declared on a table is the **primary index**:
//! always unique, always yielding exactly one key, and defining object
//! identity. Further indexes are secondary and may be unique or
//! multi-valued.

use crate::types::Revision;
use revdb_key::{Key, KeySet};
use std::fmt;
use std::sync::Arc;

/// A named index over objects of type `O`.
///
/// Built with [`IndexSchema::new`] and marked unique via
/// [`unique`](IndexSchema::unique):
///
/// ```rust,ignore
/// let by_id = IndexSchema::new("id", |o: &Item| KeySet::single(Key::from_u64(o.id))).unique();
/// let by_tag = IndexSchema::new("tags", |o: &Item| {
///     o.tags.iter().map(Key::from).collect()
/// });
/// ```
pub struct IndexSchema<O> {
    name: String,
    unique: bool,
    extract: Arc<dyn Fn(&O) -> KeySet + Send + Sync>,
}

impl<O> IndexSchema<O> {
    /// Creates a non-unique index with the given name and key extractor.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&O) -> KeySet + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            unique: false,
            extract: Arc::new(extract),
        }
    }

    /// Marks this index as unique: at most one object per key.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the index enforces one object per key.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Extracts the key set of an object.
    #[must_use]
    pub fn keys_of(&self, object: &O) -> KeySet {
        (self.extract)(object)
    }
}

impl<O> Clone for IndexSchema<O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            unique: self.unique,
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<O> fmt::Debug for IndexSchema<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSchema")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish()
    }
}

/// Which index a query targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueryTarget {
    /// A named index declared on the table.
    Index(String),
    /// The internal by-revision tree.
    Revision,
}

/// A query against one index of a table.
///
/// Built with [`Query::index`] for declared indexes or
/// [`Query::by_revision`] for incremental scans over the revision tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub(crate) target: QueryTarget,
    pub(crate) key: Key,
}

impl Query {
    /// Queries a named index for a key.
    #[must_use]
    pub fn index(name: impl Into<String>, key: impl Into<Key>) -> Self {
        Self {
            target: QueryTarget::Index(name.into()),
            key: key.into(),
        }
    }

    /// Queries the revision tree starting at `revision`.
    ///
    /// Combined with a lower-bound scan this yields all objects with
    /// revision ≥ `revision` in ascending (insertion-age) order.
    #[must_use]
    pub fn by_revision(revision: Revision) -> Self {
        Self {
            target: QueryTarget::Revision,
            key: Key::from_u64(revision.as_u64()),
        }
    }
}
