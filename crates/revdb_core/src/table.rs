//! Typed tables and their operations.
//!
//! A [`Table`] is a cheaply cloneable handle describing a table's schema:
//! its name and its indexes, the first of which is the primary index. The
//! table's *data* lives in the database root map as a [`TableState`] and is
//! only reachable through transactions; the handle itself holds no objects.
//!
//! Objects are stored behind `Arc` and type-erased so that tables of
//! different object types can share one root map. The typed handle is the
//! only way entries are written, so downcasting on the read path cannot
//! fail for well-formed states.

use crate::error::{CasError, DbError, DbResult};
use crate::index::{IndexSchema, Query, QueryTarget};
use crate::tracker::TrackerRegistry;
use crate::transaction::{Readable, WriteTxn};
use crate::tree::{Iter as TreeIter, RadixTree};
use crate::types::{Revision, TableId};
use crate::watch::WatchSignal;
use revdb_key::{encode_composite, Key};
use std::any::Any;
use std::sync::{Arc, OnceLock};

/// One stored version of an object: the object itself (type-erased) and the
/// revision assigned when it was written.
#[derive(Clone)]
pub(crate) struct Entry {
    pub object: Arc<dyn Any + Send + Sync>,
    pub revision: Revision,
}

/// Recovers the typed object from an erased entry.
pub(crate) fn entry_object<O: Send + Sync + 'static>(entry: &Entry) -> Arc<O> {
    Arc::clone(&entry.object)
        .downcast::<O>()
        .unwrap_or_else(|_| panic!("object type mismatch in table entry"))
}

/// Encodes a revision as a tree key (8-byte big-endian).
pub(crate) fn revision_key(revision: Revision) -> [u8; 8] {
    revision.as_u64().to_be_bytes()
}

/// The committed (or staged) data of one table.
///
/// All trees are persistent, so cloning a `TableState` is a handful of
/// pointer copies; a write transaction's staging area starts as exactly
/// such a clone.
#[derive(Clone)]
pub(crate) struct TableState {
    /// One tree per declared index; position 0 is the primary index.
    /// Non-unique indexes store composite-encoded keys.
    pub indexes: Vec<RadixTree<Entry>>,
    /// Live objects keyed by big-endian revision.
    pub revisions: RadixTree<Entry>,
    /// Tombstones keyed by primary key, for supersession on re-insert.
    pub graveyard: RadixTree<Entry>,
    /// Tombstones keyed by big-endian delete revision, for tracker
    /// iteration and GC in revision order.
    pub graveyard_revisions: RadixTree<Entry>,
    /// Latest assigned revision.
    pub revision: Revision,
    /// Active delete trackers. Shared across state versions: tracker
    /// registration is not versioned, marks advance outside transactions.
    pub trackers: Arc<TrackerRegistry>,
}

impl TableState {
    /// Creates the empty state for a table with `num_indexes` indexes.
    pub fn empty(num_indexes: usize) -> Self {
        Self {
            indexes: (0..num_indexes).map(|_| RadixTree::new()).collect(),
            revisions: RadixTree::new(),
            graveyard: RadixTree::new(),
            graveyard_revisions: RadixTree::new(),
            revision: Revision::ZERO,
            trackers: Arc::new(TrackerRegistry::new()),
        }
    }
}

/// Schema shared by all clones of a table handle.
pub(crate) struct TableSchema<O> {
    pub name: String,
    pub indexes: Vec<IndexSchema<O>>,
    pub id: OnceLock<TableId>,
}

/// A typed table handle.
///
/// Created with [`Table::new`], bound to a database with
/// `Database::register_table`, and used through transactions afterwards.
/// Cloning the handle is cheap and all clones refer to the same table.
///
/// ```rust,ignore
/// let items: Table<Item> = Table::new(
///     "items",
///     IndexSchema::new("id", |i: &Item| KeySet::single(Key::from_u64(i.id))).unique(),
///     [IndexSchema::new("tags", |i: &Item| i.tags.iter().map(Key::from).collect())],
/// )?;
/// db.register_table(&items)?;
/// ```
pub struct Table<O> {
    pub(crate) schema: Arc<TableSchema<O>>,
}

impl<O> Clone for Table<O> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
        }
    }
}

impl<O: Send + Sync + 'static> std::fmt::Debug for Table<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("name", &self.name()).finish()
    }
}

impl<O: Send + Sync + 'static> Table<O> {
    /// Creates a table schema from a primary index and any number of
    /// secondary indexes.
    ///
    /// The primary index must be declared unique and its extractor must
    /// yield exactly one key per object. Index names must be distinct.
    pub fn new(
        name: impl Into<String>,
        primary: IndexSchema<O>,
        secondary: impl IntoIterator<Item = IndexSchema<O>>,
    ) -> DbResult<Self> {
        let name = name.into();
        if !primary.is_unique() {
            return Err(DbError::invalid_schema(format!(
                "primary index {:?} of table {:?} must be unique",
                primary.name(),
                name
            )));
        }

        let mut indexes = vec![primary];
        indexes.extend(secondary);
        for (i, index) in indexes.iter().enumerate() {
            if indexes[..i].iter().any(|other| other.name() == index.name()) {
                return Err(DbError::duplicate_index(index.name()));
            }
        }

        Ok(Self {
            schema: Arc::new(TableSchema {
                name,
                indexes,
                id: OnceLock::new(),
            }),
        })
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Returns the table's ID, or an error if the table has not been
    /// registered with a database.
    pub(crate) fn registered_id(&self) -> DbResult<TableId> {
        self.schema
            .id
            .get()
            .copied()
            .ok_or_else(|| DbError::table_not_registered(self.name()))
    }

    /// Computes the primary key of an object.
    fn primary_key(&self, object: &O) -> DbResult<Key> {
        self.schema.indexes[0]
            .keys_of(object)
            .into_single()
            .ok_or_else(|| {
                DbError::invalid_schema(format!(
                    "primary index {:?} of table {:?} must yield exactly one key",
                    self.schema.indexes[0].name(),
                    self.name()
                ))
            })
    }

    /// Fetches the table's state from a transaction snapshot.
    ///
    /// Panics if the table is not registered with the transaction's
    /// database; that is a programming error, not a runtime condition.
    fn state<'a>(&self, txn: &'a impl Readable) -> &'a TableState {
        let id = self.schema.id.get().copied().unwrap_or_else(|| {
            panic!("table {:?} is not registered with a database", self.name())
        });
        txn.table_state(id).unwrap_or_else(|| {
            panic!("table {:?} is not known to this transaction", self.name())
        })
    }

    /// Resolves a query to a tree of this table.
    ///
    /// Panics on an index name that is not declared on the table.
    fn resolve(&self, query: &Query) -> Resolved {
        match &query.target {
            QueryTarget::Revision => Resolved::Revision,
            QueryTarget::Index(name) => {
                let pos = self
                    .schema
                    .indexes
                    .iter()
                    .position(|index| index.name() == name)
                    .unwrap_or_else(|| {
                        panic!("table {:?} has no index {:?}", self.name(), name)
                    });
                if self.schema.indexes[pos].is_unique() {
                    Resolved::Unique(pos)
                } else {
                    Resolved::NonUnique(pos)
                }
            }
        }
    }

    // === Write operations ===

    /// Inserts an object, replacing any object with the same primary key.
    ///
    /// Returns the replaced object, if any. A fresh revision is assigned
    /// either way.
    pub fn insert(&self, txn: &mut WriteTxn, object: O) -> DbResult<Option<Arc<O>>> {
        let object = Arc::new(object);
        let primary = self.primary_key(&object)?;

        let id = self.registered_id()?;
        let staging = txn.staging_mut(id, self.name())?;
        let state = &mut staging.state;
        let touched = &mut staging.touched;

        let new_revision = state.revision.next();
        state.revision = new_revision;
        let entry = Entry {
            object: object.clone(),
            revision: new_revision,
        };

        let (tree, old_entry) = state.indexes[0].insert(primary.as_bytes(), entry.clone(), touched);
        state.indexes[0] = tree;
        let old_object = old_entry.as_ref().map(entry_object::<O>);

        // The by-revision tree tracks only the latest version of an object.
        if let Some(old) = &old_entry {
            let (tree, _) = state.revisions.delete(&revision_key(old.revision), touched);
            state.revisions = tree;
        }
        let (tree, _) = state
            .revisions
            .insert(&revision_key(new_revision), entry.clone(), touched);
        state.revisions = tree;

        // An insert supersedes a pending tombstone for the same primary key.
        let (tree, tombstone) = state.graveyard.delete(primary.as_bytes(), touched);
        state.graveyard = tree;
        if let Some(tombstone) = tombstone {
            let (tree, _) = state
                .graveyard_revisions
                .delete(&revision_key(tombstone.revision), touched);
            state.graveyard_revisions = tree;
        }

        for (pos, index) in self.schema.indexes.iter().enumerate().skip(1) {
            let new_keys = index.keys_of(&object);
            if let Some(old) = &old_object {
                for key in index.keys_of(old).iter() {
                    if new_keys.contains(key) {
                        continue;
                    }
                    let encoded = encode_secondary(index, key, &primary)?;
                    let (tree, _) = state.indexes[pos].delete(encoded.as_bytes(), touched);
                    state.indexes[pos] = tree;
                }
            }
            for key in new_keys.iter() {
                let encoded = encode_secondary(index, key, &primary)?;
                let (tree, _) = state.indexes[pos].insert(encoded.as_bytes(), entry.clone(), touched);
                state.indexes[pos] = tree;
            }
        }

        Ok(old_object)
    }

    /// Deletes the object with the same primary key as `object`.
    ///
    /// Returns the deleted object, or `None` if the primary key held
    /// nothing (in which case no revision is consumed).
    pub fn delete(&self, txn: &mut WriteTxn, object: &O) -> DbResult<Option<Arc<O>>> {
        let primary = self.primary_key(object)?;
        self.delete_by_primary(txn, &primary)
    }

    fn delete_by_primary(&self, txn: &mut WriteTxn, primary: &Key) -> DbResult<Option<Arc<O>>> {
        let id = self.registered_id()?;
        let staging = txn.staging_mut(id, self.name())?;
        let state = &mut staging.state;
        let touched = &mut staging.touched;

        let (tree, old_entry) = state.indexes[0].delete(primary.as_bytes(), touched);
        let Some(old_entry) = old_entry else {
            return Ok(None);
        };
        state.indexes[0] = tree;
        let old_object = entry_object::<O>(&old_entry);

        let new_revision = state.revision.next();
        state.revision = new_revision;

        let (tree, _) = state.revisions.delete(&revision_key(old_entry.revision), touched);
        state.revisions = tree;

        for (pos, index) in self.schema.indexes.iter().enumerate().skip(1) {
            for key in index.keys_of(&old_object).iter() {
                let encoded = encode_secondary(index, key, primary)?;
                let (tree, _) = state.indexes[pos].delete(encoded.as_bytes(), touched);
                state.indexes[pos] = tree;
            }
        }

        // Tombstones are only worth keeping when someone will consume them.
        if !state.trackers.is_empty() {
            let tombstone = Entry {
                object: Arc::clone(&old_entry.object),
                revision: new_revision,
            };
            let (tree, _) = state
                .graveyard
                .insert(primary.as_bytes(), tombstone.clone(), touched);
            state.graveyard = tree;
            let (tree, _) = state
                .graveyard_revisions
                .insert(&revision_key(new_revision), tombstone, touched);
            state.graveyard_revisions = tree;
        }

        Ok(Some(old_object))
    }

    /// Inserts `object` only if the stored object's revision equals
    /// `expected`.
    ///
    /// Fails with [`CasError::ObjectNotFound`] if the primary key holds
    /// nothing, or [`CasError::RevisionNotEqual`] on a revision mismatch;
    /// in both cases nothing is mutated, and the mismatch error carries the
    /// currently stored object.
    pub fn compare_and_swap(
        &self,
        txn: &mut WriteTxn,
        expected: Revision,
        object: O,
    ) -> Result<Option<Arc<O>>, CasError<O>> {
        let primary = self.primary_key(&object)?;
        let id = self.registered_id()?;
        {
            let staging = txn.staging_mut(id, self.name())?;
            match staging.state.indexes[0].get(primary.as_bytes()) {
                None => return Err(CasError::ObjectNotFound),
                Some(entry) if entry.revision != expected => {
                    return Err(CasError::RevisionNotEqual {
                        expected,
                        actual: entry.revision,
                        current: entry_object::<O>(entry),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(self.insert(txn, object)?)
    }

    /// Deletes the object only if its stored revision equals `expected`.
    ///
    /// A missing primary key is not an error: `Ok(None)` is returned and
    /// nothing is mutated. A revision mismatch fails with
    /// [`CasError::RevisionNotEqual`] carrying the currently stored object.
    pub fn compare_and_delete(
        &self,
        txn: &mut WriteTxn,
        expected: Revision,
        object: &O,
    ) -> Result<Option<Arc<O>>, CasError<O>> {
        let primary = self.primary_key(object)?;
        let id = self.registered_id()?;
        {
            let staging = txn.staging_mut(id, self.name())?;
            match staging.state.indexes[0].get(primary.as_bytes()) {
                None => return Ok(None),
                Some(entry) if entry.revision != expected => {
                    return Err(CasError::RevisionNotEqual {
                        expected,
                        actual: entry.revision,
                        current: entry_object::<O>(entry),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(self.delete_by_primary(txn, &primary)?)
    }

    /// Deletes every object in the table.
    pub fn delete_all(&self, txn: &mut WriteTxn) -> DbResult<()> {
        let id = self.registered_id()?;
        let primaries: Vec<Key> = {
            let staging = txn.staging_mut(id, self.name())?;
            staging.state.indexes[0]
                .iter()
                .map(|(key, _)| Key::from_bytes(key.to_vec()))
                .collect()
        };
        for primary in primaries {
            self.delete_by_primary(txn, &primary)?;
        }
        Ok(())
    }

    // === Read operations ===

    /// Returns the first object matching the query, with its revision.
    #[must_use]
    pub fn first(&self, txn: &impl Readable, query: &Query) -> Option<(Arc<O>, Revision)> {
        self.first_watch(txn, query).0
    }

    /// Like [`first`](Table::first), also returning the watch signal
    /// covering the query.
    pub fn first_watch(
        &self,
        txn: &impl Readable,
        query: &Query,
    ) -> (Option<(Arc<O>, Revision)>, WatchSignal) {
        let (mut iter, watch) = self.query_iter(txn, query, false);
        (iter.next(), watch)
    }

    /// Returns the last object matching the query, with its revision.
    #[must_use]
    pub fn last(&self, txn: &impl Readable, query: &Query) -> Option<(Arc<O>, Revision)> {
        self.last_watch(txn, query).0
    }

    /// Like [`last`](Table::last), also returning the watch signal covering
    /// the query.
    pub fn last_watch(
        &self,
        txn: &impl Readable,
        query: &Query,
    ) -> (Option<(Arc<O>, Revision)>, WatchSignal) {
        let (iter, watch) = self.query_iter(txn, query, false);
        (iter.last(), watch)
    }

    /// Returns an iterator over all objects matching the query, plus the
    /// watch signal covering it.
    ///
    /// On a unique index this yields at most one object; on a non-unique
    /// index, all objects holding exactly the queried key.
    pub fn get<'a>(
        &self,
        txn: &'a impl Readable,
        query: &Query,
    ) -> (ObjectIter<'a, O>, WatchSignal) {
        self.query_iter(txn, query, false)
    }

    /// Returns an iterator over all objects with index key ≥ the query key,
    /// in index order, plus the watch signal covering it.
    pub fn lower_bound<'a>(
        &self,
        txn: &'a impl Readable,
        query: &Query,
    ) -> (ObjectIter<'a, O>, WatchSignal) {
        self.query_iter(txn, query, true)
    }

    /// Returns an iterator over all objects in revision (insertion-age)
    /// order, plus the watch signal covering the whole table.
    pub fn all<'a>(&self, txn: &'a impl Readable) -> (ObjectIter<'a, O>, WatchSignal) {
        let state = self.state(txn);
        (
            ObjectIter::direct(state.revisions.iter()),
            state.revisions.root_watch(),
        )
    }

    /// Returns the latest revision assigned on this table.
    ///
    /// Inside a write transaction this includes revisions staged by the
    /// transaction itself.
    #[must_use]
    pub fn revision(&self, txn: &impl Readable) -> Revision {
        self.state(txn).revision
    }

    /// Returns the number of live objects.
    #[must_use]
    pub fn num_objects(&self, txn: &impl Readable) -> usize {
        self.state(txn).indexes[0].len()
    }

    /// Returns the number of tombstones awaiting tracker consumption.
    #[must_use]
    pub fn num_deleted_objects(&self, txn: &impl Readable) -> usize {
        self.state(txn).graveyard_revisions.len()
    }

    /// Builds the iterator and watch signal for a query.
    fn query_iter<'a>(
        &self,
        txn: &'a impl Readable,
        query: &Query,
        lower_bound: bool,
    ) -> (ObjectIter<'a, O>, WatchSignal) {
        let state = self.state(txn);
        match self.resolve(query) {
            // A by-revision query is always a lower bound: "everything at or
            // after this revision", which is what incremental scans want.
            Resolved::Revision => (
                ObjectIter::direct(state.revisions.lower_bound(query.key.as_bytes())),
                state.revisions.root_watch(),
            ),
            Resolved::Unique(pos) => {
                if lower_bound {
                    let iter = state.indexes[pos].lower_bound(query.key.as_bytes());
                    (ObjectIter::direct(iter), state.indexes[pos].root_watch())
                } else {
                    let (entry, watch) = state.indexes[pos].get_watch(query.key.as_bytes());
                    (
                        ObjectIter::once(entry.map(|e| (entry_object(e), e.revision))),
                        watch,
                    )
                }
            }
            Resolved::NonUnique(pos) => {
                if lower_bound {
                    let iter = state.indexes[pos].lower_bound(query.key.as_bytes());
                    (
                        ObjectIter::non_unique(iter, &state.indexes[0], None),
                        state.indexes[pos].root_watch(),
                    )
                } else {
                    let watch = state.indexes[pos].prefix_watch(query.key.as_bytes());
                    let iter = state.indexes[pos].prefix(query.key.as_bytes());
                    (
                        ObjectIter::non_unique(iter, &state.indexes[0], Some(query.key.clone())),
                        watch,
                    )
                }
            }
        }
    }
}

/// Resolution of a [`Query`] against a table schema.
enum Resolved {
    Revision,
    Unique(usize),
    NonUnique(usize),
}

/// Encodes a secondary index key for storage.
///
/// Unique secondaries store the key as-is; non-unique ones use the
/// composite encoding so distinct objects with equal keys coexist.
fn encode_secondary<O>(index: &IndexSchema<O>, key: &Key, primary: &Key) -> DbResult<Key> {
    if index.is_unique() {
        Ok(key.clone())
    } else {
        Ok(encode_composite(key, primary)?)
    }
}

/// Iterator over query results, yielding `(object, revision)` pairs.
///
/// Lazy and bound to the transaction snapshot it was created from; commits
/// that happen mid-iteration are not observed.
pub struct ObjectIter<'a, O> {
    kind: IterKind<'a, O>,
}

enum IterKind<'a, O> {
    /// At most one pre-resolved match (unique-index get).
    Once(Option<(Arc<O>, Revision)>),
    /// Entries yield their object directly (primary, unique, revision trees).
    Direct(TreeIter<'a, Entry>),
    /// Composite-keyed entries: decode the primary key and fetch the live
    /// object from the primary tree. `filter` restricts matches to an exact
    /// secondary key (a prefix scan may overshoot onto longer keys).
    NonUnique {
        iter: TreeIter<'a, Entry>,
        primary: &'a RadixTree<Entry>,
        filter: Option<Key>,
    },
}

impl<'a, O: Send + Sync + 'static> ObjectIter<'a, O> {
    fn direct(iter: TreeIter<'a, Entry>) -> Self {
        Self {
            kind: IterKind::Direct(iter),
        }
    }

    fn once(item: Option<(Arc<O>, Revision)>) -> Self {
        Self {
            kind: IterKind::Once(item),
        }
    }

    fn non_unique(
        iter: TreeIter<'a, Entry>,
        primary: &'a RadixTree<Entry>,
        filter: Option<Key>,
    ) -> Self {
        Self {
            kind: IterKind::NonUnique {
                iter,
                primary,
                filter,
            },
        }
    }
}

impl<'a, O: Send + Sync + 'static> Iterator for ObjectIter<'a, O> {
    type Item = (Arc<O>, Revision);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.kind {
            IterKind::Once(item) => item.take(),
            IterKind::Direct(iter) => {
                let (_, entry) = iter.next()?;
                Some((entry_object(entry), entry.revision))
            }
            IterKind::NonUnique {
                iter,
                primary,
                filter,
            } => loop {
                let (key, _) = iter.next()?;
                let Ok((secondary, primary_key)) = revdb_key::decode_composite(key) else {
                    continue;
                };
                if let Some(filter) = filter.as_ref() {
                    if secondary != *filter {
                        continue;
                    }
                }
                let Some(entry) = primary.get(primary_key.as_bytes()) else {
                    continue;
                };
                return Some((entry_object(entry), entry.revision));
            },
        }
    }
}
