//! Delete trackers.
//!
//! A delete tracker is a named observer of one table. It carries a *mark*:
//! the highest revision it has fully processed. [`DeleteTracker::iterate`]
//! delivers everything past the mark (live objects first, then graveyard
//! tombstones, each in revision order) and advances the mark on success.
//! While at least one tracker is registered, deletes leave tombstones in
//! the table's graveyard; the background GC discards a tombstone only once
//! every tracker's mark has passed its revision.

use crate::error::{DbError, DbResult};
use crate::table::{entry_object, revision_key, Table};
use crate::transaction::{Readable, WriteTxn};
use crate::types::Revision;
use parking_lot::RwLock;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Mark state shared between a tracker handle and its table registry.
pub(crate) struct TrackerShared {
    name: String,
    mark: AtomicU64,
}

impl TrackerShared {
    pub fn mark(&self) -> u64 {
        self.mark.load(Ordering::Acquire)
    }
}

/// The set of active trackers of one table.
///
/// Shared by every version of the table state: registration takes effect
/// immediately and marks advance outside of transactions.
pub(crate) struct TrackerRegistry {
    trackers: RwLock<Vec<Arc<TrackerShared>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            trackers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, name: &str) -> DbResult<Arc<TrackerShared>> {
        let mut trackers = self.trackers.write();
        if trackers.iter().any(|t| t.name == name) {
            return Err(DbError::duplicate_tracker(name));
        }
        let shared = Arc::new(TrackerShared {
            name: name.to_string(),
            mark: AtomicU64::new(0),
        });
        trackers.push(Arc::clone(&shared));
        Ok(shared)
    }

    pub fn deregister(&self, name: &str) {
        self.trackers.write().retain(|t| t.name != name);
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.trackers.read().len()
    }

    /// The lowest mark over all active trackers; `None` without trackers.
    ///
    /// Tombstones at or below this revision have been consumed by everyone
    /// and are safe to discard.
    pub fn min_mark(&self) -> Option<u64> {
        self.trackers.read().iter().map(|t| t.mark()).min()
    }
}

/// A registered observer of one table's inserts and deletes.
///
/// Created with [`Table::delete_tracker`]; stays registered until
/// [`close`](DeleteTracker::close) (or drop). While registered it pins
/// tombstones above its mark in the table's graveyard.
pub struct DeleteTracker<O> {
    table: Table<O>,
    shared: Arc<TrackerShared>,
    registry: Arc<TrackerRegistry>,
    closed: AtomicBool,
}

impl<O: Send + Sync + 'static> Table<O> {
    /// Registers a named delete tracker on this table.
    ///
    /// The table must be declared in the write transaction. Names are
    /// unique per table while the tracker lives.
    pub fn delete_tracker(&self, txn: &mut WriteTxn, name: &str) -> DbResult<DeleteTracker<O>> {
        let id = self.registered_id()?;
        let staging = txn.staging_mut(id, self.name())?;
        let registry = Arc::clone(&staging.state.trackers);
        let shared = registry.register(name)?;
        Ok(DeleteTracker {
            table: self.clone(),
            shared,
            registry,
            closed: AtomicBool::new(false),
        })
    }
}

impl<O: Send + Sync + 'static> DeleteTracker<O> {
    /// Returns the tracker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the highest revision this tracker has fully processed.
    #[must_use]
    pub fn mark_revision(&self) -> Revision {
        Revision::new(self.shared.mark())
    }

    /// Advances the mark to `revision` without iterating.
    ///
    /// The mark never moves backwards.
    pub fn mark(&self, revision: Revision) {
        self.shared
            .mark
            .fetch_max(revision.as_u64(), Ordering::AcqRel);
    }

    /// Delivers all live objects and then all tombstones with revision past
    /// the mark, in revision order, calling `f(object, deleted, revision)`.
    ///
    /// On return the mark has advanced past everything delivered.
    pub fn iterate<F>(&self, txn: &impl Readable, mut f: F)
    where
        F: FnMut(Arc<O>, bool, Revision),
    {
        let result: Result<(), Infallible> = self.iterate_with_error(txn, |object, deleted, rev| {
            f(object, deleted, rev);
            Ok(())
        });
        if let Err(err) = result {
            match err {}
        }
    }

    /// Like [`iterate`](DeleteTracker::iterate), but the callback may fail.
    ///
    /// On the first error the iteration stops and the error is returned
    /// verbatim. The mark advances only to just before the failing
    /// revision, so that item and everything after it are delivered again
    /// on the next call: processing is at-least-once with resumable
    /// progress.
    pub fn iterate_with_error<F, E>(&self, txn: &impl Readable, mut f: F) -> Result<(), E>
    where
        F: FnMut(Arc<O>, bool, Revision) -> Result<(), E>,
    {
        let state = {
            let id = self
                .table
                .registered_id()
                .unwrap_or_else(|_| panic!("tracker on unregistered table"));
            txn.table_state(id).unwrap_or_else(|| {
                panic!("table {:?} is not known to this transaction", self.table.name())
            })
        };

        let mark = self.shared.mark();
        let from = revision_key(Revision::new(mark + 1));
        let mut highest = mark;

        for (_, entry) in state.revisions.lower_bound(&from) {
            let revision = entry.revision;
            if let Err(err) = f(entry_object(entry), false, revision) {
                self.shared
                    .mark
                    .fetch_max(revision.as_u64() - 1, Ordering::AcqRel);
                return Err(err);
            }
            highest = revision.as_u64();
        }
        for (_, entry) in state.graveyard_revisions.lower_bound(&from) {
            let revision = entry.revision;
            if let Err(err) = f(entry_object(entry), true, revision) {
                self.shared
                    .mark
                    .fetch_max(revision.as_u64() - 1, Ordering::AcqRel);
                return Err(err);
            }
            highest = highest.max(revision.as_u64());
        }

        self.shared.mark.fetch_max(highest, Ordering::AcqRel);
        Ok(())
    }

    /// Deregisters the tracker, releasing its hold on the graveyard.
    ///
    /// Idempotent; also called on drop.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.registry.deregister(&self.shared.name);
        }
    }
}

impl<O> Drop for DeleteTracker<O> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.registry.deregister(&self.shared.name);
        }
    }
}

impl<O: Send + Sync + 'static> std::fmt::Debug for DeleteTracker<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteTracker")
            .field("table", &self.table.name())
            .field("name", &self.shared.name)
            .field("mark", &self.shared.mark())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::index::IndexSchema;
    use revdb_key::{Key, KeySet};

    #[derive(Debug, Clone, PartialEq, serde::Serialize)]
    struct Item {
        id: u64,
    }

    fn fixture() -> (Database, Table<Item>) {
        let table = Table::new(
            "items",
            IndexSchema::new("id", |item: &Item| KeySet::single(Key::from_u64(item.id))).unique(),
            [],
        )
        .unwrap();
        let db = Database::new();
        db.register_table(&table).unwrap();
        (db, table)
    }

    fn observed(tracker: &DeleteTracker<Item>, txn: &impl Readable) -> Vec<(u64, bool, u64)> {
        let mut seen = Vec::new();
        tracker.iterate(txn, |object, deleted, revision| {
            seen.push((object.id, deleted, revision.as_u64()));
        });
        seen
    }

    #[test]
    fn duplicate_name_rejected() {
        let (db, table) = fixture();
        let mut txn = db.write_txn(&[&table]).unwrap();
        let _t1 = table.delete_tracker(&mut txn, "sync").unwrap();
        assert!(matches!(
            table.delete_tracker(&mut txn, "sync"),
            Err(DbError::DuplicateTrackerName { .. })
        ));
        txn.commit();
    }

    #[test]
    fn close_frees_the_name() {
        let (db, table) = fixture();
        let mut txn = db.write_txn(&[&table]).unwrap();
        let t1 = table.delete_tracker(&mut txn, "sync").unwrap();
        t1.close();
        let _t2 = table.delete_tracker(&mut txn, "sync").unwrap();
        txn.commit();
    }

    #[test]
    fn iterate_delivers_live_then_deleted() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        let tracker = table.delete_tracker(&mut txn, "t").unwrap();
        table.insert(&mut txn, Item { id: 1 }).unwrap();
        table.insert(&mut txn, Item { id: 2 }).unwrap();
        table.delete(&mut txn, &Item { id: 1 }).unwrap();
        txn.commit();

        let read = db.read_txn().unwrap();
        // id=2 live at rev 2, id=1 tombstoned at rev 3.
        assert_eq!(observed(&tracker, &read), vec![(2, false, 2), (1, true, 3)]);
        assert_eq!(tracker.mark_revision(), Revision::new(3));

        // Fully caught up: nothing is delivered twice.
        assert_eq!(observed(&tracker, &read), vec![]);
    }

    #[test]
    fn error_resumes_at_failed_revision() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        let tracker = table.delete_tracker(&mut txn, "t").unwrap();
        for id in [1u64, 2, 3] {
            table.insert(&mut txn, Item { id }).unwrap();
        }
        txn.commit();

        let read = db.read_txn().unwrap();
        let mut seen = Vec::new();
        let result: Result<(), &str> = tracker.iterate_with_error(&read, |object, _, revision| {
            if revision.as_u64() >= 2 {
                return Err("flaky sink");
            }
            seen.push(object.id);
            Ok(())
        });
        assert_eq!(result, Err("flaky sink"));
        assert_eq!(seen, vec![1]);
        assert_eq!(tracker.mark_revision(), Revision::new(1));

        // The failed revision and everything after it are redelivered.
        assert_eq!(
            observed(&tracker, &read),
            vec![(2, false, 2), (3, false, 3)]
        );
    }

    #[test]
    fn manual_mark_skips_delivery() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        let tracker = table.delete_tracker(&mut txn, "t").unwrap();
        for id in [1u64, 2, 3] {
            table.insert(&mut txn, Item { id }).unwrap();
        }
        txn.commit();

        tracker.mark(Revision::new(2));
        let read = db.read_txn().unwrap();
        assert_eq!(observed(&tracker, &read), vec![(3, false, 3)]);

        // Marks do not regress.
        tracker.mark(Revision::new(1));
        assert_eq!(tracker.mark_revision(), Revision::new(3));
    }

    #[test]
    fn deletes_skip_graveyard_without_trackers() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        table.insert(&mut txn, Item { id: 1 }).unwrap();
        table.delete(&mut txn, &Item { id: 1 }).unwrap();
        txn.commit();

        let read = db.read_txn().unwrap();
        assert_eq!(table.num_deleted_objects(&read), 0);
        assert_eq!(table.revision(&read), Revision::new(2));
    }
}
