//! Read and write transactions.
//!
//! A [`ReadTxn`] is a shallow snapshot of the database root map: taking one
//! is lock-free, it never blocks writers, and it cannot be committed or
//! aborted. Arbitrarily many may coexist.
//!
//! A [`WriteTxn`] declares up front which tables it will write. It holds
//! those tables' mutexes for its lifetime and mutates only its staging
//! area; `commit` atomically publishes the staged states and closes the
//! watch signals of every replaced tree node, `abort` discards everything.
//! A dropped transaction aborts.

use crate::database::{DbInner, RootMap};
use crate::error::{DbError, DbResult};
use crate::table::TableState;
use crate::types::TableId;
use crate::watch::WatchSet;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Snapshot access shared by read and write transactions.
///
/// This trait is sealed: the only readable transactions are the ones this
/// crate provides.
pub trait Readable: sealed::StateAccess {}

pub(crate) mod sealed {
    use super::*;

    /// Internal snapshot lookup. Not part of the public API.
    pub trait StateAccess {
        fn table_state(&self, id: TableId) -> Option<&TableState>;
    }
}

/// A read-only snapshot of the database.
///
/// The snapshot is consistent across all tables at the instant of
/// acquisition and is never invalidated: iteration remains valid while
/// writers commit new roots alongside it.
pub struct ReadTxn {
    pub(crate) root: Arc<RootMap>,
}

impl sealed::StateAccess for ReadTxn {
    fn table_state(&self, id: TableId) -> Option<&TableState> {
        self.root.get(&id)
    }
}

impl Readable for ReadTxn {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// Per-table working set of a write transaction.
pub(crate) struct TableStaging {
    pub name: String,
    pub state: TableState,
    pub touched: WatchSet,
}

/// An exclusive write transaction over a declared set of tables.
///
/// Created with `Database::write_txn`. Reads through a write transaction
/// observe the transaction's own staged writes for declared tables and the
/// commit-time snapshot for all others.
pub struct WriteTxn {
    db: Arc<DbInner>,
    base: Arc<RootMap>,
    staged: BTreeMap<TableId, TableStaging>,
    names: Vec<String>,
    guards: Vec<ArcMutexGuard<RawMutex, ()>>,
    state: TxnState,
    acquired_at: Instant,
}

impl WriteTxn {
    pub(crate) fn new(
        db: Arc<DbInner>,
        base: Arc<RootMap>,
        staged: BTreeMap<TableId, TableStaging>,
        guards: Vec<ArcMutexGuard<RawMutex, ()>>,
    ) -> Self {
        let names = staged.values().map(|s| s.name.clone()).collect();
        Self {
            db,
            base,
            staged,
            names,
            guards,
            state: TxnState::Active,
            acquired_at: Instant::now(),
        }
    }

    /// Returns the staging area for a declared table.
    pub(crate) fn staging_mut(&mut self, id: TableId, name: &str) -> DbResult<&mut TableStaging> {
        if self.state != TxnState::Active {
            return Err(DbError::TransactionClosed);
        }
        self.staged
            .get_mut(&id)
            .ok_or_else(|| DbError::table_not_registered(name))
    }

    /// Returns true if the transaction can still be used.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Commits the transaction: atomically replaces the root-map pointers
    /// of every declared table, then closes the watch signals of all tree
    /// nodes replaced by this transaction, then releases the table locks.
    ///
    /// Committing a closed transaction is a no-op.
    pub fn commit(&mut self) {
        if self.state != TxnState::Active {
            return;
        }
        self.state = TxnState::Committed;

        let mut to_close = WatchSet::new();
        {
            let mut root = self.db.root.write();
            let mut next = (**root).clone();
            for (id, staging) in std::mem::take(&mut self.staged) {
                let metrics = &self.db.metrics;
                metrics.set_revision(&staging.name, staging.state.revision.as_u64());
                metrics.set_object_count(&staging.name, staging.state.indexes[0].len() as u64);
                metrics.set_graveyard_object_count(
                    &staging.name,
                    staging.state.graveyard_revisions.len() as u64,
                );
                metrics.set_delete_tracker_count(&staging.name, staging.state.trackers.len() as u64);
                to_close.merge(staging.touched);
                next.insert(id, staging.state);
            }
            *root = Arc::new(next);
        }
        // Readers of the new root may observe signals in any close order;
        // each close only means "something in your subtree changed".
        to_close.close_all();
        self.guards.clear();

        self.db
            .metrics
            .observe_write_txn_duration(&self.names, self.acquired_at.elapsed());
    }

    /// Aborts the transaction, discarding the staging area and releasing
    /// the table locks. No observable state changes.
    ///
    /// Aborting a closed transaction is a no-op.
    pub fn abort(&mut self) {
        if self.state != TxnState::Active {
            return;
        }
        self.state = TxnState::Aborted;
        self.staged.clear();
        self.guards.clear();
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        // A transaction neither committed nor aborted discards its work.
        self.abort();
    }
}

impl sealed::StateAccess for WriteTxn {
    fn table_state(&self, id: TableId) -> Option<&TableState> {
        if self.state != TxnState::Active {
            panic!("read through a closed write transaction");
        }
        match self.staged.get(&id) {
            Some(staging) => Some(&staging.state),
            None => self.base.get(&id),
        }
    }
}

impl Readable for WriteTxn {}

impl std::fmt::Debug for WriteTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("tables", &self.names)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::error::DbError;
    use crate::index::{IndexSchema, Query};
    use crate::table::Table;
    use crate::types::Revision;
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

    #[test]
    fn commit_publishes_atomically() {
        let (db, table) = fixture();

        let reader_before = db.read_txn().unwrap();
        let mut txn = db.write_txn(&[&table]).unwrap();
        table.insert(&mut txn, Item { id: 1 }).unwrap();

        // Not yet visible to an old snapshot nor to a fresh one.
        assert_eq!(table.num_objects(&reader_before), 0);
        assert_eq!(table.num_objects(&db.read_txn().unwrap()), 0);

        txn.commit();
        assert_eq!(table.num_objects(&reader_before), 0);
        assert_eq!(table.num_objects(&db.read_txn().unwrap()), 1);
    }

    #[test]
    fn abort_discards_everything() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        table.insert(&mut txn, Item { id: 1 }).unwrap();
        txn.abort();

        let reader = db.read_txn().unwrap();
        assert_eq!(table.num_objects(&reader), 0);
        assert_eq!(table.revision(&reader), Revision::ZERO);
    }

    #[test]
    fn drop_aborts() {
        let (db, table) = fixture();
        {
            let mut txn = db.write_txn(&[&table]).unwrap();
            table.insert(&mut txn, Item { id: 1 }).unwrap();
        }
        assert_eq!(table.num_objects(&db.read_txn().unwrap()), 0);
        // The lock was released by the drop.
        let mut txn = db.write_txn(&[&table]).unwrap();
        table.insert(&mut txn, Item { id: 2 }).unwrap();
        txn.commit();
        assert_eq!(table.num_objects(&db.read_txn().unwrap()), 1);
    }

    #[test]
    fn closed_txn_rejects_writes() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        txn.commit();
        assert!(matches!(
            table.insert(&mut txn, Item { id: 1 }),
            Err(DbError::TransactionClosed)
        ));

        // Repeat commit/abort are no-ops.
        txn.commit();
        txn.abort();
    }

    #[test]
    fn undeclared_table_rejected() {
        let (db, table) = fixture();
        let other = Table::new(
            "other",
            IndexSchema::new("id", |item: &Item| KeySet::single(Key::from_u64(item.id))).unique(),
            [],
        )
        .unwrap();
        db.register_table(&other).unwrap();

        let mut txn = db.write_txn(&[&table]).unwrap();
        assert!(matches!(
            other.insert(&mut txn, Item { id: 1 }),
            Err(DbError::TableNotRegistered { .. })
        ));
        txn.abort();
    }

    #[test]
    fn staged_reads_see_own_writes() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        table.insert(&mut txn, Item { id: 7 }).unwrap();

        let (found, _) = table.first_watch(&txn, &Query::index("id", Key::from_u64(7)));
        let (object, revision) = found.expect("staged object visible");
        assert_eq!(object.id, 7);
        assert_eq!(revision, Revision::new(1));
        assert_eq!(table.revision(&txn), Revision::new(1));
        txn.abort();
    }
}
