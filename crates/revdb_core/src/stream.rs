//! Observer streams over table changes.
//!
//! [`Database::observe`] turns a delete tracker into a channel of
//! [`ChangeEvent`]s: every insert arrives as `deleted: false`, every delete
//! as `deleted: true`, in revision (commit) order, only after the commit
//! that produced it. Dropping the receiver, or stopping the database, ends
//! the stream and closes the underlying tracker.

use crate::database::Database;
use crate::error::DbResult;
use crate::table::Table;
use crate::tracker::DeleteTracker;
use crate::types::Revision;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// How long the observer sleeps on its watch signal before re-checking the
/// shutdown token.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// A single change observed on a table.
#[derive(Debug)]
pub struct ChangeEvent<O> {
    /// The inserted object, or the last stored value of a deleted one.
    pub object: Arc<O>,
    /// True for a delete, false for an insert or update.
    pub deleted: bool,
    /// The revision the change committed at.
    pub revision: Revision,
}

impl<O> Clone for ChangeEvent<O> {
    fn clone(&self) -> Self {
        Self {
            object: Arc::clone(&self.object),
            deleted: self.deleted,
            revision: self.revision,
        }
    }
}

impl Database {
    /// Streams all changes of a table to a channel.
    ///
    /// Registers an internally named delete tracker and spawns a thread
    /// that forwards existing objects and subsequent inserts/deletes as
    /// [`ChangeEvent`]s. The stream terminates when the receiver is dropped
    /// or the database stops; either way the tracker is closed so it stops
    /// pinning the graveyard.
    pub fn observe<O>(&self, table: &Table<O>) -> DbResult<Receiver<ChangeEvent<O>>>
    where
        O: Send + Sync + 'static,
    {
        let id = table.registered_id()?;
        let name = format!(
            "observer-{}",
            self.inner().next_observer_id.fetch_add(1, Ordering::SeqCst)
        );

        let mut txn = self.write_txn_ids(vec![id])?;
        let tracker = table.delete_tracker(&mut txn, &name)?;
        txn.commit();

        let (tx, rx) = mpsc::channel();
        let db = self.handle();
        let table = table.clone();
        let handle = thread::Builder::new()
            .name(format!("revdb-observe-{}", table.name()))
            .spawn(move || observer_loop(&db, &table, &tracker, &tx))
            .expect("failed to spawn observer thread");
        self.inner().observers.lock().push(handle);

        Ok(rx)
    }
}

fn observer_loop<O: Send + Sync + 'static>(
    db: &Database,
    table: &Table<O>,
    tracker: &DeleteTracker<O>,
    tx: &Sender<ChangeEvent<O>>,
) {
    loop {
        // Capture the watch before delivering, so a commit that lands
        // mid-iteration still wakes the next round.
        let Ok(txn) = db.read_txn() else { break };
        let (_, watch) = table.all(&txn);

        let mut disconnected = false;
        tracker.iterate(&txn, |object, deleted, revision| {
            if tx
                .send(ChangeEvent {
                    object,
                    deleted,
                    revision,
                })
                .is_err()
            {
                disconnected = true;
            }
        });
        if disconnected {
            break;
        }

        loop {
            if watch.wait_timeout(SHUTDOWN_POLL) {
                break;
            }
            if db.inner().shutdown.is_signaled() {
                tracker.close();
                return;
            }
        }
    }
    tracker.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSchema;
    use revdb_key::{Key, KeySet};
    use std::time::Duration;

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
        db.start();
        (db, table)
    }

    fn recv(rx: &Receiver<ChangeEvent<Item>>) -> ChangeEvent<Item> {
        rx.recv_timeout(Duration::from_secs(5)).expect("event")
    }

    #[test]
    fn streams_inserts_then_deletes_in_order() {
        let (db, table) = fixture();
        let rx = db.observe(&table).unwrap();

        let mut txn = db.write_txn(&[&table]).unwrap();
        table.insert(&mut txn, Item { id: 1 }).unwrap();
        table.insert(&mut txn, Item { id: 2 }).unwrap();
        txn.commit();

        let first = recv(&rx);
        let second = recv(&rx);
        assert_eq!((first.object.id, first.deleted), (1, false));
        assert_eq!((second.object.id, second.deleted), (2, false));
        assert!(first.revision < second.revision);

        let mut txn = db.write_txn(&[&table]).unwrap();
        table.delete(&mut txn, &Item { id: 1 }).unwrap();
        table.delete(&mut txn, &Item { id: 2 }).unwrap();
        txn.commit();

        let third = recv(&rx);
        let fourth = recv(&rx);
        assert_eq!((third.object.id, third.deleted), (1, true));
        assert_eq!((fourth.object.id, fourth.deleted), (2, true));

        db.stop();
    }

    #[test]
    fn existing_objects_are_replayed() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        table.insert(&mut txn, Item { id: 9 }).unwrap();
        txn.commit();

        let rx = db.observe(&table).unwrap();
        let event = recv(&rx);
        assert_eq!((event.object.id, event.deleted), (9, false));

        db.stop();
    }

    #[test]
    fn stop_ends_the_stream() {
        let (db, table) = fixture();
        let rx = db.observe(&table).unwrap();
        db.stop();
        // The sender side is gone once the observer thread exits.
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
    }
}
