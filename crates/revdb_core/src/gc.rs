//! Background graveyard garbage collection.
//!
//! Runs on its own thread at a rate-limited interval. Each tick computes,
//! per table, the lowest mark over all active delete trackers and discards
//! every tombstone at or below it; those have been consumed by everyone.
//! A table with no trackers has its graveyard cleared outright. Each
//! table's sweep runs in its own short write transaction and closes watch
//! signals like any other commit.

use crate::database::{begin_write, DbInner};
use crate::types::TableId;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// GC loop entry point; returns when the shutdown token fires.
pub(crate) fn run(inner: &Arc<DbInner>) {
    loop {
        let interval = *inner.gc_interval.lock();
        if inner.shutdown.wait_timeout(interval) {
            return;
        }
        let started = Instant::now();
        collect(inner);
        inner.metrics.observe_gc_duration(started.elapsed());
    }
}

/// One sweep over all registered tables.
fn collect(inner: &Arc<DbInner>) {
    let tables: Vec<(TableId, String)> = inner
        .registry
        .read()
        .iter()
        .map(|meta| (meta.id, meta.name.clone()))
        .collect();

    for (id, name) in tables {
        // Peek without taking the writer lock; most tables idle.
        let watermark = {
            let root = inner.root.read().clone();
            let Some(state) = root.get(&id) else { continue };
            if state.graveyard_revisions.is_empty() {
                continue;
            }
            state.trackers.min_mark().unwrap_or(u64::MAX)
        };
        inner.metrics.set_graveyard_low_watermark(&name, watermark);
        if watermark == 0 {
            continue;
        }

        let mut txn = match begin_write(inner, vec![id]) {
            Ok(txn) => txn,
            // The database stopped between ticks; the loop exits on the
            // next shutdown check.
            Err(err) => {
                error!(table = %name, %err, "graveyard GC skipped");
                return;
            }
        };

        let staging = match txn.staging_mut(id, &name) {
            Ok(staging) => staging,
            Err(err) => {
                error!(table = %name, %err, "graveyard GC skipped");
                return;
            }
        };

        let doomed_revisions: Vec<Vec<u8>> = staging
            .state
            .graveyard_revisions
            .iter()
            .take_while(|(_, entry)| entry.revision.as_u64() <= watermark)
            .map(|(key, _)| key.to_vec())
            .collect();
        if doomed_revisions.is_empty() {
            txn.abort();
            continue;
        }
        let doomed_primaries: Vec<Vec<u8>> = staging
            .state
            .graveyard
            .iter()
            .filter(|(_, entry)| entry.revision.as_u64() <= watermark)
            .map(|(key, _)| key.to_vec())
            .collect();

        for key in &doomed_revisions {
            let (tree, _) = staging
                .state
                .graveyard_revisions
                .delete(key, &mut staging.touched);
            staging.state.graveyard_revisions = tree;
        }
        for key in &doomed_primaries {
            let (tree, _) = staging.state.graveyard.delete(key, &mut staging.touched);
            staging.state.graveyard = tree;
        }

        txn.commit();
        debug!(
            table = %name,
            removed = doomed_revisions.len(),
            watermark,
            "graveyard collected"
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::database::Database;
    use crate::index::IndexSchema;
    use crate::table::Table;
    use revdb_key::{Key, KeySet};
    use std::time::{Duration, Instant};

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
        let db = Database::with_config(Config::new().gc_interval(Duration::from_millis(10)));
        db.register_table(&table).unwrap();
        db.start();
        (db, table)
    }

    fn wait_for_empty_graveyard(db: &Database, table: &Table<Item>) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let read = db.read_txn().unwrap();
            if table.num_deleted_objects(&read) == 0 {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn graveyard_drains_once_trackers_catch_up() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        let tracker = table.delete_tracker(&mut txn, "t").unwrap();
        table.insert(&mut txn, Item { id: 1 }).unwrap();
        table.delete(&mut txn, &Item { id: 1 }).unwrap();
        txn.commit();

        // The tombstone is pinned while the tracker lags.
        std::thread::sleep(Duration::from_millis(50));
        let read = db.read_txn().unwrap();
        assert_eq!(table.num_deleted_objects(&read), 1);

        tracker.iterate(&read, |_, _, _| {});
        assert!(wait_for_empty_graveyard(&db, &table));
        db.stop();
    }

    #[test]
    fn graveyard_cleared_when_last_tracker_closes() {
        let (db, table) = fixture();

        let mut txn = db.write_txn(&[&table]).unwrap();
        let tracker = table.delete_tracker(&mut txn, "t").unwrap();
        table.insert(&mut txn, Item { id: 1 }).unwrap();
        table.delete(&mut txn, &Item { id: 1 }).unwrap();
        txn.commit();

        tracker.close();
        assert!(wait_for_empty_graveyard(&db, &table));
        db.stop();
    }
}
