//! Metrics reporting.
//!
//! The core reports into a [`MetricsSink`] supplied by the embedder:
//! per-table gauges (revision, object count, graveyard size and watermark,
//! tracker count) and per-database timings (write-transaction acquisition
//! and duration, GC duration). [`AtomicMetrics`] is a ready-made sink
//! backed by atomics, [`NoopMetrics`] discards everything.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sink for the metrics the database core emits.
///
/// Gauges are set at commit time with the committed values; timings are
/// observed once per event. Implementations must be cheap: gauge updates
/// happen inside the commit path.
pub trait MetricsSink: Send + Sync {
    /// Latest committed revision of a table.
    fn set_revision(&self, table: &str, revision: u64);

    /// Number of live objects in a table.
    fn set_object_count(&self, table: &str, count: u64);

    /// Number of tombstones awaiting tracker consumption.
    fn set_graveyard_object_count(&self, table: &str, count: u64);

    /// Lowest revision still pinned by a delete tracker, as computed by the
    /// last GC sweep.
    fn set_graveyard_low_watermark(&self, table: &str, revision: u64);

    /// Number of active delete trackers on a table.
    fn set_delete_tracker_count(&self, table: &str, count: u64);

    /// Time spent blocking on table locks when opening a write transaction.
    fn observe_write_txn_acquisition(&self, tables: &[String], duration: Duration);

    /// Time from write-transaction acquisition to commit.
    fn observe_write_txn_duration(&self, tables: &[String], duration: Duration);

    /// Duration of one graveyard GC sweep.
    fn observe_gc_duration(&self, duration: Duration);
}

/// A metrics sink that discards everything.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_revision(&self, _table: &str, _revision: u64) {}
    fn set_object_count(&self, _table: &str, _count: u64) {}
    fn set_graveyard_object_count(&self, _table: &str, _count: u64) {}
    fn set_graveyard_low_watermark(&self, _table: &str, _revision: u64) {}
    fn set_delete_tracker_count(&self, _table: &str, _count: u64) {}
    fn observe_write_txn_acquisition(&self, _tables: &[String], _duration: Duration) {}
    fn observe_write_txn_duration(&self, _tables: &[String], _duration: Duration) {}
    fn observe_gc_duration(&self, _duration: Duration) {}
}

#[derive(Default)]
struct TableGauges {
    revision: AtomicU64,
    objects: AtomicU64,
    graveyard_objects: AtomicU64,
    graveyard_low_watermark: AtomicU64,
    delete_trackers: AtomicU64,
}

/// An in-process metrics sink backed by atomic counters.
///
/// All updates are lock-free except the first touch of a new table name.
/// [`snapshot`](AtomicMetrics::snapshot) returns a plain copy for
/// assertions and export.
#[derive(Default)]
pub struct AtomicMetrics {
    tables: RwLock<BTreeMap<String, Arc<TableGauges>>>,
    write_txn_count: AtomicU64,
    write_txn_nanos: AtomicU64,
    write_txn_acquisition_nanos: AtomicU64,
    gc_runs: AtomicU64,
    gc_nanos: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a sink with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn gauges(&self, table: &str) -> Arc<TableGauges> {
        if let Some(gauges) = self.tables.read().get(table) {
            return Arc::clone(gauges);
        }
        let mut tables = self.tables.write();
        Arc::clone(tables.entry(table.to_string()).or_default())
    }

    /// Returns a point-in-time copy of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tables = self
            .tables
            .read()
            .iter()
            .map(|(name, gauges)| {
                (
                    name.clone(),
                    TableMetricsSnapshot {
                        revision: gauges.revision.load(Ordering::Relaxed),
                        objects: gauges.objects.load(Ordering::Relaxed),
                        graveyard_objects: gauges.graveyard_objects.load(Ordering::Relaxed),
                        graveyard_low_watermark: gauges
                            .graveyard_low_watermark
                            .load(Ordering::Relaxed),
                        delete_trackers: gauges.delete_trackers.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        MetricsSnapshot {
            tables,
            write_txn_count: self.write_txn_count.load(Ordering::Relaxed),
            write_txn_total: Duration::from_nanos(self.write_txn_nanos.load(Ordering::Relaxed)),
            write_txn_acquisition_total: Duration::from_nanos(
                self.write_txn_acquisition_nanos.load(Ordering::Relaxed),
            ),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            gc_total: Duration::from_nanos(self.gc_nanos.load(Ordering::Relaxed)),
        }
    }
}

impl MetricsSink for AtomicMetrics {
    fn set_revision(&self, table: &str, revision: u64) {
        self.gauges(table).revision.store(revision, Ordering::Relaxed);
    }

    fn set_object_count(&self, table: &str, count: u64) {
        self.gauges(table).objects.store(count, Ordering::Relaxed);
    }

    fn set_graveyard_object_count(&self, table: &str, count: u64) {
        self.gauges(table)
            .graveyard_objects
            .store(count, Ordering::Relaxed);
    }

    fn set_graveyard_low_watermark(&self, table: &str, revision: u64) {
        self.gauges(table)
            .graveyard_low_watermark
            .store(revision, Ordering::Relaxed);
    }

    fn set_delete_tracker_count(&self, table: &str, count: u64) {
        self.gauges(table)
            .delete_trackers
            .store(count, Ordering::Relaxed);
    }

    fn observe_write_txn_acquisition(&self, _tables: &[String], duration: Duration) {
        self.write_txn_acquisition_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    fn observe_write_txn_duration(&self, _tables: &[String], duration: Duration) {
        self.write_txn_count.fetch_add(1, Ordering::Relaxed);
        self.write_txn_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    fn observe_gc_duration(&self, duration: Duration) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.gc_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of an [`AtomicMetrics`] sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Per-table gauges keyed by table name.
    pub tables: BTreeMap<String, TableMetricsSnapshot>,
    /// Write transactions committed.
    pub write_txn_count: u64,
    /// Total time spent inside write transactions.
    pub write_txn_total: Duration,
    /// Total time spent blocking on table locks.
    pub write_txn_acquisition_total: Duration,
    /// Graveyard GC sweeps performed.
    pub gc_runs: u64,
    /// Total time spent in GC sweeps.
    pub gc_total: Duration,
}

/// Per-table gauge values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableMetricsSnapshot {
    /// Latest committed revision.
    pub revision: u64,
    /// Live object count.
    pub objects: u64,
    /// Tombstones awaiting consumption.
    pub graveyard_objects: u64,
    /// Lowest revision pinned by trackers at the last GC sweep.
    pub graveyard_low_watermark: u64,
    /// Active delete trackers.
    pub delete_trackers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_overwrite() {
        let metrics = AtomicMetrics::new();
        metrics.set_revision("items", 3);
        metrics.set_revision("items", 7);
        metrics.set_object_count("items", 2);

        let snap = metrics.snapshot();
        let items = &snap.tables["items"];
        assert_eq!(items.revision, 7);
        assert_eq!(items.objects, 2);
    }

    #[test]
    fn timings_accumulate() {
        let metrics = AtomicMetrics::new();
        let tables = vec!["items".to_string()];
        metrics.observe_write_txn_duration(&tables, Duration::from_millis(2));
        metrics.observe_write_txn_duration(&tables, Duration::from_millis(3));
        metrics.observe_gc_duration(Duration::from_millis(1));

        let snap = metrics.snapshot();
        assert_eq!(snap.write_txn_count, 2);
        assert_eq!(snap.write_txn_total, Duration::from_millis(5));
        assert_eq!(snap.gc_runs, 1);
    }

    #[test]
    fn separate_tables_do_not_interfere() {
        let metrics = AtomicMetrics::new();
        metrics.set_object_count("a", 1);
        metrics.set_object_count("b", 9);

        let snap = metrics.snapshot();
        assert_eq!(snap.tables["a"].objects, 1);
        assert_eq!(snap.tables["b"].objects, 9);
    }
}
