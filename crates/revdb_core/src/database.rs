//! Database facade: table registry, transactions, lifecycle.

use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::stats::{MetricsSink, NoopMetrics};
use crate::table::{Entry, Table, TableState};
use crate::transaction::{ReadTxn, TableStaging, WriteTxn};
use crate::types::TableId;
use crate::watch::WatchSet;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// The committed per-table states, swapped atomically as a whole on commit.
pub(crate) type RootMap = HashMap<TableId, TableState>;

/// Serializer for one erased table entry, captured at registration when the
/// object type is still known.
pub(crate) type DumpFn = Arc<dyn Fn(&Entry) -> serde_json::Result<serde_json::Value> + Send + Sync>;

/// Registration record of one table.
pub(crate) struct TableMeta {
    pub id: TableId,
    pub name: String,
    /// Writer-exclusion lock. Write transactions acquire the locks of all
    /// their tables in ascending `TableId` order.
    pub lock: Arc<Mutex<()>>,
    pub dump: DumpFn,
}

/// Cooperative shutdown token observed by background tasks.
pub(crate) struct Shutdown {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Sleeps up to `timeout`, returning early with `true` on shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                return *signaled;
            }
        }
        true
    }
}

pub(crate) struct DbInner {
    pub root: RwLock<Arc<RootMap>>,
    pub registry: RwLock<Vec<TableMeta>>,
    pub metrics: Arc<dyn MetricsSink>,
    pub gc_interval: Mutex<Duration>,
    pub shutdown: Shutdown,
    pub next_observer_id: AtomicU64,
    pub observers: Mutex<Vec<JoinHandle<()>>>,
    next_table_id: AtomicU32,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// An in-memory, multi-version, transactional table store.
///
/// Tables are registered once, then accessed exclusively through
/// transactions:
///
/// ```rust,ignore
/// let db = Database::new();
/// db.register_table(&items)?;
/// db.start();
///
/// let mut txn = db.write_txn(&[&items])?;
/// items.insert(&mut txn, Item { id: 1, tags: vec![] })?;
/// txn.commit();
///
/// let read = db.read_txn()?;
/// let (item, revision) = items.first(&read, &Query::index("id", Key::from_u64(1))).unwrap();
///
/// db.stop();
/// ```
///
/// Readers are wait-free: a [`ReadTxn`] is a snapshot of immutable trees.
/// Writers exclude each other per table only; writers on disjoint tables
/// run concurrently. Lifecycle is explicit: [`start`](Database::start)
/// spawns the graveyard GC task, [`stop`](Database::stop) winds down all
/// background work, and there is no process-global instance.
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    /// Creates a database with default configuration and no metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::with_metrics(Config::default(), Arc::new(NoopMetrics))
    }

    /// Creates a database with the given configuration and no metrics.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Creates a database reporting to the given metrics sink.
    #[must_use]
    pub fn with_metrics(config: Config, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner: Arc::new(DbInner {
                root: RwLock::new(Arc::new(RootMap::new())),
                registry: RwLock::new(Vec::new()),
                metrics,
                gc_interval: Mutex::new(config.gc_interval),
                shutdown: Shutdown::new(),
                next_observer_id: AtomicU64::new(0),
                observers: Mutex::new(Vec::new()),
                next_table_id: AtomicU32::new(0),
                gc_handle: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Another handle to the same database, for background tasks.
    pub(crate) fn handle(&self) -> Database {
        Database {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<DbInner> {
        &self.inner
    }

    /// Registers a table, binding its handle to this database.
    ///
    /// Fails if the table name is taken or the handle is already bound.
    pub fn register_table<O>(&self, table: &Table<O>) -> DbResult<()>
    where
        O: serde::Serialize + Send + Sync + 'static,
    {
        let name = table.name().to_string();
        let mut registry = self.inner.registry.write();
        if registry.iter().any(|meta| meta.name == name) {
            return Err(DbError::TableAlreadyRegistered { name });
        }

        let id = TableId::new(self.inner.next_table_id.fetch_add(1, Ordering::SeqCst));
        table
            .schema
            .id
            .set(id)
            .map_err(|_| DbError::TableAlreadyRegistered { name: name.clone() })?;

        let dump: DumpFn = Arc::new(|entry: &Entry| {
            let object = crate::table::entry_object::<O>(entry);
            serde_json::to_value(&*object)
        });
        let num_indexes = table.schema.indexes.len();
        registry.push(TableMeta {
            id,
            name,
            lock: Arc::new(Mutex::new(())),
            dump,
        });
        drop(registry);

        let mut root = self.inner.root.write();
        let mut next = (**root).clone();
        next.insert(id, TableState::empty(num_indexes));
        *root = Arc::new(next);
        Ok(())
    }

    /// Takes a read-only snapshot of all tables.
    pub fn read_txn(&self) -> DbResult<ReadTxn> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(DbError::DatabaseStopped);
        }
        Ok(ReadTxn {
            root: self.inner.root.read().clone(),
        })
    }

    /// Opens a write transaction over the given tables.
    ///
    /// Blocks until every table's writer lock is held. Locks are acquired
    /// in ascending table-ID order regardless of argument order, so writers
    /// over overlapping sets cannot deadlock.
    pub fn write_txn(&self, tables: &[&dyn TableRef]) -> DbResult<WriteTxn> {
        let mut ids = Vec::with_capacity(tables.len());
        for table in tables {
            let id = table.table_id()?;
            let registered = {
                let registry = self.inner.registry.read();
                registry
                    .iter()
                    .any(|meta| meta.id == id && meta.name == table.table_name())
            };
            if !registered {
                return Err(DbError::table_not_registered(table.table_name()));
            }
            ids.push(id);
        }
        self.write_txn_ids(ids)
    }

    /// Opens a write transaction over already-validated table IDs.
    pub(crate) fn write_txn_ids(&self, ids: Vec<TableId>) -> DbResult<WriteTxn> {
        begin_write(&self.inner, ids)
    }

    /// Overrides the minimum interval between graveyard GC runs.
    pub fn set_gc_rate_limit_interval(&self, interval: Duration) {
        *self.inner.gc_interval.lock() = interval;
    }

    /// Starts background work: the graveyard GC task.
    ///
    /// Idempotent; the database is usable for transactions before `start`,
    /// only GC is deferred.
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut handle = self.inner.gc_handle.lock();
        if handle.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *handle = Some(
            thread::Builder::new()
                .name("revdb-gc".into())
                .spawn(move || crate::gc::run(&inner))
                .expect("failed to spawn graveyard GC thread"),
        );
        debug!("database started");
    }

    /// Stops the database: signals shutdown, joins the GC task and all
    /// observer threads. New transactions fail afterwards.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.signal();
        if let Some(handle) = self.inner.gc_handle.lock().take() {
            let _ = handle.join();
        }
        let observers: Vec<_> = self.inner.observers.lock().drain(..).collect();
        for handle in observers {
            let _ = handle.join();
        }
        debug!("database stopped");
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquires table locks in ascending ID order and builds the staging areas
/// from the then-current committed states.
pub(crate) fn begin_write(inner: &Arc<DbInner>, mut ids: Vec<TableId>) -> DbResult<WriteTxn> {
    if inner.stopped.load(Ordering::SeqCst) {
        return Err(DbError::DatabaseStopped);
    }
    ids.sort_unstable();
    ids.dedup();

    let start = Instant::now();
    let mut guards = Vec::with_capacity(ids.len());
    let mut names = Vec::with_capacity(ids.len());
    for id in &ids {
        let (lock, name) = {
            let registry = inner.registry.read();
            let meta = registry
                .iter()
                .find(|meta| meta.id == *id)
                .ok_or_else(|| DbError::table_not_registered(id.to_string()))?;
            (Arc::clone(&meta.lock), meta.name.clone())
        };
        // The registry lock is dropped before blocking on the table lock,
        // so a slow writer does not stall registrations.
        guards.push(lock.lock_arc());
        names.push(name);
    }
    inner
        .metrics
        .observe_write_txn_acquisition(&names, start.elapsed());

    let base = inner.root.read().clone();
    let staged: BTreeMap<TableId, TableStaging> = ids
        .iter()
        .zip(names)
        .map(|(id, name)| {
            let state = base
                .get(id)
                .cloned()
                .unwrap_or_else(|| panic!("registered table {id} missing from root map"));
            (
                *id,
                TableStaging {
                    name,
                    state,
                    touched: WatchSet::new(),
                },
            )
        })
        .collect();

    Ok(WriteTxn::new(Arc::clone(inner), base, staged, guards))
}

/// A table handle usable in a `write_txn` declaration, independent of its
/// object type.
pub trait TableRef {
    /// The table's name.
    fn table_name(&self) -> &str;

    /// The table's registered ID.
    #[doc(hidden)]
    fn table_id(&self) -> DbResult<TableId>;
}

impl<O: Send + Sync + 'static> TableRef for Table<O> {
    fn table_name(&self) -> &str {
        self.name()
    }

    fn table_id(&self) -> DbResult<TableId> {
        self.registered_id()
    }
}
