//! # RevDB Core
//!
//! An in-memory, multi-version, transactional table store.
//!
//! A [`Database`] holds typed [`Table`]s, each indexed by one always-unique
//! primary index and any number of secondary indexes over a persistent
//! radix tree. The design trades write throughput for wait-free reads:
//!
//! - **Readers never block.** A [`ReadTxn`] snapshots the per-table root
//!   pointers; the trees behind them are immutable and structurally shared.
//! - **Writers exclude each other per table.** A [`WriteTxn`] declares its
//!   tables, locks them in a deterministic order, stages copy-on-write
//!   updates, and publishes them with one atomic root swap.
//! - **Every mutation gets a revision.** Per-table counters order all
//!   inserts and deletes, enabling incremental `by_revision` scans.
//! - **Changes are observable.** Tree nodes carry single-shot
//!   [`WatchSignal`]s closed on commit; [`DeleteTracker`]s replay inserts
//!   and deletes at-least-once, backed by a graveyard of tombstones that a
//!   background GC task drains once every tracker has caught up.
//!
//! ## Example
//!
//! ```rust,ignore
//! use revdb_core::{Database, IndexSchema, Query, Table};
//! use revdb_key::{Key, KeySet};
//!
//! let items: Table<Item> = Table::new(
//!     "items",
//!     IndexSchema::new("id", |i: &Item| KeySet::single(Key::from_u64(i.id))).unique(),
//!     [IndexSchema::new("tags", |i: &Item| i.tags.iter().map(Key::from).collect())],
//! )?;
//!
//! let db = Database::new();
//! db.register_table(&items)?;
//! db.start();
//!
//! let mut txn = db.write_txn(&[&items])?;
//! items.insert(&mut txn, Item { id: 42, tags: vec!["hello".into()] })?;
//! txn.commit();
//!
//! let read = db.read_txn()?;
//! let (hello, _watch) = items.get(&read, &Query::index("tags", "hello"));
//! assert_eq!(hello.count(), 1);
//!
//! db.stop();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
mod gc;
mod index;
mod json;
mod stats;
mod stream;
mod table;
mod tracker;
mod transaction;
mod types;
mod watch;

pub mod tree;

pub use config::Config;
pub use database::{Database, TableRef};
pub use error::{CasError, DbError, DbResult};
pub use index::{IndexSchema, Query};
pub use stats::{AtomicMetrics, MetricsSink, MetricsSnapshot, NoopMetrics, TableMetricsSnapshot};
pub use stream::ChangeEvent;
pub use table::{ObjectIter, Table};
pub use tracker::DeleteTracker;
pub use transaction::{ReadTxn, Readable, WriteTxn};
pub use types::{Revision, TableId};
pub use watch::{WatchSet, WatchSignal};

// Key types appear throughout the public API; re-export them so most users
// only depend on this crate.
pub use revdb_key::{Key, KeySet};
