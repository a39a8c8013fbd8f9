//! JSON snapshot of table contents.

use crate::database::{Database, DumpFn};
use crate::error::DbResult;
use crate::transaction::ReadTxn;
use crate::types::TableId;
use serde_json::Value;
use std::io;

impl Database {
    /// Writes the contents of all tables as JSON.
    ///
    /// The output is an object keyed by table name; each value is the array
    /// of that table's objects in revision order. The dump reflects the
    /// read transaction's snapshot and is informational only.
    pub fn dump<W: io::Write>(&self, txn: &ReadTxn, writer: W) -> DbResult<()> {
        self.dump_filtered(txn, None, writer)
    }

    /// Like [`dump`](Database::dump), restricted to the named tables.
    ///
    /// Unknown names are ignored.
    pub fn dump_tables<W: io::Write>(
        &self,
        txn: &ReadTxn,
        tables: &[&str],
        writer: W,
    ) -> DbResult<()> {
        self.dump_filtered(txn, Some(tables), writer)
    }

    fn dump_filtered<W: io::Write>(
        &self,
        txn: &ReadTxn,
        filter: Option<&[&str]>,
        writer: W,
    ) -> DbResult<()> {
        let mut metas: Vec<(String, TableId, DumpFn)> = self
            .inner()
            .registry
            .read()
            .iter()
            .filter(|meta| filter.map_or(true, |names| names.contains(&meta.name.as_str())))
            .map(|meta| (meta.name.clone(), meta.id, meta.dump.clone()))
            .collect();
        metas.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = serde_json::Map::new();
        for (name, id, dump) in metas {
            // Tables registered after the snapshot have no state in it.
            let Some(state) = txn.root.get(&id) else {
                continue;
            };
            let mut rows = Vec::with_capacity(state.revisions.len());
            for (_, entry) in state.revisions.iter() {
                rows.push(dump(entry)?);
            }
            out.insert(name, Value::Array(rows));
        }

        serde_json::to_writer_pretty(writer, &Value::Object(out))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::index::IndexSchema;
    use crate::table::Table;
    use revdb_key::{Key, KeySet};

    #[derive(Debug, Clone, PartialEq, serde::Serialize)]
    struct Item {
        id: u64,
        tags: Vec<String>,
    }

    fn new_table(name: &str) -> Table<Item> {
        Table::new(
            name,
            IndexSchema::new("id", |item: &Item| KeySet::single(Key::from_u64(item.id))).unique(),
            [],
        )
        .unwrap()
    }

    fn item(id: u64, tag: &str) -> Item {
        Item {
            id,
            tags: vec![tag.to_string()],
        }
    }

    #[test]
    fn dump_is_keyed_by_table_in_revision_order() {
        let db = Database::new();
        let left = new_table("left");
        let right = new_table("right");
        db.register_table(&left).unwrap();
        db.register_table(&right).unwrap();

        let mut txn = db.write_txn(&[&left, &right]).unwrap();
        left.insert(&mut txn, item(2, "second")).unwrap();
        left.insert(&mut txn, item(1, "third")).unwrap();
        right.insert(&mut txn, item(9, "only")).unwrap();
        txn.commit();

        let mut buffer = Vec::new();
        let read = db.read_txn().unwrap();
        db.dump(&read, &mut buffer).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        let left_rows = value["left"].as_array().unwrap();
        assert_eq!(left_rows.len(), 2);
        // Revision order, not key order: id=2 was inserted first.
        assert_eq!(left_rows[0]["id"], 2);
        assert_eq!(left_rows[1]["id"], 1);
        assert_eq!(value["right"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn dump_tables_filters() {
        let db = Database::new();
        let left = new_table("left");
        let right = new_table("right");
        db.register_table(&left).unwrap();
        db.register_table(&right).unwrap();

        let mut txn = db.write_txn(&[&left]).unwrap();
        left.insert(&mut txn, item(1, "x")).unwrap();
        txn.commit();

        let mut buffer = Vec::new();
        let read = db.read_txn().unwrap();
        db.dump_tables(&read, &["left"], &mut buffer).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert!(value.get("left").is_some());
        assert!(value.get("right").is_none());
    }
}
