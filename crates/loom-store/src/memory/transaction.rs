use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, MutexGuard};

use loom_core::{AdapterError, Result};
use loom_query::{eval_native, sort_page, Row};

use crate::document::{DocRef, Fields, WritePayload};
use crate::store::{NativeQuery, Transaction};

use super::store::{Collection, MemoryStore};

pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    snapshot: RefCell<HashMap<String, Arc<Collection>>>,
    dirty: RefCell<HashSet<String>>,
    read_only: bool,
    _write_guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> MemoryTransaction<'a> {
    pub(crate) fn new_read_only(store: &'a MemoryStore) -> Self {
        Self {
            store,
            snapshot: RefCell::new(HashMap::new()),
            dirty: RefCell::new(HashSet::new()),
            read_only: true,
            _write_guard: None,
        }
    }

    pub(crate) fn new_writable(store: &'a MemoryStore, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            store,
            snapshot: RefCell::new(HashMap::new()),
            dirty: RefCell::new(HashSet::new()),
            read_only: false,
            _write_guard: Some(guard),
        }
    }

    fn load(&self, collection: &str) -> Arc<Collection> {
        let mut snapshot = self.snapshot.borrow_mut();
        snapshot
            .entry(collection.to_string())
            .or_insert_with(|| self.store.snapshot(collection))
            .clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(AdapterError::unsupported(
                "write attempted on a read-only transaction",
            ));
        }
        Ok(())
    }

    pub(crate) fn commit(self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let dirty = self.dirty.into_inner();
        if dirty.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot.into_inner();
        let to_commit: HashMap<String, Arc<Collection>> = snapshot
            .into_iter()
            .filter(|(name, _)| dirty.contains(name))
            .collect();
        self.store.commit(to_commit);
        Ok(())
    }
}

impl<'a> Transaction for MemoryTransaction<'a> {
    fn get_all(&mut self, refs: &[DocRef]) -> Result<Vec<Option<Fields>>> {
        Ok(refs
            .iter()
            .map(|r| self.load(&r.collection).get(&r.id).cloned())
            .collect())
    }

    fn query(&mut self, query: &NativeQuery) -> Result<Vec<(String, Fields)>> {
        let collection = self.load(&query.collection);
        let matching: Vec<(&str, &Row)> = collection
            .iter()
            .filter(|(_, row)| query.filters.iter().all(|f| eval_native(f, row)))
            .map(|(id, row)| (id.as_str(), row))
            .collect();
        let ids = sort_page(matching, &query.sorts, "id", query.offset, query.limit);
        Ok(ids
            .into_iter()
            .map(|id| (id.to_string(), collection.get(id).cloned().unwrap_or_default()))
            .collect())
    }

    fn create(&mut self, doc: &DocRef, fields: WritePayload) -> Result<()> {
        self.check_writable()?;
        let collection = self.load(&doc.collection);
        if collection.contains_key(&doc.id) {
            return Err(AdapterError::unsupported(format!(
                "document already exists: {}/{}",
                doc.collection, doc.id
            )));
        }
        let row = apply_payload(None, fields);
        self.write(doc, row)
    }

    fn update(&mut self, doc: &DocRef, fields: WritePayload) -> Result<()> {
        self.check_writable()?;
        let collection = self.load(&doc.collection);
        let Some(current) = collection.get(&doc.id) else {
            return Err(AdapterError::unsupported(format!(
                "document does not exist: {}/{}",
                doc.collection, doc.id
            )));
        };
        let row = apply_payload(Some(current), fields);
        self.write(doc, row)
    }

    fn delete(&mut self, doc: &DocRef) -> Result<()> {
        self.check_writable()?;
        let mut snapshot = self.snapshot.borrow_mut();
        let entry = snapshot
            .entry(doc.collection.clone())
            .or_insert_with(|| self.store.snapshot(&doc.collection));
        let data = Arc::make_mut(entry);
        data.remove(&doc.id);
        self.dirty.borrow_mut().insert(doc.collection.clone());
        Ok(())
    }
}

impl MemoryTransaction<'_> {
    fn write(&self, doc: &DocRef, row: Row) -> Result<()> {
        let mut snapshot = self.snapshot.borrow_mut();
        let entry = snapshot
            .entry(doc.collection.clone())
            .or_insert_with(|| self.store.snapshot(&doc.collection));
        let data = Arc::make_mut(entry);
        data.insert(doc.id.clone(), row);
        self.dirty.borrow_mut().insert(doc.collection.clone());
        Ok(())
    }
}

/// Replay a write payload's sentinels onto the document's current state
/// (absent for `create`), producing the row to store.
fn apply_payload(current: Option<&Row>, fields: WritePayload) -> Row {
    let mut row = current.cloned().unwrap_or_default();
    for (key, value) in fields {
        match value {
            crate::document::FieldValue::Value(v) => {
                row.insert(key, v);
            }
            crate::document::FieldValue::Op(op) => match op.apply(row.get(&key)) {
                Some(v) => {
                    row.insert(key, v);
                }
                None => {
                    row.remove(&key);
                }
            },
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use loom_core::Value;

    use super::*;
    use crate::document::FieldValue;
    use crate::store::Store;

    #[test]
    fn create_then_update_roundtrip() {
        let store = MemoryStore::new();
        let doc = DocRef::new("articles", "1");
        store
            .run_transaction(false, |txn| {
                let mut fields = WritePayload::new();
                fields.insert("title".into(), FieldValue::Value(Value::String("a".into())));
                txn.create(&doc, fields)
            })
            .unwrap();

        store
            .run_transaction(false, |txn| {
                let mut fields = WritePayload::new();
                fields.insert("views".into(), FieldValue::Op(crate::field_op::FieldOp::Increment(1.0)));
                txn.update(&doc, fields)
            })
            .unwrap();

        let fetched = store.get_all(&[doc], None).unwrap();
        let row = fetched[0].as_ref().unwrap();
        assert_eq!(row.get("views"), Some(&Value::Int(1)));
    }

    #[test]
    fn create_on_existing_document_fails() {
        let store = MemoryStore::new();
        let doc = DocRef::new("articles", "1");
        store
            .run_transaction(false, |txn| txn.create(&doc, WritePayload::new()))
            .unwrap();
        let err = store
            .run_transaction(false, |txn| txn.create(&doc, WritePayload::new()))
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedOperation { .. }));
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let store = MemoryStore::new();
        let doc = DocRef::new("articles", "1");
        let err = store
            .run_transaction(true, |txn| txn.create(&doc, WritePayload::new()))
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedOperation { .. }));
    }
}
