use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use arc_swap::ArcSwap;
use imbl::OrdMap;
use loom_core::{AdapterError, Result};
use loom_query::{eval_native, sort_page, Row};

use crate::document::{CollectionRef, DocRef, FieldMask, Fields};
use crate::store::{NativeQuery, Store};

use super::transaction::MemoryTransaction;

pub(crate) type Collection = OrdMap<String, Row>;

/// A reference store backend with no persistence and no real native
/// query language of its own — every `NativeFilter` it receives is
/// evaluated the same way the in-memory fallback engine would. Useful
/// for tests and for host integrations with no external store yet.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<ArcSwap<Collection>>>>,
    write_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn acquire_write_lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|e| {
            AdapterError::Store(Box::new(std::io::Error::other(format!(
                "write lock poisoned: {e}"
            ))))
        })
    }

    pub(crate) fn snapshot(&self, name: &str) -> Arc<Collection> {
        let mut collections = self.collections.write().unwrap();
        collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ArcSwap::new(Arc::new(Collection::new()))))
            .load_full()
    }

    pub(crate) fn commit(&self, dirty: HashMap<String, Arc<Collection>>) {
        let mut collections = self.collections.write().unwrap();
        for (name, data) in dirty {
            collections
                .entry(name)
                .or_insert_with(|| Arc::new(ArcSwap::new(Arc::new(Collection::new()))))
                .store(data);
        }
    }
}

impl Store for MemoryStore {
    type Txn<'a> = MemoryTransaction<'a>;

    fn collection(&self, name: &str) -> CollectionRef {
        CollectionRef::new(name)
    }

    fn run_transaction<F, T>(&self, read_only: bool, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Txn<'_>) -> Result<T>,
    {
        let mut txn = if read_only {
            MemoryTransaction::new_read_only(self)
        } else {
            let guard = self.acquire_write_lock()?;
            MemoryTransaction::new_writable(self, guard)
        };
        let result = f(&mut txn)?;
        txn.commit()?;
        Ok(result)
    }

    fn get_all(&self, refs: &[DocRef], field_mask: Option<&FieldMask>) -> Result<Vec<Option<Fields>>> {
        Ok(refs
            .iter()
            .map(|r| {
                let collection = self.snapshot(&r.collection);
                collection.get(&r.id).map(|row| {
                    let fields: Fields = row.clone();
                    match field_mask {
                        Some(mask) => mask.apply(fields),
                        None => fields,
                    }
                })
            })
            .collect())
    }

    fn query(&self, query: &NativeQuery) -> Result<Vec<(String, Fields)>> {
        let collection = self.snapshot(&query.collection);
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
}
