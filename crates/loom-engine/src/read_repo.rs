use std::cell::RefCell;
use std::collections::HashMap;

use loom_core::Result;
use loom_store::{DocRef, Fields};

/// Per-transaction read-through cache, keyed by document path. Once a
/// path resolves it stays cached for the repository's lifetime.
///
/// The non-atomic repository is backed by the atomic one: a read that
/// already has an atomic cache entry is served from it without touching
/// the store, but entries the non-atomic repo fetches on its own are not
/// visible back to atomic reads (the atomic tier must only ever reflect
/// what the surrounding transaction itself observed).
pub struct ReadRepository<'a, F>
where
    F: Fn(&[DocRef]) -> Result<Vec<Option<Fields>>>,
{
    cache: RefCell<HashMap<String, Option<Fields>>>,
    delegate: Option<&'a ReadRepository<'a, F>>,
    fetch: F,
}

impl<'a, F> ReadRepository<'a, F>
where
    F: Fn(&[DocRef]) -> Result<Vec<Option<Fields>>>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            cache: RefCell::new(HashMap::new()),
            delegate: None,
            fetch,
        }
    }

    pub fn with_delegate(fetch: F, delegate: &'a ReadRepository<'a, F>) -> Self {
        Self {
            cache: RefCell::new(HashMap::new()),
            delegate: Some(delegate),
            fetch,
        }
    }

    fn path(doc: &DocRef) -> String {
        format!("{}/{}", doc.collection, doc.id)
    }

    /// Fetch one document, filling the cache (and consulting the delegate
    /// first, when present) on a miss.
    pub fn get(&self, doc: &DocRef) -> Result<Option<Fields>> {
        let path = Self::path(doc);
        if let Some(cached) = self.cache.borrow().get(&path) {
            return Ok(cached.clone());
        }
        if let Some(delegate) = self.delegate
            && let Some(cached) = delegate.cache.borrow().get(&path)
        {
            self.cache.borrow_mut().insert(path, cached.clone());
            return Ok(cached.clone());
        }
        let result = (self.fetch)(std::slice::from_ref(doc))?;
        let value = result.into_iter().next().flatten();
        self.cache.borrow_mut().insert(path, value.clone());
        Ok(value)
    }

    /// Batch fetch, only issuing the store call for paths not already
    /// cached here or in the delegate.
    pub fn get_all(&self, docs: &[DocRef]) -> Result<Vec<Option<Fields>>> {
        let mut to_fetch = Vec::new();
        for doc in docs {
            let path = Self::path(doc);
            let known = self.cache.borrow().contains_key(&path)
                || self
                    .delegate
                    .is_some_and(|d| d.cache.borrow().contains_key(&path));
            if !known {
                to_fetch.push(doc.clone());
            }
        }
        if !to_fetch.is_empty() {
            let fetched = (self.fetch)(&to_fetch)?;
            for (doc, value) in to_fetch.iter().zip(fetched) {
                self.cache.borrow_mut().insert(Self::path(doc), value);
            }
        }
        docs.iter().map(|doc| self.get(doc)).collect()
    }

    /// Seed the cache directly — used after a native query so the
    /// resulting rows are visible to subsequent point reads without a
    /// second round-trip.
    pub fn seed(&self, doc: &DocRef, fields: Option<Fields>) {
        self.cache.borrow_mut().insert(Self::path(doc), fields);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use loom_core::Value;

    use super::*;

    #[test]
    fn repeated_get_does_not_refetch() {
        let calls = Cell::new(0);
        let repo = ReadRepository::new(|refs: &[DocRef]| {
            calls.set(calls.get() + 1);
            Ok(refs
                .iter()
                .map(|_| Some(Fields::from([("a".to_string(), Value::Int(1))])))
                .collect())
        });
        let doc = DocRef::new("articles", "1");
        repo.get(&doc).unwrap();
        repo.get(&doc).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn non_atomic_reads_from_atomic_delegate_cache() {
        let atomic_calls = Cell::new(0);
        let atomic_fetch: Box<dyn Fn(&[DocRef]) -> Result<Vec<Option<Fields>>>> = Box::new(|refs: &[DocRef]| {
            atomic_calls.set(atomic_calls.get() + 1);
            Ok(refs.iter().map(|_| Some(Fields::new())).collect())
        });
        let atomic = ReadRepository::new(atomic_fetch);
        let doc = DocRef::new("articles", "1");
        atomic.get(&doc).unwrap();

        let non_atomic_calls = Cell::new(0);
        let non_atomic_fetch: Box<dyn Fn(&[DocRef]) -> Result<Vec<Option<Fields>>>> = Box::new(|refs: &[DocRef]| {
            non_atomic_calls.set(non_atomic_calls.get() + 1);
            Ok(refs.iter().map(|_| Some(Fields::new())).collect())
        });
        let non_atomic = ReadRepository::with_delegate(non_atomic_fetch, &atomic);
        non_atomic.get(&doc).unwrap();
        assert_eq!(non_atomic_calls.get(), 0);
    }
}
