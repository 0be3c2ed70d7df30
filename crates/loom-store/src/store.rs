use loom_core::Result;
use loom_query::{NativeFilter, Sort};

use crate::document::{CollectionRef, DocRef, FieldMask, Fields, WritePayload};

/// A store-native query: filters the translator resolved to native
/// operators, plus ordering and paging, scoped to one collection.
#[derive(Debug, Clone)]
pub struct NativeQuery {
    pub collection: String,
    pub filters: Vec<NativeFilter>,
    pub sorts: Vec<Sort>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl NativeQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            sorts: Vec::new(),
            offset: 0,
            limit: None,
        }
    }
}

/// The binding to the external document store. Everything the adapter
/// does to read or write data outside of its own in-memory bookkeeping
/// goes through this trait.
pub trait Store {
    type Txn<'a>: Transaction
    where
        Self: 'a;

    fn collection(&self, name: &str) -> CollectionRef {
        CollectionRef::new(name)
    }

    fn doc(&self, collection: &str, id: &str) -> DocRef {
        DocRef::new(collection, id)
    }

    /// Run `f` inside a store-native transaction. `read_only` selects the
    /// weaker isolation tier a pure read path can use.
    fn run_transaction<F, T>(&self, read_only: bool, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Txn<'_>) -> Result<T>;

    /// Non-transactional bulk read — the binding the non-atomic read
    /// repository delegates to.
    fn get_all(&self, refs: &[DocRef], field_mask: Option<&FieldMask>) -> Result<Vec<Option<Fields>>>;

    /// Non-transactional native query.
    fn query(&self, query: &NativeQuery) -> Result<Vec<(String, Fields)>>;
}

/// One store-native transaction. Every method call happens against the
/// snapshot established when the transaction began.
pub trait Transaction {
    fn get_all(&mut self, refs: &[DocRef]) -> Result<Vec<Option<Fields>>>;

    fn query(&mut self, query: &NativeQuery) -> Result<Vec<(String, Fields)>>;

    /// Fails with `UnsupportedOperation` if the document already exists.
    fn create(&mut self, doc: &DocRef, fields: WritePayload) -> Result<()>;

    /// Fails with `UnsupportedOperation` if the document does not exist,
    /// unless the caller is writing a `Virtual` reference (the engine
    /// decides that, not the store).
    fn update(&mut self, doc: &DocRef, fields: WritePayload) -> Result<()>;

    fn delete(&mut self, doc: &DocRef) -> Result<()>;
}
