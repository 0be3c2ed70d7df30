use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use loom_core::{AdapterError, Logger, Ref, RefKind, Registry, Result, Value};
use loom_store::{DocRef, FieldValue, Fields, NativeQuery, WritePayload};

use crate::collection::DataSource;
use crate::read_repo::ReadRepository;
use crate::write_op::WriteOp;

/// Non-atomic reads go through the non-transactional store accessor, not
/// the in-flight store-native transaction — that is what makes them
/// "non-atomic" in the first place (§4.7).
pub type NonAtomicFetch = Arc<dyn Fn(&[DocRef]) -> Result<Vec<Option<Fields>>> + Send + Sync>;

/// Operations available on both transaction variants. `ReadOnlyTransaction`
/// rejects the store-touching ones for non-`Virtual` refs (§4.7).
pub trait Transaction {
    fn get_atomic(&mut self, refs: &[Ref], registry: &Registry) -> Result<Vec<Option<Fields>>>;
    fn get_non_atomic(&mut self, refs: &[Ref], registry: &Registry) -> Result<Vec<Option<Fields>>>;

    /// A native query, used by the relation manager's dangling-reference
    /// scan (§4.6) and by `NormalCollection::get` when run inside a
    /// transaction.
    fn query(&mut self, query: &NativeQuery) -> Result<Vec<(String, Fields)>>;

    /// Route a write through the per-document `WriteOp` map rather than
    /// hitting the store directly — the low-level counterpart is
    /// `Ref::write_internal`, used only by the commit path and by the
    /// Virtual-collection fast path.
    fn merge_write_internal(
        &mut self,
        reference: &Ref,
        registry: &Registry,
        data: Option<WritePayload>,
        create: bool,
        upsert: bool,
    ) -> Result<()>;

    fn add_success_hook(&mut self, hook: Box<dyn FnOnce() + Send>);

    fn is_read_only(&self) -> bool;
}

fn doc_path(reference: &Ref, registry: &Registry) -> Result<String> {
    reference.path(registry)
}

fn doc_ref_of(reference: &Ref, registry: &Registry) -> Result<DocRef> {
    let (base, kind) = reference.base();
    match kind {
        RefKind::Normal => Ok(DocRef::new(&base.parent_collection, &base.id)),
        RefKind::Deep => {
            let model = registry.require_model(&base.parent_collection)?;
            let single_id = model.options.single_id.clone().ok_or_else(|| {
                AdapterError::reference_shape(format!("model '{}' is not flattened", base.parent_collection))
            })?;
            Ok(DocRef::new(&base.parent_collection, single_id))
        }
        RefKind::Virtual => Err(AdapterError::unsupported(
            "virtual refs have no store document",
        )),
    }
}

/// The normal transactional path: reads go through a store-native
/// transaction, writes accumulate into a per-document `WriteOp` map and
/// are applied at commit.
pub struct ReadWriteTransaction<'t, T: loom_store::Transaction> {
    txn: &'t mut T,
    logger: Arc<dyn Logger>,
    atomic_cache: HashMap<String, Option<Fields>>,
    non_atomic_fetch: NonAtomicFetch,
    non_atomic_cache: HashMap<String, Option<Fields>>,
    pub writes: BTreeMap<String, WriteOp>,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
    pub attempt: u32,
    pub atomic_reads: usize,
    pub total_reads: usize,
}

impl<'t, T: loom_store::Transaction> ReadWriteTransaction<'t, T> {
    /// `non_atomic_fetch` should call the store's non-transactional
    /// `get_all`, e.g. `Arc::new(move |refs| store.get_all(refs, None))`.
    pub fn new(txn: &'t mut T, logger: Arc<dyn Logger>, attempt: u32, non_atomic_fetch: NonAtomicFetch) -> Self {
        Self {
            txn,
            logger,
            atomic_cache: HashMap::new(),
            non_atomic_fetch,
            non_atomic_cache: HashMap::new(),
            writes: BTreeMap::new(),
            hooks: Vec::new(),
            attempt,
            atomic_reads: 0,
            total_reads: 0,
        }
    }

    fn fetch_atomic_missing(&mut self, refs: &[Ref], registry: &Registry) -> Result<Vec<Option<Fields>>> {
        let mut docs = Vec::with_capacity(refs.len());
        let mut paths = Vec::with_capacity(refs.len());
        for r in refs {
            docs.push(doc_ref_of(r, registry)?);
            paths.push(doc_path(r, registry)?);
        }

        let mut missing_docs = Vec::new();
        let mut missing_idx = Vec::new();
        for (i, path) in paths.iter().enumerate() {
            if !self.atomic_cache.contains_key(path) {
                missing_docs.push(docs[i].clone());
                missing_idx.push(i);
            }
        }

        if !missing_docs.is_empty() {
            let fetched = self.txn.get_all(&missing_docs)?;
            for (idx, value) in missing_idx.iter().zip(fetched) {
                self.atomic_cache.insert(paths[*idx].clone(), value);
            }
        }

        Ok(paths.iter().map(|p| self.atomic_cache.get(p).cloned().flatten()).collect())
    }

    fn fetch_non_atomic_missing(&mut self, refs: &[Ref], registry: &Registry) -> Result<Vec<Option<Fields>>> {
        let mut docs = Vec::with_capacity(refs.len());
        let mut paths = Vec::with_capacity(refs.len());
        for r in refs {
            docs.push(doc_ref_of(r, registry)?);
            paths.push(doc_path(r, registry)?);
        }

        let mut missing_docs = Vec::new();
        let mut missing_idx = Vec::new();
        for (i, path) in paths.iter().enumerate() {
            if !self.non_atomic_cache.contains_key(path) {
                missing_docs.push(docs[i].clone());
                missing_idx.push(i);
            }
        }

        if !missing_docs.is_empty() {
            let fetched = (self.non_atomic_fetch)(&missing_docs)?;
            for (idx, value) in missing_idx.iter().zip(fetched) {
                self.non_atomic_cache.insert(paths[*idx].clone(), value);
            }
        }

        Ok(paths
            .iter()
            .map(|p| self.non_atomic_cache.get(p).cloned().flatten())
            .collect())
    }

    /// Apply every pending `WriteOp`, then replay success hooks: deletes
    /// and creates issue their native call directly, everything else is
    /// an update.
    pub fn commit(mut self) -> Result<()> {
        let writes = std::mem::take(&mut self.writes);
        let write_count = writes.len();
        for (_, op) in writes {
            match op.data {
                None => self.txn.delete(&op.doc)?,
                Some(fields) if op.create => self.txn.create(&op.doc, fields)?,
                Some(fields) if op.upsert => match self.txn.update(&op.doc, fields.clone()) {
                    Err(AdapterError::UnsupportedOperation { .. }) => self.txn.create(&op.doc, fields)?,
                    other => other?,
                },
                Some(fields) => self.txn.update(&op.doc, fields)?,
            }
        }
        self.logger.debug(&format!(
            "commit attempt={} writes={} reads={} atomic_reads={}",
            self.attempt,
            write_count,
            self.total_reads,
            self.atomic_reads
        ));
        for hook in std::mem::take(&mut self.hooks) {
            hook();
        }
        Ok(())
    }
}

impl<'t, T: loom_store::Transaction> Transaction for ReadWriteTransaction<'t, T> {
    fn get_atomic(&mut self, refs: &[Ref], registry: &Registry) -> Result<Vec<Option<Fields>>> {
        self.atomic_reads += refs.len();
        self.total_reads += refs.len();
        self.fetch_atomic_missing(refs, registry)
    }

    fn get_non_atomic(&mut self, refs: &[Ref], registry: &Registry) -> Result<Vec<Option<Fields>>> {
        self.total_reads += refs.len();
        let mut out = Vec::with_capacity(refs.len());
        let mut rest = Vec::new();
        let mut rest_idx = Vec::new();
        for (i, r) in refs.iter().enumerate() {
            let path = doc_path(r, registry)?;
            if let Some(v) = self.atomic_cache.get(&path) {
                out.push((i, v.clone()));
            } else {
                rest.push(r.clone());
                rest_idx.push(i);
            }
        }
        if !rest.is_empty() {
            let fetched = self.fetch_non_atomic_missing(&rest, registry)?;
            for (idx, value) in rest_idx.into_iter().zip(fetched) {
                out.push((idx, value));
            }
        }
        out.sort_by_key(|(i, _)| *i);
        Ok(out.into_iter().map(|(_, v)| v).collect())
    }

    fn query(&mut self, query: &NativeQuery) -> Result<Vec<(String, Fields)>> {
        self.txn.query(query)
    }

    fn merge_write_internal(
        &mut self,
        reference: &Ref,
        registry: &Registry,
        data: Option<WritePayload>,
        create: bool,
        upsert: bool,
    ) -> Result<()> {
        let doc = doc_ref_of(reference, registry)?;
        let path = doc_path(reference, registry)?;
        let data = match (reference.kind(), data) {
            (RefKind::Deep, Some(fields)) => {
                let mut flattened = WritePayload::new();
                for (k, v) in fields {
                    flattened.insert(format!("{}.{}", reference.id(), k), v);
                }
                Some(flattened)
            }
            (_, other) => other,
        };
        let is_deep = reference.kind() == RefKind::Deep;
        let create = create && !is_deep;
        let upsert = upsert && !is_deep;
        self.writes
            .entry(path)
            .or_insert_with(|| WriteOp::empty(doc))
            .merge(data, create, upsert);
        Ok(())
    }

    fn add_success_hook(&mut self, hook: Box<dyn FnOnce() + Send>) {
        self.hooks.push(hook);
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

type NonAtomicRepo<'a> = ReadRepository<'a, Box<dyn Fn(&[DocRef]) -> Result<Vec<Option<Fields>>> + 'a>>;

/// The weaker tier used for pure reads, or for any transaction that
/// touches a `Virtual` collection (those need no store-native
/// participation). Rejects `get_atomic` and writes to non-`Virtual` refs;
/// `get_non_atomic` is allowed (§4.7 only lists `get_atomic` and writes as
/// rejected) and goes through the non-transactional store accessor.
///
/// A write to a `Virtual` ref is applied immediately against its
/// `DataSource`, keyed by `parent_collection` — there is no commit-time
/// buffering for Virtual refs since they never touch the store-native
/// transaction (§4.7: "allows writes to Virtual refs since those are
/// in-memory").
pub struct ReadOnlyTransaction<'a> {
    logger: Arc<dyn Logger>,
    repo: Option<NonAtomicRepo<'a>>,
    data_sources: HashMap<String, Arc<dyn DataSource>>,
}

impl<'a> ReadOnlyTransaction<'a> {
    /// No store binding at all — `get_non_atomic` also fails. Used by
    /// tests and by callers that only need the write-rejection behaviour.
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            repo: None,
            data_sources: HashMap::new(),
        }
    }

    pub fn with_fetch<F>(logger: Arc<dyn Logger>, fetch: F) -> Self
    where
        F: Fn(&[DocRef]) -> Result<Vec<Option<Fields>>> + 'a,
    {
        let boxed: Box<dyn Fn(&[DocRef]) -> Result<Vec<Option<Fields>>> + 'a> = Box::new(fetch);
        Self {
            logger,
            repo: Some(ReadRepository::new(boxed)),
            data_sources: HashMap::new(),
        }
    }

    /// Binds the `DataSource`s a Virtual write should be replayed against,
    /// keyed by collection name.
    pub fn with_data_sources(mut self, data_sources: HashMap<String, Arc<dyn DataSource>>) -> Self {
        self.data_sources = data_sources;
        self
    }

    pub fn commit(self) -> Result<()> {
        self.logger.debug("commit attempt=1 writes=0 read-only");
        Ok(())
    }
}

/// Replay `data`/`create`/`upsert` onto the row named `id` in `source`'s
/// row map, then persist the whole map back — the same create/upsert/
/// update rules `ReadWriteTransaction::commit` applies to a buffered
/// `WriteOp`, just applied at once instead of deferred.
fn apply_virtual_write(
    source: &dyn DataSource,
    id: &str,
    data: Option<WritePayload>,
    create: bool,
    upsert: bool,
) -> Result<()> {
    let mut rows = source.get_data()?;
    match data {
        None => {
            rows.remove(id);
        }
        Some(payload) => {
            let existing = rows.get(id).cloned();
            if create && existing.is_some() {
                return Err(AdapterError::unsupported(format!(
                    "cannot create virtual row '{id}': it already exists"
                )));
            }
            if !create && !upsert && existing.is_none() {
                return Err(AdapterError::unsupported(format!(
                    "cannot update virtual row '{id}': it does not exist"
                )));
            }
            let mut fields = match existing {
                Some(Value::Document(map)) => map,
                _ => Default::default(),
            };
            for (key, value) in payload {
                match value {
                    FieldValue::Value(v) => {
                        fields.insert(key, v);
                    }
                    FieldValue::Op(op) => match op.apply(fields.get(&key)) {
                        Some(v) => {
                            fields.insert(key, v);
                        }
                        None => {
                            fields.remove(&key);
                        }
                    },
                }
            }
            rows.insert(id.to_string(), Value::Document(fields));
        }
    }
    source.set_data(rows)
}

impl<'a> Transaction for ReadOnlyTransaction<'a> {
    fn get_atomic(&mut self, _refs: &[Ref], _registry: &Registry) -> Result<Vec<Option<Fields>>> {
        Err(AdapterError::unsupported(
            "get_atomic is not available on a read-only transaction",
        ))
    }

    fn get_non_atomic(&mut self, refs: &[Ref], registry: &Registry) -> Result<Vec<Option<Fields>>> {
        let Some(repo) = &self.repo else {
            return Err(AdapterError::unsupported(
                "a read-only transaction has no non-atomic store binding to delegate to",
            ));
        };
        let docs = refs
            .iter()
            .map(|r| doc_ref_of(r, registry))
            .collect::<Result<Vec<_>>>()?;
        repo.get_all(&docs)
    }

    fn query(&mut self, _query: &NativeQuery) -> Result<Vec<(String, Fields)>> {
        Err(AdapterError::unsupported(
            "a read-only transaction has no store-native query binding",
        ))
    }

    fn merge_write_internal(
        &mut self,
        reference: &Ref,
        _registry: &Registry,
        data: Option<WritePayload>,
        create: bool,
        upsert: bool,
    ) -> Result<()> {
        if reference.kind() != RefKind::Virtual {
            return Err(AdapterError::unsupported(
                "cannot write a non-virtual reference inside a read-only transaction",
            ));
        }
        let source = self.data_sources.get(reference.parent_collection()).ok_or_else(|| {
            AdapterError::unsupported(format!(
                "no DataSource bound for virtual collection '{}'",
                reference.parent_collection()
            ))
        })?;
        apply_virtual_write(source.as_ref(), reference.id(), data, create, upsert)
    }

    fn add_success_hook(&mut self, _hook: Box<dyn FnOnce() + Send>) {}

    fn is_read_only(&self) -> bool {
        true
    }
}
