use std::sync::Arc;
use std::sync::Mutex;

use loom_core::{AdapterError, Model, Result, Value};
use loom_query::{sort_page, FilterInput, Row, Sort, Translated, TranslateMode};
use loom_store::{Fields, NativeQuery, Store, Transaction};

use crate::context::Context;

/// Builder state shared by every collection kind. `where_clause`,
/// `order_by`, `limit`, and `offset` each hand back a new value carrying
/// a copy of this struct — the collection they were called on is left
/// untouched, so a caller can branch one base collection into several
/// differently-scoped queries.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub filters: Vec<FilterInput>,
    pub sorts: Vec<Sort>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl QueryState {
    fn pushed_filter(&self, filter: FilterInput) -> Self {
        let mut next = self.clone();
        next.filters.push(filter);
        next
    }

    fn pushed_sort(&self, sort: Sort) -> Self {
        let mut next = self.clone();
        next.sorts.push(sort);
        next
    }

    fn with_limit(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.limit = Some(n);
        next
    }

    fn with_offset(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.offset = n;
        next
    }
}

/// Query-builder surface every collection kind implements. Purity is the
/// whole point: none of these four methods may mutate `self`.
pub trait Queryable: Sized {
    fn where_clause(&self, filter: FilterInput) -> Self;
    fn order_by(&self, sort: Sort) -> Self;
    fn limit(&self, n: usize) -> Self;
    fn offset(&self, n: usize) -> Self;
}

/// Split the collection's accumulated filters into native vs. in-memory
/// tiers, resolving field aliases that equal the primary key to `"id"`
/// (the synthetic sort/compare key `sort_page`/`eval_native` use for the
/// document id).
fn split_filters(
    model: &Model,
    filters: &[FilterInput],
    mode: TranslateMode,
) -> Result<(Vec<loom_query::NativeFilter>, Vec<loom_query::ManualPredicate>)> {
    let mut native = Vec::new();
    let mut manual = Vec::new();
    for filter in filters {
        match loom_query::translate(normalize_primary_key(model, filter.clone()), mode)? {
            Translated::Native(n) => native.push(n),
            Translated::Manual(m) => manual.push(m),
            Translated::None => {}
        }
    }
    Ok((native, manual))
}

fn normalize_primary_key(model: &Model, filter: FilterInput) -> FilterInput {
    let rewrite = |field: String| if field == model.primary_key { "id".to_string() } else { field };
    match filter {
        FilterInput::Where(mut w) => {
            w.field = rewrite(w.field);
            FilterInput::Where(w)
        }
        FilterInput::Native(mut n) => {
            n.field = rewrite(n.field);
            FilterInput::Native(n)
        }
        other => other,
    }
}

fn apply_manual(rows: &[(String, Row)], manual: &[loom_query::ManualPredicate]) -> Vec<(String, Row)> {
    rows.iter()
        .filter(|(_, row)| manual.iter().all(|p| p.eval(row)))
        .cloned()
        .collect()
}

fn fields_to_row(fields: &Fields) -> Row {
    fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn row_to_fields(row: Row) -> Fields {
    row.into_iter().collect()
}

fn page(rows: Vec<(String, Fields)>, state: &QueryState, primary_key: &str) -> Vec<(String, Fields)> {
    let as_rows: Vec<(String, Row)> = rows.into_iter().map(|(id, f)| (id, fields_to_row(&f))).collect();
    let refs: Vec<(&str, &Row)> = as_rows.iter().map(|(id, r)| (id.as_str(), r)).collect();
    let ids = sort_page(refs, &state.sorts, primary_key, state.offset, state.limit);
    let mut by_id: std::collections::HashMap<&str, Row> =
        as_rows.iter().map(|(id, r)| (id.as_str(), r.clone())).collect();
    ids.into_iter()
        .filter_map(|id| by_id.remove(id).map(|r| (id.to_string(), row_to_fields(r))))
        .collect()
}

/// Delegates queries straight to the store. A manual-only predicate does
/// not stop the collection from working — it just means every document
/// the native tier returns is additionally checked in memory before
/// paging.
pub struct NormalCollection<S> {
    ctx: Arc<Context<S>>,
    model: Arc<Model>,
    state: QueryState,
}

impl<S> Clone for NormalCollection<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: Store> NormalCollection<S> {
    pub fn new(ctx: Arc<Context<S>>, model: Arc<Model>) -> Self {
        Self {
            ctx,
            model,
            state: QueryState::default(),
        }
    }

    pub fn get(&self) -> Result<Vec<(String, Fields)>> {
        let (native, manual) = split_filters(&self.model, &self.state.filters, TranslateMode::PreferNative)?;
        let query = NativeQuery {
            collection: self.model.collection_name.clone(),
            filters: native,
            sorts: self.state.sorts.clone(),
            offset: 0,
            limit: None,
        };
        let rows = self.ctx.store.query(&query)?;
        let filtered = apply_manual(&rows.into_iter().collect::<Vec<_>>(), &manual);
        Ok(page(filtered, &self.state, &self.model.primary_key))
    }
}

impl<S> Queryable for NormalCollection<S> {
    fn where_clause(&self, filter: FilterInput) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.pushed_filter(filter),
        }
    }

    fn order_by(&self, sort: Sort) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.pushed_sort(sort),
        }
    }

    fn limit(&self, n: usize) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.with_limit(n),
        }
    }

    fn offset(&self, n: usize) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.with_offset(n),
        }
    }
}

/// Holds a single shared document (`{collection}/{single_id}`), with each
/// row keyed by field alias nested one level under its own id. Filters,
/// sorts, and paging always run in memory — there is exactly one store
/// document to read regardless of how many logical rows it represents.
pub struct FlatCollection<S> {
    ctx: Arc<Context<S>>,
    model: Arc<Model>,
    state: QueryState,
    ensured: Arc<Mutex<bool>>,
}

impl<S> Clone for FlatCollection<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.clone(),
            ensured: self.ensured.clone(),
        }
    }
}

impl<S: Store> FlatCollection<S> {
    pub fn new(ctx: Arc<Context<S>>, model: Arc<Model>) -> Self {
        Self {
            ctx,
            model,
            state: QueryState::default(),
            ensured: Arc::new(Mutex::new(false)),
        }
    }

    fn single_id(&self) -> Result<&str> {
        self.model.options.single_id.as_deref().ok_or_else(|| {
            AdapterError::unsupported(format!("model '{}' is not flattened", self.model.name))
        })
    }

    /// Best-effort merge-write of `{}` to guarantee the shared document
    /// exists, memoised so repeated calls within one collection value's
    /// lifetime issue at most one write. A failed attempt clears the
    /// memo so the next call retries rather than silently giving up.
    pub fn ensure_document(&self) -> Result<()> {
        {
            let done = self.ensured.lock().unwrap();
            if *done {
                return Ok(());
            }
        }
        let single_id = self.single_id()?;
        let doc = self.ctx.store.doc(&self.model.collection_name, single_id);
        let result = self
            .ctx
            .store
            .run_transaction(false, |txn| match txn.create(&doc, Default::default()) {
                Ok(()) => Ok(()),
                Err(AdapterError::UnsupportedOperation { .. }) => Ok(()),
                Err(e) => Err(e),
            });
        match result {
            Ok(()) => {
                *self.ensured.lock().unwrap() = true;
                Ok(())
            }
            Err(e) => {
                *self.ensured.lock().unwrap() = false;
                Err(e)
            }
        }
    }

    pub fn get(&self) -> Result<Vec<(String, Fields)>> {
        let single_id = self.single_id()?;
        let doc = self.ctx.store.doc(&self.model.collection_name, single_id);
        let shared = self
            .ctx
            .store
            .get_all(std::slice::from_ref(&doc), None)?
            .into_iter()
            .next()
            .flatten()
            .unwrap_or_default();

        let rows: Vec<(String, Fields)> = shared
            .into_iter()
            .filter_map(|(id, value)| match value {
                Value::Document(map) => Some((id, map.into_iter().collect::<Fields>())),
                _ => None,
            })
            .collect();

        let (_, manual) = split_filters(&self.model, &self.state.filters, TranslateMode::ManualOnly)?;
        let filtered = apply_manual(&rows, &manual);
        Ok(page(filtered, &self.state, &self.model.primary_key))
    }
}

impl<S> Queryable for FlatCollection<S> {
    fn where_clause(&self, filter: FilterInput) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.pushed_filter(filter),
            ensured: self.ensured.clone(),
        }
    }

    fn order_by(&self, sort: Sort) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.pushed_sort(sort),
            ensured: self.ensured.clone(),
        }
    }

    fn limit(&self, n: usize) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.with_limit(n),
            ensured: self.ensured.clone(),
        }
    }

    fn offset(&self, n: usize) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            state: self.state.with_offset(n),
            ensured: self.ensured.clone(),
        }
    }
}

/// A row source for a model backed by neither the store's document tier
/// nor a flat shared document: `get_data`/`set_data` defer entirely to
/// the host-supplied [`DataSource`].
pub trait DataSource: Send + Sync {
    fn get_data(&self) -> Result<Fields>;
    fn set_data(&self, data: Fields) -> Result<()>;
}

/// Row set fetched lazily from a [`DataSource`] and kept in memory for
/// the lifetime of the collection value; `update_data` persists whatever
/// is currently held back to the source.
pub struct VirtualCollection<S> {
    ctx: Arc<Context<S>>,
    model: Arc<Model>,
    source: Arc<dyn DataSource>,
    state: QueryState,
    cache: Arc<Mutex<Option<Fields>>>,
}

impl<S> Clone for VirtualCollection<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            source: self.source.clone(),
            state: self.state.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S> VirtualCollection<S> {
    pub fn new(ctx: Arc<Context<S>>, model: Arc<Model>, source: Arc<dyn DataSource>) -> Self {
        Self {
            ctx,
            model,
            source,
            state: QueryState::default(),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    fn loaded(&self) -> Result<Fields> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(data) = cache.as_ref() {
            return Ok(data.clone());
        }
        let data = self.source.get_data()?;
        *cache = Some(data.clone());
        Ok(data)
    }

    pub fn get_data(&self) -> Result<Fields> {
        self.loaded()
    }

    pub fn set_data(&self, data: Fields) -> Result<()> {
        *self.cache.lock().unwrap() = Some(data);
        Ok(())
    }

    pub fn update_data(&self) -> Result<()> {
        let data = self.loaded()?;
        self.source.set_data(data)
    }

    pub fn get(&self) -> Result<Vec<(String, Fields)>> {
        let data = self.loaded()?;
        let rows: Vec<(String, Fields)> = data
            .into_iter()
            .filter_map(|(id, value)| match value {
                Value::Document(map) => Some((id, map.into_iter().collect::<Fields>())),
                _ => None,
            })
            .collect();
        let (_, manual) = split_filters(&self.model, &self.state.filters, TranslateMode::ManualOnly)?;
        let filtered = apply_manual(&rows, &manual);
        Ok(page(filtered, &self.state, &self.model.primary_key))
    }
}

impl<S> Queryable for VirtualCollection<S> {
    fn where_clause(&self, filter: FilterInput) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            source: self.source.clone(),
            state: self.state.pushed_filter(filter),
            cache: self.cache.clone(),
        }
    }

    fn order_by(&self, sort: Sort) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            source: self.source.clone(),
            state: self.state.pushed_sort(sort),
            cache: self.cache.clone(),
        }
    }

    fn limit(&self, n: usize) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            source: self.source.clone(),
            state: self.state.with_limit(n),
            cache: self.cache.clone(),
        }
    }

    fn offset(&self, n: usize) -> Self {
        Self {
            ctx: self.ctx.clone(),
            model: self.model.clone(),
            source: self.source.clone(),
            state: self.state.with_offset(n),
            cache: self.cache.clone(),
        }
    }
}

/// Components are embedded inside their parent document and never have
/// an independent collection identity; every operation except
/// `auto_id()` is a programmer error.
#[derive(Clone)]
pub struct ComponentCollection {
    model: Arc<Model>,
    next_id: Arc<Mutex<u64>>,
}

impl ComponentCollection {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn auto_id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        format!("{}-{id}", self.model.name)
    }

    fn refuse(op: &str) -> Result<()> {
        Err(AdapterError::unsupported(format!(
            "components are embedded, never stored independently: {op}"
        )))
    }

    pub fn get(&self) -> Result<Vec<(String, Fields)>> {
        Self::refuse("get").map(|()| Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use loom_core::{Model, RunnerConfig};
    use loom_store::memory::MemoryStore;

    use super::*;
    use crate::context::Context;

    fn article_model() -> Arc<Model> {
        let mut m = Model::new("article", "id");
        m.collection_name = "articles".into();
        Arc::new(m)
    }

    #[test]
    fn builder_methods_do_not_mutate_the_original() {
        let ctx = Arc::new(
            Context::new(loom_core::Registry::new(), MemoryStore::default())
                .with_config(RunnerConfig::default()),
        );
        let base = NormalCollection::new(ctx, article_model());
        let narrowed = base.limit(5);
        assert_eq!(base.state.limit, None);
        assert_eq!(narrowed.state.limit, Some(5));
    }
}
