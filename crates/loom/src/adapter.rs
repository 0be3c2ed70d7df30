use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use loom_core::{AdapterError, Logger, Model, Ref, Registry, Result, RunnerConfig, Value};
use loom_engine::{Context, DataSource, EditMode, LifecycleOptions, OnChangeHook, RelationHandler, RunnerOpts, Transaction, TransactionRunner};
use loom_store::Store;

use crate::collection::Collection;
use crate::relations;

/// The adapter's handle to one model host: the registry it was configured
/// with, the store binding, every model's precomputed relation handlers,
/// and the `DataSource` bindings the host registered for its virtual
/// models (looked up by model name at `collection()` time).
pub struct Adapter<S> {
    ctx: Arc<Context<S>>,
    runner: TransactionRunner<S>,
    relations: HashMap<String, Vec<RelationHandler>>,
    data_sources: HashMap<String, Arc<dyn DataSource>>,
}

impl<S: Store + Send + Sync + 'static> Adapter<S> {
    pub fn new(registry: Registry, store: S) -> Self {
        Self::with_context(Arc::new(Context::new(registry, store)))
    }

    pub fn with_logger(registry: Registry, store: S, logger: Arc<dyn Logger>) -> Self {
        let ctx = Context::new(registry, store).with_logger(logger);
        Self::with_context(Arc::new(ctx))
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        let ctx = Context {
            registry: self.ctx.registry.clone(),
            logger: self.ctx.logger.clone(),
            store: self.ctx.store.clone(),
            config,
        };
        self.ctx = Arc::new(ctx);
        self.rebuild_runner();
        self
    }

    fn with_context(ctx: Arc<Context<S>>) -> Self {
        let relations = relations::build_all(&ctx.registry);
        let runner = TransactionRunner::new(ctx.clone());
        Self {
            ctx,
            runner,
            relations,
            data_sources: HashMap::new(),
        }
    }

    /// Binds a host-supplied row source to a virtual-data-source model.
    /// Every virtual model must get one before `collection()` is called
    /// on it, or before any reference write reaches it — the transaction
    /// runner replays Virtual writes against this same binding, keyed by
    /// collection name rather than model name.
    pub fn with_data_source(mut self, model_name: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        self.data_sources.insert(model_name.into(), source);
        self.rebuild_runner();
        self
    }

    /// Re-derives the runner's collection-name-keyed `DataSource` map from
    /// `self.data_sources` (model-name-keyed) and rebuilds the runner on
    /// the current `ctx` — needed any time either changes, since the
    /// runner holds its own `Arc<Context<S>>` clone rather than sharing
    /// `self.ctx` by reference.
    fn rebuild_runner(&mut self) {
        let by_collection = self
            .data_sources
            .iter()
            .filter_map(|(model_name, source)| {
                let model = self.ctx.registry.get_model(model_name, None)?;
                Some((model.collection_name.clone(), source.clone()))
            })
            .collect();
        self.runner = TransactionRunner::new(self.ctx.clone()).with_data_sources(by_collection);
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    fn model(&self, name: &str) -> Result<Arc<Model>> {
        self.ctx.registry.require_model(name)
    }

    fn relations_for(&self, model_name: &str) -> &[RelationHandler] {
        self.relations.get(model_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn collection(&self, model_name: &str) -> Result<Collection<S>> {
        let model = self.model(model_name)?;
        let source = self.data_sources.get(model_name).cloned();
        Collection::for_model(self.ctx.clone(), model, source)
    }

    /// Constructs the `Ref` a new document at `id` would have for `model`,
    /// picking Deep/Virtual/Normal from its schema options (§4.1).
    pub fn reference(&self, model_name: &str, id: &str) -> Result<Ref> {
        let model = self.model(model_name)?;
        reference_for(&model, id)
    }

    /// Runs `f` inside the transaction tier the runner picks for
    /// `opts` — see `TransactionRunner::run` (§4.8). Use this to batch
    /// several reference operations, or the ambient reads a host needs,
    /// into one store-native transaction.
    pub fn run_transaction<F, T>(&self, opts: RunnerOpts, f: F) -> Result<T>
    where
        F: Fn(&mut dyn Transaction) -> Result<T>,
    {
        self.runner.run(opts, f)
    }

    fn runner_opts_for(&self, model: &Model) -> RunnerOpts {
        RunnerOpts {
            read_only: false,
            virtual_involved: model.is_virtual(),
            flat_involved: model.is_flat(),
        }
    }

    /// The low-level write path used both by the convenience methods below
    /// and by a host composing several reference writes inside its own
    /// `run_transaction` closure.
    pub fn write_in(
        &self,
        txn: &mut dyn Transaction,
        reference: &Ref,
        data: Option<Value>,
        edit_mode: EditMode,
        opts: LifecycleOptions,
        on_change: Option<&OnChangeHook<'_>>,
    ) -> Result<Value> {
        let model = self.ctx.registry.get_model_by_collection_name(reference.parent_collection()).ok_or_else(|| {
            AdapterError::reference_shape(format!(
                "reference points at unknown collection '{}'",
                reference.parent_collection()
            ))
        })?;
        loom_engine::run_update_lifecycle(
            &self.ctx.registry,
            self.ctx.logger.as_ref(),
            &model,
            reference,
            data,
            edit_mode,
            opts,
            Utc::now(),
            on_change,
            self.relations_for(&model.name),
            txn,
        )
    }

    fn write(&self, reference: &Ref, data: Option<Value>, edit_mode: EditMode, opts: LifecycleOptions) -> Result<Value> {
        let model = self
            .ctx
            .registry
            .get_model_by_collection_name(reference.parent_collection())
            .ok_or_else(|| {
                AdapterError::reference_shape(format!(
                    "reference points at unknown collection '{}'",
                    reference.parent_collection()
                ))
            })?;
        let runner_opts = self.runner_opts_for(&model);
        self.runner
            .run(runner_opts, |txn| self.write_in(txn, reference, data.clone(), edit_mode, opts.clone(), None))
    }

    pub fn create(&self, reference: &Ref, data: Value, opts: LifecycleOptions) -> Result<Value> {
        self.write(reference, Some(data), EditMode::Create, opts)
    }

    pub fn update(&self, reference: &Ref, data: Value, opts: LifecycleOptions) -> Result<Value> {
        self.write(reference, Some(data), EditMode::Update, opts)
    }

    /// Replace-or-create: succeeds whether or not the document already
    /// exists.
    pub fn set(&self, reference: &Ref, data: Value, opts: LifecycleOptions) -> Result<Value> {
        self.write(reference, Some(data), EditMode::Set, opts)
    }

    /// Merge-or-create: a partial-field update if the document exists,
    /// otherwise a create from just the given fields.
    pub fn set_merge(&self, reference: &Ref, data: Value, opts: LifecycleOptions) -> Result<Value> {
        self.write(reference, Some(data), EditMode::SetMerge, opts)
    }

    pub fn delete(&self, reference: &Ref, opts: LifecycleOptions) -> Result<Value> {
        self.write(reference, None, EditMode::Delete, opts)
    }
}

/// §4.1: a model's schema options decide which `Ref` kind a document id
/// resolves to — flattened models live as named fields of one shared Deep
/// document, virtual-data-source models are process-local rows that never
/// touch the backing store, everything else is a plain Normal document.
fn reference_for(model: &Model, id: &str) -> Result<Ref> {
    if model.is_virtual() {
        Ref::virtual_(model.collection_name.clone(), id)
    } else if model.is_flat() {
        Ref::deep(model.collection_name.clone(), id)
    } else {
        Ref::normal(model.collection_name.clone(), id)
    }
}

#[cfg(test)]
mod tests {
    use loom_core::{Attribute, PrimitiveType, ReferenceKind};
    use loom_engine::Queryable;
    use loom_query::{FilterInput, Operator, WhereFilter};
    use loom_store::memory::MemoryStore;

    use super::*;
    use crate::Collection;

    fn article_model() -> Model {
        let mut m = Model::new("article", "id");
        m.collection_name = "articles".into();
        m.attributes
            .insert("title".into(), Attribute::Primitive(PrimitiveType::String));
        m.attributes.insert(
            "tags".into(),
            Attribute::Relation {
                target_model: "tag".into(),
                plugin: None,
                kind: ReferenceKind::Normal,
                via: Some("articles".into()),
                dominant: true,
                is_array: true,
                is_morph: false,
                is_meta: false,
                actual_alias: None,
            },
        );
        m.associations.push("tags".into());
        m
    }

    fn tag_model() -> Model {
        let mut m = Model::new("tag", "id");
        m.collection_name = "tags".into();
        m.attributes
            .insert("name".into(), Attribute::Primitive(PrimitiveType::String));
        m.attributes.insert(
            "articles".into(),
            Attribute::Relation {
                target_model: "article".into(),
                plugin: None,
                kind: ReferenceKind::Normal,
                via: Some("tags".into()),
                dominant: false,
                is_array: true,
                is_morph: false,
                is_meta: false,
                actual_alias: None,
            },
        );
        m.associations.push("articles".into());
        m
    }

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.register(article_model());
        r.register(tag_model());
        r
    }

    fn doc(fields: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
        Value::Document(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn create_then_get_round_trips_through_a_collection() {
        let adapter = Adapter::new(registry(), MemoryStore::default());
        let reference = adapter.reference("article", "1").unwrap();

        adapter
            .create(&reference, doc([("title", Value::String("hello".into()))]), LifecycleOptions::default())
            .unwrap();

        let collection = adapter.collection("article").unwrap();
        let rows = collection.get().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.get("title"), Some(&Value::String("hello".into())));
    }

    #[test]
    fn creating_an_article_with_tags_propagates_the_reverse_reference() {
        let adapter = Adapter::new(registry(), MemoryStore::default());

        let tag_ref = adapter.reference("tag", "t1").unwrap();
        adapter.create(&tag_ref, doc([("name", Value::String("rust".into()))]), LifecycleOptions::default()).unwrap();

        let article_ref = adapter.reference("article", "a1").unwrap();
        adapter
            .create(
                &article_ref,
                doc([
                    ("title", Value::String("hello".into())),
                    ("tags", Value::List(vec![Value::Reference(tag_ref.clone())])),
                ]),
                LifecycleOptions::default(),
            )
            .unwrap();

        let tags = adapter.collection("tag").unwrap().get().unwrap();
        let (_, fields) = tags.into_iter().find(|(id, _)| id == "t1").unwrap();
        let Some(Value::List(articles)) = fields.get("articles") else {
            panic!("expected the reverse 'articles' field to be populated, got {:?}", fields.get("articles"));
        };
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].as_ref(), Some(&article_ref));
    }

    #[test]
    fn where_clause_filters_down_to_matching_rows() {
        let adapter = Adapter::new(registry(), MemoryStore::default());
        adapter
            .create(&adapter.reference("article", "1").unwrap(), doc([("title", Value::String("a".into()))]), LifecycleOptions::default())
            .unwrap();
        adapter
            .create(&adapter.reference("article", "2").unwrap(), doc([("title", Value::String("b".into()))]), LifecycleOptions::default())
            .unwrap();

        let Collection::Normal(normal) = adapter.collection("article").unwrap() else { panic!() };
        let filtered = normal.where_clause(FilterInput::Where(WhereFilter::new(
            "title",
            Operator::Eq,
            Value::String("b".into()),
        )));
        let rows = filtered.get().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.get("title"), Some(&Value::String("b".into())));
    }
}
