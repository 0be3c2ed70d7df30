use std::sync::Arc;

use loom_core::{AdapterError, Model, Result};
use loom_engine::{ComponentCollection, Context, DataSource, FlatCollection, NormalCollection, Queryable, VirtualCollection};
use loom_query::{FilterInput, Sort};
use loom_store::{Fields, Store};

/// One model's row source, picked at construction time from
/// `model.options`/`model.is_component` rather than left for the caller to
/// choose — a host never mixes up which tier a model lives on.
pub enum Collection<S> {
    Normal(NormalCollection<S>),
    Flat(FlatCollection<S>),
    Virtual(VirtualCollection<S>),
    Component(ComponentCollection),
}

impl<S> Clone for Collection<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Normal(c) => Self::Normal(c.clone()),
            Self::Flat(c) => Self::Flat(c.clone()),
            Self::Virtual(c) => Self::Virtual(c.clone()),
            Self::Component(c) => Self::Component(c.clone()),
        }
    }
}

impl<S: Store> Collection<S> {
    pub(crate) fn for_model(
        ctx: Arc<Context<S>>,
        model: Arc<Model>,
        source: Option<Arc<dyn DataSource>>,
    ) -> Result<Self> {
        if model.is_component {
            return Ok(Self::Component(ComponentCollection::new(model)));
        }
        if model.is_virtual() {
            let source = source.ok_or_else(|| {
                AdapterError::unsupported(format!(
                    "model '{}' is a virtual data source and needs a DataSource binding",
                    model.name
                ))
            })?;
            return Ok(Self::Virtual(VirtualCollection::new(ctx, model, source)));
        }
        if model.is_flat() {
            return Ok(Self::Flat(FlatCollection::new(ctx, model)));
        }
        Ok(Self::Normal(NormalCollection::new(ctx, model)))
    }

    pub fn get(&self) -> Result<Vec<(String, Fields)>> {
        match self {
            Self::Normal(c) => c.get(),
            Self::Flat(c) => c.get(),
            Self::Virtual(c) => c.get(),
            Self::Component(c) => c.get(),
        }
    }

    /// `Some` only for the Flat tier — the only one with a shared document
    /// whose existence needs guaranteeing before a row can be written.
    pub fn ensure_document(&self) -> Result<()> {
        match self {
            Self::Flat(c) => c.ensure_document(),
            _ => Ok(()),
        }
    }
}

impl<S: Store> Queryable for Collection<S> {
    fn where_clause(&self, filter: FilterInput) -> Self {
        match self {
            Self::Normal(c) => Self::Normal(c.where_clause(filter)),
            Self::Flat(c) => Self::Flat(c.where_clause(filter)),
            Self::Virtual(c) => Self::Virtual(c.where_clause(filter)),
            Self::Component(c) => Self::Component(c.clone()),
        }
    }

    fn order_by(&self, sort: Sort) -> Self {
        match self {
            Self::Normal(c) => Self::Normal(c.order_by(sort)),
            Self::Flat(c) => Self::Flat(c.order_by(sort)),
            Self::Virtual(c) => Self::Virtual(c.order_by(sort)),
            Self::Component(c) => Self::Component(c.clone()),
        }
    }

    fn limit(&self, n: usize) -> Self {
        match self {
            Self::Normal(c) => Self::Normal(c.limit(n)),
            Self::Flat(c) => Self::Flat(c.limit(n)),
            Self::Virtual(c) => Self::Virtual(c.limit(n)),
            Self::Component(c) => Self::Component(c.clone()),
        }
    }

    fn offset(&self, n: usize) -> Self {
        match self {
            Self::Normal(c) => Self::Normal(c.offset(n)),
            Self::Flat(c) => Self::Flat(c.offset(n)),
            Self::Virtual(c) => Self::Virtual(c.offset(n)),
            Self::Component(c) => Self::Component(c.clone()),
        }
    }
}
