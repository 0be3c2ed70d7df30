//! Host-facing facade: wires the registry, store binding, coercion layer,
//! and transaction engine into the two surfaces a model host actually
//! calls (§6) — a `Collection` per model, and Reference write operations,
//! both running through `Adapter::run_transaction`.

mod adapter;
mod collection;
mod relations;

pub use adapter::Adapter;
pub use collection::Collection;

pub use loom_core::{AdapterError, Logger, Model, ModelOptions, PrimitiveType, Ref, ReferenceKind, Registry, Result, RunnerConfig, Value};
pub use loom_coerce::{coerce_to_model, coerce_to_store, resolve_references, CoerceOptions};
pub use loom_engine::{
    DataSource, EditMode, LifecycleOptions, OnChangeHook, Queryable, QueryState, RelationAttrInfo, RelationEnd,
    RelationHandler, RunnerOpts, SuccessHook, Transaction,
};
pub use loom_query::{FilterInput, NativeFilter, Operator, Sort, SortDirection, WhereFilter};
pub use loom_store::{memory::MemoryStore, DocRef, Fields, Store};
