//! The transactional core sitting between the CMS host's public surface
//! and the store binding: collections, the coercion-driven lifecycle,
//! relation propagation, and the transaction runner (§4.1, §4.5-§4.9).

mod collection;
mod context;
mod lifecycle;
mod read_repo;
mod relation;
mod runner;
mod transaction;
mod write_op;

pub use collection::{
    ComponentCollection, DataSource, FlatCollection, NormalCollection, Queryable, QueryState,
    VirtualCollection,
};
pub use context::Context;
pub use lifecycle::{run_update_lifecycle, LifecycleOptions, OnChangeHook, SuccessHook};
pub use read_repo::ReadRepository;
pub use relation::{RelationAttrInfo, RelationEnd, RelationHandler};
pub use runner::{RunnerOpts, TransactionRunner};
pub use transaction::{ReadOnlyTransaction, ReadWriteTransaction, Transaction};
pub use write_op::{EditMode, WriteOp};
