//! The external document store binding: the collection/doc addressing
//! scheme, the transactional and non-transactional read/write surface,
//! and field-value sentinels (`delete`, `array_union`, `array_remove`,
//! `increment`).

mod document;
mod field_op;
mod store;

#[cfg(feature = "memory")]
pub mod memory;

pub use document::{CollectionRef, DocRef, FieldMask, FieldValue, Fields, WritePayload};
pub use field_op::FieldOp;
pub use store::{NativeQuery, Store, Transaction};
