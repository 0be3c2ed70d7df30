use std::collections::BTreeMap;

use loom_core::Value;

use crate::field_op::FieldOp;

/// `collection(name)` — a path segment identifying one collection in the
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef(pub String);

impl CollectionRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// `doc(path)` — one document's address: the collection it lives in plus
/// its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// One value written through `create`/`update`: either a plain coerced
/// value, or a sentinel the store binding must replay rather than store
/// literally (`delete()`, `array_union`, `array_remove`, `increment`).
#[derive(Debug, Clone)]
pub enum FieldValue {
    Value(Value),
    Op(FieldOp),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<FieldOp> for FieldValue {
    fn from(op: FieldOp) -> Self {
        Self::Op(op)
    }
}

/// A fully materialized document body, as read back from the store. No
/// `FieldValue` sentinels survive a read.
pub type Fields = BTreeMap<String, Value>;

/// A write payload: a mix of plain values and sentinels, as submitted to
/// `create`/`update`.
pub type WritePayload = BTreeMap<String, FieldValue>;

/// Restricts a read to the named top-level fields plus the id. `None`
/// means "every field".
#[derive(Debug, Clone, Default)]
pub struct FieldMask(pub Vec<String>);

impl FieldMask {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn apply(&self, fields: Fields) -> Fields {
        if self.0.is_empty() {
            return fields;
        }
        fields
            .into_iter()
            .filter(|(k, _)| self.0.iter().any(|f| f == k))
            .collect()
    }
}
