use loom_core::Value;

use crate::operator::{NativeOp, Operator};

/// A single `{field, operator, value}` predicate as it arrives from the
/// CMS host, before type coercion or operator rewriting.
#[derive(Debug, Clone)]
pub struct WhereFilter {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl WhereFilter {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// An implicit AND of `WhereFilter`s — one branch of an `OrFilter`.
pub type AndGroup = Vec<WhereFilter>;

/// `{operator: 'or', value: AndGroup[]}`.
#[derive(Debug, Clone)]
pub struct OrFilter {
    pub groups: Vec<AndGroup>,
}

/// A filter spec already expressed in the store's native form, passed
/// straight through translation unchanged.
#[derive(Debug, Clone)]
pub struct NativeFilter {
    pub field: String,
    pub op: NativeOp,
    pub value: Value,
}

/// The three disjoint predicate-tree shapes the translator accepts.
#[derive(Debug, Clone)]
pub enum FilterInput {
    Where(WhereFilter),
    Or(OrFilter),
    Native(NativeFilter),
}
