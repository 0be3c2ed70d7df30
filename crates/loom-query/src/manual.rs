use std::cmp::Ordering;
use std::collections::BTreeMap;

use loom_core::Value;

use crate::filter::NativeFilter;
use crate::operator::NativeOp;
use crate::sort::{Sort, SortDirection};

pub type Row = BTreeMap<String, Value>;

/// Evaluate an already-native filter directly against an in-memory row.
/// A reference store backend (one with no real native query language of
/// its own) uses this to implement `Store::query` without a second
/// predicate language.
pub fn eval_native(filter: &NativeFilter, row: &Row) -> bool {
    let value = field_value(row, &filter.field);
    match (&filter.op, &filter.value) {
        (NativeOp::Eq, v) => value == Some(v),
        (NativeOp::Ne, v) => value != Some(v),
        (NativeOp::Lt, v) => cmp_field(row, &filter.field, v) == Some(Ordering::Less),
        (NativeOp::Lte, v) => matches!(
            cmp_field(row, &filter.field, v),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        (NativeOp::Gt, v) => cmp_field(row, &filter.field, v) == Some(Ordering::Greater),
        (NativeOp::Gte, v) => matches!(
            cmp_field(row, &filter.field, v),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        (NativeOp::In, Value::List(items)) => value.is_some_and(|v| items.iter().any(|n| n == v)),
        (NativeOp::NotIn, Value::List(items)) => {
            !value.is_some_and(|v| items.iter().any(|n| n == v))
        }
        (NativeOp::In | NativeOp::NotIn, _) => false,
    }
}

fn field_value<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let mut current = row.get(segments.next()?)?;
    for segment in segments {
        match current {
            Value::Document(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn to_str_lossy(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Int(n) => Some(n.to_string()),
        Value::Float(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// An in-memory predicate, produced either by the translator's fallback
/// path or directly when the caller forces `ManualOnly`. Deterministic:
/// the same row always evaluates the same way, independent of evaluation
/// order.
#[derive(Debug, Clone)]
pub enum ManualPredicate {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    /// OR over needles; case sensitivity distinguishes `contains` from
    /// `containss`.
    Contains {
        field: String,
        needles: Vec<String>,
        case_sensitive: bool,
        negate: bool,
    },
    IsNull(String, bool),
    And(Vec<ManualPredicate>),
    Or(Vec<ManualPredicate>),
}

impl ManualPredicate {
    pub fn eval(&self, row: &Row) -> bool {
        match self {
            Self::Eq(field, value) => field_value(row, field) == Some(value),
            Self::Ne(field, value) => field_value(row, field) != Some(value),
            Self::Lt(field, value) => cmp_field(row, field, value) == Some(Ordering::Less),
            Self::Lte(field, value) => matches!(
                cmp_field(row, field, value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Self::Gt(field, value) => cmp_field(row, field, value) == Some(Ordering::Greater),
            Self::Gte(field, value) => matches!(
                cmp_field(row, field, value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Self::In(field, values) => {
                field_value(row, field).is_some_and(|v| values.iter().any(|n| n == v))
            }
            Self::NotIn(field, values) => {
                !field_value(row, field).is_some_and(|v| values.iter().any(|n| n == v))
            }
            Self::Contains {
                field,
                needles,
                case_sensitive,
                negate,
            } => {
                let matched = field_value(row, field)
                    .and_then(to_str_lossy)
                    .map(|hay| {
                        needles.iter().any(|needle| {
                            if *case_sensitive {
                                hay.contains(needle.as_str())
                            } else {
                                hay.to_lowercase().contains(&needle.to_lowercase())
                            }
                        })
                    })
                    .unwrap_or(false);
                matched != *negate
            }
            Self::IsNull(field, expect_null) => {
                let is_null = field_value(row, field).is_none_or(Value::is_null);
                is_null == *expect_null
            }
            Self::And(children) => children.iter().all(|c| c.eval(row)),
            Self::Or(children) => children.iter().any(|c| c.eval(row)),
        }
    }
}

fn cmp_field(row: &Row, field: &str, value: &Value) -> Option<Ordering> {
    field_value(row, field)?.partial_cmp_natural(value)
}

/// Sort + offset + limit a set of `(id, row)` pairs. `primary_key_field`
/// names the synthetic field sorts against `primary_key` should read
/// (the document id is not itself present in `row`).
pub fn sort_page<'a>(
    mut rows: Vec<(&'a str, &'a Row)>,
    sorts: &[Sort],
    primary_key_field: &str,
    offset: usize,
    limit: Option<usize>,
) -> Vec<&'a str> {
    rows.sort_by(|(id_a, a), (id_b, b)| {
        for sort in sorts {
            let ord = if sort.field == primary_key_field {
                id_a.cmp(id_b)
            } else {
                match (field_value(a, &sort.field), field_value(b, &sort.field)) {
                    (Some(va), Some(vb)) => va.partial_cmp_natural(vb).unwrap_or(Ordering::Equal),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            };
            let ord = match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        // Deterministic tie-break: document id, ascending, so repeated
        // queries over the same data always return the same order.
        id_a.cmp(id_b)
    });

    let iter = rows.into_iter().skip(offset);
    match limit {
        Some(n) => iter.take(n).map(|(id, _)| id).collect(),
        None => iter.map(|(id, _)| id).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn contains_is_case_insensitive_by_default() {
        let r = row(&[("name", Value::String("Alpha Team".into()))]);
        let pred = ManualPredicate::Contains {
            field: "name".into(),
            needles: vec!["alpha".into()],
            case_sensitive: false,
            negate: false,
        };
        assert!(pred.eval(&r));
    }

    #[test]
    fn containss_is_case_sensitive() {
        let r = row(&[("name", Value::String("Alpha Team".into()))]);
        let pred = ManualPredicate::Contains {
            field: "name".into(),
            needles: vec!["alpha".into()],
            case_sensitive: true,
            negate: false,
        };
        assert!(!pred.eval(&r));
    }

    #[test]
    fn sort_page_orders_by_document_id_for_primary_key_field() {
        let ra = row(&[]);
        let rb = row(&[]);
        let rows = vec![("b", &rb), ("a", &ra)];
        let sorts = vec![Sort::new("id", SortDirection::Asc)];
        let ids = sort_page(rows, &sorts, "id", 0, None);
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn flat_collection_paging_scenario() {
        let r1 = row(&[("score", Value::Int(3))]);
        let r2 = row(&[("score", Value::Int(1))]);
        let r3 = row(&[("score", Value::Int(2))]);
        let rows = vec![("r1", &r1), ("r2", &r2), ("r3", &r3)];
        let sorts = vec![Sort::new("score", SortDirection::Asc)];
        let ids = sort_page(rows, &sorts, "id", 1, Some(1));
        assert_eq!(ids, vec!["r3"]);
    }
}
