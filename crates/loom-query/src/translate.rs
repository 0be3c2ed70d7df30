use loom_core::{AdapterError, Result, Value};

use crate::filter::{AndGroup, FilterInput, NativeFilter, OrFilter, WhereFilter};
use crate::manual::ManualPredicate;
use crate::operator::{NativeOp, Operator};

/// Controls how aggressively the translator prefers the store's native
/// filter language over the in-memory fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateMode {
    /// Force every predicate through the in-memory engine.
    ManualOnly,
    /// Raise [`AdapterError::NativeNotSupported`] rather than fall back.
    NativeOnly,
    /// Use the store's native filter whenever the operator and cardinality
    /// allow it; fall back silently otherwise.
    PreferNative,
}

/// Result of translating one predicate tree.
#[derive(Debug, Clone)]
pub enum Translated {
    Native(NativeFilter),
    Manual(ManualPredicate),
    /// Trivially true — the caller should omit the filter entirely.
    None,
}

const NATIVE_IN_LIMIT: usize = 10;

/// Translate one of a `WhereFilter`, an `OrFilter`, or an already-native
/// `NativeFilter` into either a native filter spec or an in-memory
/// predicate.
///
/// Callers are expected to have already coerced `value` to the target
/// attribute's type (§4.2); this function only rewrites operators and
/// decides nativity, it never parses raw external input.
pub fn translate(input: FilterInput, mode: TranslateMode) -> Result<Translated> {
    match input {
        FilterInput::Native(native) => Ok(Translated::Native(native)),
        FilterInput::Where(w) => translate_where(w, mode),
        FilterInput::Or(or) => translate_or(or, mode),
    }
}

fn translate_where(filter: WhereFilter, mode: TranslateMode) -> Result<Translated> {
    let WhereFilter {
        field,
        operator,
        value,
    } = filter;

    if operator.is_always_manual() {
        let negate = matches!(operator, Operator::NContains | Operator::NContainss);
        let case_sensitive = matches!(operator, Operator::Containss | Operator::NContainss);
        let needles = match value {
            Value::List(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>(),
            Value::String(s) => vec![s],
            other => {
                return Err(AdapterError::coercion(
                    field,
                    format!("contains needs a string or list of strings, got {other:?}"),
                ));
            }
        };
        if mode == TranslateMode::NativeOnly {
            return Err(AdapterError::NativeNotSupported {
                hint: "contains/containss always require in-memory evaluation",
            });
        }
        return Ok(Translated::Manual(ManualPredicate::Contains {
            field,
            needles,
            case_sensitive,
            negate,
        }));
    }

    let (operator, value) = rewrite_null(operator, value);
    let (operator, value) = rewrite_eq_ne_array(operator, value);
    let (operator, value) = reduce_inequality_array(operator, value)?;

    match (operator, value) {
        (Operator::In, Value::List(items)) if items.is_empty() => Err(AdapterError::EmptyQuery),
        (Operator::NotIn, Value::List(items)) if items.is_empty() => Ok(Translated::None),
        (Operator::In, Value::List(items)) => {
            decide(field, NativeOp::In, Value::List(items.clone()), items.len(), mode)
        }
        (Operator::NotIn, Value::List(items)) => {
            decide(field, NativeOp::NotIn, Value::List(items.clone()), items.len(), mode)
        }
        (Operator::Eq, value) => decide(field, NativeOp::Eq, value, 1, mode),
        (Operator::Ne, value) => decide(field, NativeOp::Ne, value, 1, mode),
        (Operator::Lt, value) => decide(field, NativeOp::Lt, value, 1, mode),
        (Operator::Lte, value) => decide(field, NativeOp::Lte, value, 1, mode),
        (Operator::Gt, value) => decide(field, NativeOp::Gt, value, 1, mode),
        (Operator::Gte, value) => decide(field, NativeOp::Gte, value, 1, mode),
        (other, _) => Err(AdapterError::UnsupportedOperation {
            reason: format!("operator {other:?} not handled after rewriting"),
        }),
    }
}

/// `in`/`not_in` run natively when the value list is small enough;
/// everything else that reaches here is a scalar native comparison.
fn decide(
    field: String,
    op: NativeOp,
    value: Value,
    cardinality: usize,
    mode: TranslateMode,
) -> Result<Translated> {
    let natively_expressible = cardinality <= NATIVE_IN_LIMIT;
    match mode {
        TranslateMode::ManualOnly => Ok(Translated::Manual(to_manual(field, op, value))),
        TranslateMode::NativeOnly if !natively_expressible => {
            Err(AdapterError::NativeNotSupported {
                hint: "in/not_in with more than 10 values require in-memory evaluation",
            })
        }
        TranslateMode::NativeOnly | TranslateMode::PreferNative if natively_expressible => {
            Ok(Translated::Native(NativeFilter { field, op, value }))
        }
        _ => Ok(Translated::Manual(to_manual(field, op, value))),
    }
}

fn to_manual(field: String, op: NativeOp, value: Value) -> ManualPredicate {
    match (op, value) {
        // An absent field isn't "equal to null" — it isn't present at all —
        // so a null-rewritten eq/ne goes through `IsNull` rather than `Eq`,
        // which would otherwise treat a missing field as non-null.
        (NativeOp::Eq, Value::Null) => ManualPredicate::IsNull(field, true),
        (NativeOp::Ne, Value::Null) => ManualPredicate::IsNull(field, false),
        (NativeOp::Eq, v) => ManualPredicate::Eq(field, v),
        (NativeOp::Ne, v) => ManualPredicate::Ne(field, v),
        (NativeOp::Lt, v) => ManualPredicate::Lt(field, v),
        (NativeOp::Lte, v) => ManualPredicate::Lte(field, v),
        (NativeOp::Gt, v) => ManualPredicate::Gt(field, v),
        (NativeOp::Gte, v) => ManualPredicate::Gte(field, v),
        (NativeOp::In, Value::List(items)) => ManualPredicate::In(field, items),
        (NativeOp::NotIn, Value::List(items)) => ManualPredicate::NotIn(field, items),
        (NativeOp::In, v) => ManualPredicate::In(field, vec![v]),
        (NativeOp::NotIn, v) => ManualPredicate::NotIn(field, vec![v]),
    }
}

fn rewrite_null(operator: Operator, value: Value) -> (Operator, Value) {
    match (operator, value) {
        (Operator::Null, Value::Bool(true)) => (Operator::Eq, Value::Null),
        (Operator::Null, Value::Bool(_)) => (Operator::Ne, Value::Null),
        other => other,
    }
}

fn rewrite_eq_ne_array(operator: Operator, value: Value) -> (Operator, Value) {
    match (operator, value) {
        (Operator::Eq, Value::List(items)) => (Operator::In, Value::List(items)),
        (Operator::Ne, Value::List(items)) => (Operator::NotIn, Value::List(items)),
        other => other,
    }
}

/// `<,<=` with an array reduces to the max; `>,>=` reduces to the min —
/// the widest bound any element could satisfy is the one that matters.
fn reduce_inequality_array(operator: Operator, value: Value) -> Result<(Operator, Value)> {
    let Value::List(items) = &value else {
        return Ok((operator, value));
    };
    let reduce_to = match operator {
        Operator::Lt | Operator::Lte => ReduceTo::Max,
        Operator::Gt | Operator::Gte => ReduceTo::Min,
        _ => return Ok((operator, value)),
    };
    if items.is_empty() {
        return Err(AdapterError::coercion(
            "<value>",
            "inequality with an empty array has no natural bound",
        ));
    }
    let mut chosen = &items[0];
    for item in &items[1..] {
        let ord = item.partial_cmp_natural(chosen).unwrap_or(std::cmp::Ordering::Equal);
        let replace = match reduce_to {
            ReduceTo::Max => ord == std::cmp::Ordering::Greater,
            ReduceTo::Min => ord == std::cmp::Ordering::Less,
        };
        if replace {
            chosen = item;
        }
    }
    Ok((operator, chosen.clone()))
}

enum ReduceTo {
    Max,
    Min,
}

fn translate_or(or: OrFilter, mode: TranslateMode) -> Result<Translated> {
    if mode != TranslateMode::ManualOnly
        && let Some(native) = try_consolidate(&or.groups)
    {
        return decide_or_native(native, mode);
    }

    if mode == TranslateMode::NativeOnly {
        return Err(AdapterError::NativeNotSupported {
            hint: "this disjunction cannot be consolidated into a single in/not_in",
        });
    }

    let mut children = Vec::with_capacity(or.groups.len());
    for group in or.groups {
        children.push(translate_and_group(group)?);
    }
    Ok(Translated::Manual(ManualPredicate::Or(children)))
}

fn translate_and_group(group: AndGroup) -> Result<ManualPredicate> {
    let mut children = Vec::with_capacity(group.len());
    for filter in group {
        match translate_where(filter, TranslateMode::ManualOnly)? {
            Translated::Manual(p) => children.push(p),
            Translated::None => continue,
            Translated::Native(_) => unreachable!("ManualOnly never returns Native"),
        }
    }
    Ok(ManualPredicate::And(children))
}

enum ConsolidatedOp {
    Eq,
    Ne,
}

/// OR-consolidation: every branch must be a single `eq` (or single `ne`)
/// on the same field for the whole disjunction to collapse into one
/// native `in`/`not_in`.
fn try_consolidate(groups: &[AndGroup]) -> Option<(String, ConsolidatedOp, Vec<Value>)> {
    let mut field: Option<&str> = None;
    let mut op: Option<ConsolidatedOp> = None;
    let mut values = Vec::with_capacity(groups.len());

    for group in groups {
        let [only] = group.as_slice() else {
            return None;
        };
        let this_op = match only.operator {
            Operator::Eq => ConsolidatedOp::Eq,
            Operator::Ne => ConsolidatedOp::Ne,
            _ => return None,
        };
        match field {
            None => field = Some(&only.field),
            Some(f) if f == only.field => {}
            Some(_) => return None,
        }
        match (&op, &this_op) {
            (None, _) => op = Some(this_op),
            (Some(ConsolidatedOp::Eq), ConsolidatedOp::Eq) => {}
            (Some(ConsolidatedOp::Ne), ConsolidatedOp::Ne) => {}
            _ => return None,
        }
        values.push(only.value.clone());
    }

    Some((field?.to_string(), op?, values))
}

fn decide_or_native(
    (field, op, values): (String, ConsolidatedOp, Vec<Value>),
    mode: TranslateMode,
) -> Result<Translated> {
    let native_op = match op {
        ConsolidatedOp::Eq => NativeOp::In,
        ConsolidatedOp::Ne => NativeOp::NotIn,
    };
    decide(field, native_op, Value::List(values), usize::MAX, mode).map(|t| match t {
        Translated::Native(mut n) => {
            // `decide` sized its cardinality check against `usize::MAX` on
            // purpose — OR-consolidation always emits a native filter
            // when it succeeds, regardless of branch count, matching the
            // spec's "OR consolidation" testable property. Re-derive the
            // real cardinality check here instead.
            if let Value::List(items) = &n.value
                && items.len() > NATIVE_IN_LIMIT
            {
                return Translated::Manual(to_manual(
                    std::mem::take(&mut n.field),
                    n.op,
                    n.value,
                ));
            }
            Translated::Native(n)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::WhereFilter;
    use crate::operator::Operator;

    fn wf(field: &str, op: Operator, value: Value) -> WhereFilter {
        WhereFilter::new(field, op, value)
    }

    #[test]
    fn or_to_in_consolidation() {
        let or = OrFilter {
            groups: vec![
                vec![wf("name", Operator::Eq, Value::String("a".into()))],
                vec![wf("name", Operator::Eq, Value::String("b".into()))],
            ],
        };
        match translate(FilterInput::Or(or), TranslateMode::PreferNative).unwrap() {
            Translated::Native(n) => {
                assert_eq!(n.field, "name");
                assert!(matches!(n.op, NativeOp::In));
                assert_eq!(
                    n.value,
                    Value::List(vec![Value::String("a".into()), Value::String("b".into())])
                );
            }
            other => panic!("expected native in, got {other:?}"),
        }
    }

    #[test]
    fn empty_in_array_is_empty_query() {
        let w = wf("status", Operator::In, Value::List(vec![]));
        let err = translate(FilterInput::Where(w), TranslateMode::PreferNative).unwrap_err();
        assert!(matches!(err, AdapterError::EmptyQuery));
    }

    #[test]
    fn empty_not_in_array_is_unconditionally_true() {
        let w = wf("status", Operator::NotIn, Value::List(vec![]));
        let t = translate(FilterInput::Where(w), TranslateMode::PreferNative).unwrap();
        assert!(matches!(t, Translated::None));
    }

    #[test]
    fn eq_array_rewrites_to_in() {
        let w = wf(
            "status",
            Operator::Eq,
            Value::List(vec![Value::String("a".into()), Value::String("b".into())]),
        );
        match translate(FilterInput::Where(w), TranslateMode::PreferNative).unwrap() {
            Translated::Native(n) => assert!(matches!(n.op, NativeOp::In)),
            other => panic!("expected native in, got {other:?}"),
        }
    }

    #[test]
    fn large_in_list_falls_back_to_manual() {
        let items: Vec<Value> = (0..11).map(Value::Int).collect();
        let w = wf("score", Operator::In, Value::List(items));
        match translate(FilterInput::Where(w), TranslateMode::PreferNative).unwrap() {
            Translated::Manual(ManualPredicate::In(_, v)) => assert_eq!(v.len(), 11),
            other => panic!("expected manual in, got {other:?}"),
        }
    }

    #[test]
    fn native_only_rejects_contains() {
        let w = wf(
            "name",
            Operator::Contains,
            Value::String("al".into()),
        );
        let err = translate(FilterInput::Where(w), TranslateMode::NativeOnly).unwrap_err();
        assert!(matches!(err, AdapterError::NativeNotSupported { .. }));
    }

    #[test]
    fn manual_only_forces_in_memory_even_for_small_in() {
        let w = wf("status", Operator::In, Value::List(vec![Value::Int(1)]));
        match translate(FilterInput::Where(w), TranslateMode::ManualOnly).unwrap() {
            Translated::Manual(_) => {}
            other => panic!("expected manual, got {other:?}"),
        }
    }

    #[test]
    fn lt_with_array_reduces_to_max() {
        let w = wf(
            "score",
            Operator::Lt,
            Value::List(vec![Value::Int(3), Value::Int(9), Value::Int(1)]),
        );
        match translate(FilterInput::Where(w), TranslateMode::PreferNative).unwrap() {
            Translated::Native(n) => assert_eq!(n.value, Value::Int(9)),
            other => panic!("expected native lt, got {other:?}"),
        }
    }

    #[test]
    fn gt_with_array_reduces_to_min() {
        let w = wf(
            "score",
            Operator::Gt,
            Value::List(vec![Value::Int(3), Value::Int(9), Value::Int(1)]),
        );
        match translate(FilterInput::Where(w), TranslateMode::PreferNative).unwrap() {
            Translated::Native(n) => assert_eq!(n.value, Value::Int(1)),
            other => panic!("expected native gt, got {other:?}"),
        }
    }

    #[test]
    fn null_true_rewrites_to_eq_null() {
        let w = wf("deleted_at", Operator::Null, Value::Bool(true));
        match translate(FilterInput::Where(w), TranslateMode::PreferNative).unwrap() {
            Translated::Native(n) => {
                assert!(matches!(n.op, NativeOp::Eq));
                assert_eq!(n.value, Value::Null);
            }
            other => panic!("expected native eq null, got {other:?}"),
        }
    }

    #[test]
    fn mixed_operator_or_falls_back_to_manual_disjunction() {
        let or = OrFilter {
            groups: vec![
                vec![wf("name", Operator::Eq, Value::String("a".into()))],
                vec![wf("age", Operator::Gt, Value::Int(10))],
            ],
        };
        match translate(FilterInput::Or(or), TranslateMode::PreferNative).unwrap() {
            Translated::Manual(ManualPredicate::Or(children)) => assert_eq!(children.len(), 2),
            other => panic!("expected manual or, got {other:?}"),
        }
    }
}
