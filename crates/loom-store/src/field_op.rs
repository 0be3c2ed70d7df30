use loom_core::Value;

/// A store field-value sentinel. These never reach the store's wire
/// format as literal values — the binding (or, for `VirtualCollection`,
/// the in-memory replay in [`FieldOp::apply`]) interprets them instead.
#[derive(Debug, Clone)]
pub enum FieldOp {
    Delete,
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    Increment(f64),
}

impl FieldOp {
    /// Replay this sentinel onto a field's current value. `None` means the
    /// field should be removed from the document entirely (`Delete`, or an
    /// `ArrayRemove`/`ArrayUnion` that collapses to empty is still `Some`
    /// with an empty list — only `Delete` removes the key).
    pub fn apply(&self, current: Option<&Value>) -> Option<Value> {
        match self {
            Self::Delete => None,
            Self::ArrayUnion(additions) => {
                let mut items = current_list(current);
                for add in additions {
                    if !items.contains(add) {
                        items.push(add.clone());
                    }
                }
                Some(Value::List(items))
            }
            Self::ArrayRemove(removals) => {
                let items = current_list(current);
                Some(Value::List(
                    items.into_iter().filter(|i| !removals.contains(i)).collect(),
                ))
            }
            Self::Increment(delta) => {
                let was_int = matches!(current, Some(Value::Int(_)) | None) && delta.fract() == 0.0;
                let base = match current {
                    Some(Value::Int(n)) => *n as f64,
                    Some(Value::Float(n)) => *n,
                    _ => 0.0,
                };
                let sum = base + delta;
                Some(if was_int {
                    Value::Int(sum as i64)
                } else {
                    Value::Float(sum)
                })
            }
        }
    }
}

fn current_list(current: Option<&Value>) -> Vec<Value> {
    match current {
        Some(Value::List(items)) => items.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_union_deduplicates() {
        let current = Value::List(vec![Value::Int(1)]);
        let op = FieldOp::ArrayUnion(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            op.apply(Some(&current)),
            Some(Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn array_remove_drops_matching_entries() {
        let current = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let op = FieldOp::ArrayRemove(vec![Value::Int(2)]);
        assert_eq!(
            op.apply(Some(&current)),
            Some(Value::List(vec![Value::Int(1), Value::Int(3)]))
        );
    }

    #[test]
    fn increment_stays_integer_for_integer_delta() {
        let op = FieldOp::Increment(2.0);
        assert_eq!(op.apply(Some(&Value::Int(3))), Some(Value::Int(5)));
    }

    #[test]
    fn increment_with_no_prior_value_starts_at_zero() {
        let op = FieldOp::Increment(1.0);
        assert_eq!(op.apply(None), Some(Value::Int(1)));
    }

    #[test]
    fn delete_removes_the_field() {
        assert_eq!(FieldOp::Delete.apply(Some(&Value::Int(1))), None);
    }
}
