use chrono::{DateTime, Utc};
use loom_core::{Logger, Model, Ref, Registry, Result, Value};
use loom_coerce::{bson_to_value, coerce_to_store, resolve_references, CoerceOptions};
use loom_store::{FieldValue, WritePayload};

use crate::relation::RelationHandler;
use crate::transaction::Transaction;
use crate::write_op::EditMode;

/// `update_relations`/`run_on_change_hook` default to `true` when unset;
/// `run_on_change_hook` additionally defaults to whatever
/// `update_relations` resolved to when left unset.
#[derive(Debug, Clone, Default)]
pub struct LifecycleOptions {
    pub update_relations: Option<bool>,
    pub run_on_change_hook: Option<bool>,
}

pub type SuccessHook = Box<dyn FnOnce() + Send>;

/// Invoked with `(prev, new, transaction, ref)` before relation mutation;
/// returning `Some(hook)` registers a success hook on the transaction.
pub type OnChangeHook<'a> =
    dyn Fn(Option<&Value>, &Value, &mut dyn Transaction, &Ref) -> Result<Option<SuccessHook>> + 'a;

fn document_to_payload(value: &Value) -> WritePayload {
    match value {
        Value::Document(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), FieldValue::Value(v.clone())))
            .collect(),
        _ => WritePayload::new(),
    }
}

/// §4.5: coerce the write, run the on-change hook, propagate relation
/// deltas, and merge the resulting write into `transaction`. Returns the
/// coerced `new_data` the caller sees as the operation's result.
///
/// `update_relations=false` with no hook is the fast path that bypasses
/// the extra lifecycle steps: here that means skipping the
/// on-change/relation steps and merging the write directly, still
/// through the same transaction (the workspace has no store binding
/// that offers a cheaper untransacted write than `merge_write_internal`
/// plus commit, so "bypass" is realised as "skip the extra work", not as
/// a different I/O path).
#[allow(clippy::too_many_arguments)]
pub fn run_update_lifecycle(
    registry: &Registry,
    logger: &dyn Logger,
    model: &Model,
    reference: &Ref,
    data: Option<Value>,
    edit_mode: EditMode,
    opts: LifecycleOptions,
    timestamp: DateTime<Utc>,
    on_change: Option<&OnChangeHook<'_>>,
    relations: &[RelationHandler],
    txn: &mut dyn Transaction,
) -> Result<Value> {
    let new_data = coerce_write(registry, logger, model, reference, data, edit_mode, timestamp)?;

    let update_relations = opts.update_relations.unwrap_or(true);
    let run_hook = opts.run_on_change_hook.unwrap_or(update_relations);

    if !update_relations && !run_hook {
        let create = edit_mode == EditMode::Create;
        let upsert = matches!(edit_mode, EditMode::Set | EditMode::SetMerge);
        let payload = match edit_mode {
            EditMode::Delete => None,
            _ => Some(document_to_payload(&new_data)),
        };
        txn.merge_write_internal(reference, registry, payload, create, upsert)?;
        return Ok(new_data);
    }

    let prev = if edit_mode == EditMode::Update {
        txn.get_atomic(std::slice::from_ref(reference), registry)?
            .into_iter()
            .next()
            .flatten()
            .map(Value::Document)
    } else {
        None
    };

    if run_hook && let Some(hook) = on_change {
        if let Some(success_hook) = hook(prev.as_ref(), &new_data, txn, reference)? {
            txn.add_success_hook(success_hook);
        }
    }

    let mut payload = match edit_mode {
        EditMode::Delete => WritePayload::new(),
        _ => document_to_payload(&new_data),
    };

    if update_relations {
        for relation in relations {
            relation.update(registry, logger, reference, prev.as_ref(), &mut payload, edit_mode, txn)?;
        }
    }

    let create = edit_mode == EditMode::Create;
    let upsert = matches!(edit_mode, EditMode::Set | EditMode::SetMerge);
    let data_for_write = if edit_mode == EditMode::Delete { None } else { Some(payload) };
    txn.merge_write_internal(reference, registry, data_for_write, create, upsert)?;

    Ok(new_data)
}

fn coerce_write(
    registry: &Registry,
    logger: &dyn Logger,
    model: &Model,
    reference: &Ref,
    data: Option<Value>,
    edit_mode: EditMode,
    timestamp: DateTime<Utc>,
) -> Result<Value> {
    let Some(value) = data else {
        // Missing data is allowed for delete (and for any other mode the
        // caller chose not to supply a body for).
        return Ok(Value::Document(Default::default()));
    };

    let coerce_opts = CoerceOptions {
        doc_id: Some(reference.id().to_string()),
        field_path: None,
        apply_timestamps: matches!(edit_mode, EditMode::Create | EditMode::Update | EditMode::Set | EditMode::SetMerge),
        is_create: edit_mode == EditMode::Create,
        now: Some(timestamp),
        strict_references: true,
        ignore_mismatched_references: model.options.ignore_mismatched_references,
    };

    let bson = coerce_to_store(registry, logger, model, &value, &coerce_opts)?;
    let mut coerced = bson_to_value(&bson);

    // `coerce_to_store` round-trips through bson for type validation, but a
    // reference has no bson wire shape and comes back null there; overlay
    // the real resolved `Ref`s (or lists of them) back on top.
    let relation_fields = resolve_references(registry, logger, model, &value, &coerce_opts)?;
    if let Value::Document(map) = &mut coerced {
        map.extend(relation_fields);
    }

    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use loom_core::{Attribute, CapturingLogger, Model, PrimitiveType, Registry};
    use loom_store::memory::MemoryStore;
    use loom_store::Store;
    use std::sync::Arc;

    use super::*;
    use crate::transaction::ReadWriteTransaction;

    fn article_model() -> Model {
        let mut m = Model::new("article", "id");
        m.collection_name = "articles".into();
        m.attributes
            .insert("title".into(), Attribute::Primitive(PrimitiveType::String));
        m
    }

    #[test]
    fn create_merges_coerced_payload_into_the_transaction() {
        let mut registry = Registry::new();
        registry.register(article_model());
        let logger = CapturingLogger::default();
        let store = MemoryStore::default();
        let reference = Ref::normal("articles", "1").unwrap();

        store
            .run_transaction(false, |txn| {
                let fetch: crate::transaction::NonAtomicFetch = Arc::new(|_refs| Ok(Vec::new()));
                let mut engine_txn =
                    ReadWriteTransaction::new(txn, Arc::new(CapturingLogger::default()), 1, fetch);
                let data = Value::Document(
                    [("title".to_string(), Value::String("hello".into()))]
                        .into_iter()
                        .collect(),
                );
                let result = run_update_lifecycle(
                    &registry,
                    &logger,
                    registry.require_model("article").unwrap().as_ref(),
                    &reference,
                    Some(data),
                    EditMode::Create,
                    LifecycleOptions {
                        update_relations: Some(false),
                        run_on_change_hook: Some(false),
                    },
                    Utc::now(),
                    None,
                    &[],
                    &mut engine_txn,
                )
                .unwrap();
                let Value::Document(map) = result else { panic!() };
                assert_eq!(map.get("title"), Some(&Value::String("hello".into())));
                assert_eq!(engine_txn.writes.len(), 1);
                engine_txn.commit()
            })
            .unwrap();
    }
}
