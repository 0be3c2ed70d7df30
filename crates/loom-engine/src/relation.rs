use loom_core::{AdapterError, Logger, Ref, Registry, Result, Value};
use loom_query::{NativeFilter, NativeOp};
use loom_store::{FieldOp, FieldValue, NativeQuery, WritePayload};

use crate::transaction::Transaction;
use crate::write_op::EditMode;

/// Descriptor for one end of a relation, carried on the attribute that
/// names the other model (`alias`). `is_meta` + `actual_alias` marks an
/// index/map attribute nested inside every element of a repeatable
/// component: its real storage path is `parent_alias[*].component_alias`
/// rather than a plain top-level field.
#[derive(Debug, Clone)]
pub struct RelationAttrInfo {
    pub alias: String,
    pub is_array: bool,
    pub filter: Option<String>,
    pub is_morph: bool,
    pub actual_alias: Option<String>,
    pub is_meta: bool,
}

impl RelationAttrInfo {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            is_array: false,
            filter: None,
            is_morph: false,
            actual_alias: None,
            is_meta: false,
        }
    }
}

/// One end of a relation: the model it lives on plus how it names the
/// other side.
#[derive(Debug, Clone)]
pub struct RelationEnd {
    pub model: String,
    pub attr: RelationAttrInfo,
    pub dominant: bool,
}

/// Pairs one `this_end` with the other model(s) it relates to. At least
/// one end must be dominant — the one whose attribute actually persists
/// the link; the non-dominant side is reconstructed on delete by
/// querying for dangling references.
pub struct RelationHandler {
    pub this_end: RelationEnd,
    pub other_ends: Vec<RelationEnd>,
}

fn as_ref_list(value: &Value) -> Vec<Ref> {
    match value {
        Value::Reference(r) => vec![r.clone()],
        Value::List(items) => items.iter().filter_map(Value::as_ref).cloned().collect(),
        _ => Vec::new(),
    }
}

fn diff_refs(prev: &[Ref], new: &[Ref]) -> (Vec<Ref>, Vec<Ref>) {
    let added = new.iter().filter(|r| !prev.contains(r)).cloned().collect();
    let removed = prev.iter().filter(|r| !new.contains(r)).cloned().collect();
    (added, removed)
}

fn wrap_morph(reference: Ref, is_morph: bool, filter: Option<&str>) -> Ref {
    if is_morph {
        Ref::morph(reference, filter.map(str::to_string))
    } else {
        reference
    }
}

impl RelationHandler {
    pub fn new(this_end: RelationEnd, other_ends: Vec<RelationEnd>) -> Self {
        Self { this_end, other_ends }
    }

    /// Propagate a write on `this_end`'s document to the other end(s) of
    /// the relation. `new` is the post-coercion write payload being
    /// merged for `reference`; on a dominant end this also normalises
    /// the alias's own value inside `new` to the fully-resolved ref list.
    pub fn update(
        &self,
        registry: &Registry,
        logger: &dyn Logger,
        reference: &Ref,
        prev: Option<&Value>,
        new: &mut WritePayload,
        edit_mode: EditMode,
        txn: &mut dyn Transaction,
    ) -> Result<()> {
        if self.this_end.dominant {
            self.update_dominant(registry, logger, reference, prev, new, edit_mode, txn)
        } else if edit_mode == EditMode::Delete {
            self.remove_dangling(registry, logger, reference, txn)
        } else {
            Ok(())
        }
    }

    fn update_dominant(
        &self,
        registry: &Registry,
        logger: &dyn Logger,
        reference: &Ref,
        prev: Option<&Value>,
        new: &mut WritePayload,
        edit_mode: EditMode,
        txn: &mut dyn Transaction,
    ) -> Result<()> {
        let alias = &self.this_end.attr.alias;

        if edit_mode == EditMode::Update && !new.contains_key(alias) {
            return Ok(());
        }

        let new_value = match new.get(alias) {
            Some(FieldValue::Value(v)) => v.clone(),
            _ => Value::Null,
        };
        let prev_refs = prev
            .and_then(|p| match p {
                Value::Document(map) => map.get(alias),
                _ => None,
            })
            .map(as_ref_list)
            .unwrap_or_default();
        let new_refs = as_ref_list(&new_value);

        let normalized = if self.this_end.attr.is_array {
            Value::List(
                new_refs
                    .iter()
                    .cloned()
                    .map(|r| Value::Reference(wrap_morph(r, self.this_end.attr.is_morph, self.this_end.attr.filter.as_deref())))
                    .collect(),
            )
        } else {
            new_refs
                .first()
                .cloned()
                .map(|r| Value::Reference(wrap_morph(r, self.this_end.attr.is_morph, self.this_end.attr.filter.as_deref())))
                .unwrap_or(Value::Null)
        };
        new.insert(alias.clone(), FieldValue::Value(normalized));

        let (added, removed) = diff_refs(&prev_refs, &new_refs);

        for other in &self.other_ends {
            for r in &added {
                self.apply_to_other_side(registry, logger, other, r, reference, true, txn)?;
            }
            for r in &removed {
                self.apply_to_other_side(registry, logger, other, r, reference, false, txn)?;
            }
        }
        Ok(())
    }

    fn apply_to_other_side(
        &self,
        registry: &Registry,
        logger: &dyn Logger,
        other: &RelationEnd,
        target: &Ref,
        this_ref: &Ref,
        adding: bool,
        txn: &mut dyn Transaction,
    ) -> Result<()> {
        let this_as_value = wrap_morph(this_ref.clone(), other.attr.is_morph, other.attr.filter.as_deref());

        if other.attr.is_meta {
            return self.apply_meta(registry, logger, other, target, this_as_value, adding, txn);
        }

        let mut payload = WritePayload::new();
        if other.attr.is_array {
            let op = if adding {
                FieldOp::ArrayUnion(vec![Value::Reference(this_as_value)])
            } else {
                FieldOp::ArrayRemove(vec![Value::Reference(this_as_value)])
            };
            payload.insert(other.attr.alias.clone(), FieldValue::Op(op));
        } else {
            let value = if adding { Value::Reference(this_as_value) } else { Value::Null };
            payload.insert(other.attr.alias.clone(), FieldValue::Value(value));
        }
        txn.merge_write_internal(target, registry, Some(payload), false, false)
    }

    /// Walk `parent_alias[*].component_alias` on the other document and
    /// apply the add/remove element-wise, writing back with
    /// `update_relations: false` implied — this path never recurses
    /// into another relation update.
    fn apply_meta(
        &self,
        registry: &Registry,
        logger: &dyn Logger,
        other: &RelationEnd,
        target: &Ref,
        this_as_value: Ref,
        adding: bool,
        txn: &mut dyn Transaction,
    ) -> Result<()> {
        let parent_alias = other
            .attr
            .actual_alias
            .as_deref()
            .ok_or_else(|| AdapterError::unsupported("meta relation attribute is missing actual_alias"))?;
        let component_alias = &other.attr.alias;

        let fetched = txn.get_atomic(std::slice::from_ref(target), registry)?;
        let Some(Some(doc)) = fetched.into_iter().next() else {
            logger.warn(&format!(
                "meta relation target missing, skipping component walk: target={:?}",
                target.id()
            ));
            return Ok(());
        };

        let Some(Value::List(items)) = doc.get(parent_alias) else {
            return Ok(());
        };

        let mut updated = Vec::with_capacity(items.len());
        for item in items {
            let Value::Document(mut map) = item.clone() else {
                updated.push(item.clone());
                continue;
            };
            let mut refs = map.get(component_alias).map(as_ref_list).unwrap_or_default();
            if adding {
                if !refs.contains(&this_as_value) {
                    refs.push(this_as_value.clone());
                }
            } else {
                refs.retain(|r| r != &this_as_value);
            }
            map.insert(
                component_alias.clone(),
                Value::List(refs.into_iter().map(Value::Reference).collect()),
            );
            updated.push(Value::Document(map));
        }

        let mut payload = WritePayload::new();
        payload.insert(parent_alias.to_string(), FieldValue::Value(Value::List(updated)));
        txn.merge_write_internal(target, registry, Some(payload), false, false)
    }

    /// Non-dominant delete: query each other end for rows still
    /// referencing `reference` and clear them.
    fn remove_dangling(
        &self,
        registry: &Registry,
        logger: &dyn Logger,
        reference: &Ref,
        txn: &mut dyn Transaction,
    ) -> Result<()> {
        for other in &self.other_ends {
            let model = registry.require_model(&other.model)?;
            let max = model.options.max_query_size.unwrap_or(10);

            // The reference in-memory store has no native `array_contains`
            // operator, so an array-valued other end falls back to a
            // bounded unfiltered scan, filtered for containment here; a
            // non-array end can use a plain equality filter natively.
            let native_query = if other.attr.is_array {
                NativeQuery {
                    collection: model.collection_name.clone(),
                    filters: Vec::new(),
                    sorts: Vec::new(),
                    offset: 0,
                    limit: Some(max),
                }
            } else {
                NativeQuery {
                    collection: model.collection_name.clone(),
                    filters: vec![NativeFilter {
                        field: other.attr.alias.clone(),
                        op: NativeOp::Eq,
                        value: Value::Reference(reference.clone()),
                    }],
                    sorts: Vec::new(),
                    offset: 0,
                    limit: Some(max),
                }
            };
            let rows = match txn.query(&native_query) {
                Ok(rows) => rows,
                Err(e) => {
                    logger.warn(&format!("dangling reference scan failed: {e}"));
                    continue;
                }
            };
            let rows: Vec<_> = if other.attr.is_array {
                rows.into_iter()
                    .filter(|(_, row)| {
                        matches!(
                            row.get(&other.attr.alias),
                            Some(Value::List(items)) if items.iter().any(|v| v.as_ref() == Some(reference))
                        )
                    })
                    .collect()
            } else {
                rows
            };
            for (id, _row) in rows {
                let other_ref = Ref::normal(model.collection_name.clone(), id)?;
                let mut payload = WritePayload::new();
                let clear = if other.attr.is_array {
                    FieldValue::Op(FieldOp::ArrayRemove(vec![Value::Reference(reference.clone())]))
                } else {
                    FieldValue::Value(Value::Null)
                };
                payload.insert(other.attr.alias.clone(), clear);
                txn.merge_write_internal(&other_ref, registry, Some(payload), false, false)?;
            }
        }
        Ok(())
    }

    /// Materialise the refs named by this relation's dominant attribute
    /// (or, on the non-dominant side, found by querying) non-atomically.
    /// Refs whose target no longer exists are skipped with a warning.
    pub fn populate_related(
        &self,
        registry: &Registry,
        logger: &dyn Logger,
        data: &Value,
        txn: &mut dyn Transaction,
    ) -> Result<Value> {
        let Value::Document(map) = data else {
            return Ok(data.clone());
        };
        let mut out = map.clone();
        let Some(field) = out.get(&self.this_end.attr.alias).cloned() else {
            return Ok(Value::Document(out));
        };
        let refs = as_ref_list(&field);
        if refs.is_empty() {
            return Ok(Value::Document(out));
        }
        let fetched = txn.get_non_atomic(&refs, registry)?;
        let mut populated = Vec::with_capacity(refs.len());
        for (r, doc) in refs.iter().zip(fetched) {
            match doc {
                Some(fields) => populated.push(Value::Document(fields)),
                None => logger.warn(&format!("dangling reference during population: id={}", r.id())),
            }
        }
        let value = if self.this_end.attr.is_array {
            Value::List(populated)
        } else {
            populated.into_iter().next().unwrap_or(Value::Null)
        };
        out.insert(self.this_end.attr.alias.clone(), value);
        Ok(Value::Document(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_refs_computes_added_and_removed() {
        let a = Ref::normal("tags", "1").unwrap();
        let b = Ref::normal("tags", "2").unwrap();
        let c = Ref::normal("tags", "3").unwrap();
        let (added, removed) = diff_refs(&[a.clone(), b.clone()], &[b, c]);
        assert_eq!(added, vec![Ref::normal("tags", "3").unwrap()]);
        assert_eq!(removed, vec![Ref::normal("tags", "1").unwrap()]);
    }

    #[test]
    fn wrap_morph_only_wraps_when_marked() {
        let r = Ref::normal("images", "1").unwrap();
        assert!(!wrap_morph(r.clone(), false, None).is_morph());
        assert!(wrap_morph(r, true, Some("cover")).is_morph());
    }
}
