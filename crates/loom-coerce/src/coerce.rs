use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bson::Bson;
use chrono::Utc;
use loom_core::{AdapterError, Attribute, Logger, Model, PrimitiveType, Ref, Registry, Result, Value};

use crate::options::CoerceOptions;
use crate::reference::{coerce_to_reference, RefInput};

/// `__component` discriminator key on a dynamic-zone element.
const COMPONENT_TAG: &str = "__component";

/// Convert a raw store-read document into the shape the CMS host sees:
/// sets (or drops) the primary key, downgrades store big-integers to
/// regular numbers, decodes `json` attributes stored as text, and
/// resolves reference wire shapes to `Ref`s.
pub fn coerce_to_model(
    registry: &Registry,
    logger: &dyn Logger,
    model: &Model,
    raw: &Bson,
    opts: &CoerceOptions,
) -> Result<Value> {
    let Bson::Document(doc) = raw else {
        return Err(AdapterError::coercion(
            opts.field_path.as_deref().unwrap_or("<root>"),
            "expected a document",
        ));
    };

    let mut out = BTreeMap::new();
    for (alias, attribute) in &model.attributes {
        let Some(raw_value) = doc.get(alias) else {
            continue;
        };
        let path = child_path(opts, alias);
        let value = coerce_attribute_to_model(registry, logger, attribute, raw_value, &path, opts)?;
        out.insert(alias.clone(), value);
    }

    if opts.is_root() {
        if let Some(id) = &opts.doc_id {
            out.insert(model.primary_key.clone(), Value::String(id.clone()));
        } else {
            out.remove(&model.primary_key);
        }
    }

    Ok(Value::Document(out))
}

/// Convert a CMS-host write payload into what gets persisted: validates
/// typed primitives, recurses into components/dynamic zones, resolves
/// references, and (at the root) stamps `created_at`/`updated_at` when
/// the model opts into timestamps.
pub fn coerce_to_store(
    registry: &Registry,
    logger: &dyn Logger,
    model: &Model,
    value: &Value,
    opts: &CoerceOptions,
) -> Result<Bson> {
    let Value::Document(map) = value else {
        return Err(AdapterError::coercion(
            opts.field_path.as_deref().unwrap_or("<root>"),
            "expected a document",
        ));
    };

    let mut out = bson::Document::new();
    for (alias, attribute) in &model.attributes {
        let Some(field_value) = map.get(alias) else {
            continue;
        };
        let path = child_path(opts, alias);
        let child_opts = CoerceOptions {
            field_path: Some(path.clone()),
            ..opts.clone()
        };
        let bson_value =
            coerce_attribute_to_store(registry, logger, attribute, field_value, &child_opts)?;
        out.insert(alias.clone(), bson_value);
    }

    if opts.doc_id.is_some() || opts.is_root() {
        match &opts.doc_id {
            Some(id) => {
                out.insert(model.primary_key.clone(), id.clone());
            }
            None => {
                out.remove(&model.primary_key);
            }
        }
    }
    if opts.is_root()
        && opts.apply_timestamps
        && model.options.timestamps
        && let Some(now) = opts.now
    {
        out.insert("updated_at", bson::DateTime::from_chrono(now));
        if opts.is_create {
            out.insert("created_at", bson::DateTime::from_chrono(now));
        }
    }

    Ok(Bson::Document(out))
}

/// Process-wide counter backing [`mint_component_id`] — coercion has no
/// handle to the component's own `ComponentCollection`, whose `auto_id()`
/// this mirrors the shape of.
static COMPONENT_ID_SEQ: AtomicU64 = AtomicU64::new(1);

fn mint_component_id(model: &Model) -> String {
    let n = COMPONENT_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{n}", model.name)
}

/// §4.2: a component keeps its existing id if it has one; otherwise, when
/// the component's own schema opts into `ensure_component_ids`, it gets a
/// freshly minted one. A component with neither is written without an id.
fn component_doc_id(model: &Model, value: &Value) -> Option<String> {
    let existing = match value {
        Value::Document(map) => match map.get(&model.primary_key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    };
    existing.or_else(|| model.options.ensure_component_ids.then(|| mint_component_id(model)))
}

/// Resolve every relation-typed attribute on `model` straight off the
/// host-supplied `value`, keyed by alias. `coerce_to_store` round-trips the
/// rest of the document through `bson` for type validation, but a
/// reference has no bson wire shape there and comes back `Null` — this is
/// the path that gives the caller back the real (validated) `Ref`s to
/// overlay on top of that round-tripped document. Array relations resolve
/// element-wise; an attribute absent from `value` is omitted rather than
/// nulled, matching `coerce_to_store`'s "missing field, skip" rule so a
/// partial update that does not touch a relation leaves it untouched.
pub fn resolve_references(
    registry: &Registry,
    logger: &dyn Logger,
    model: &Model,
    value: &Value,
    opts: &CoerceOptions,
) -> Result<BTreeMap<String, Value>> {
    let Value::Document(map) = value else {
        return Ok(BTreeMap::new());
    };

    let mut out = BTreeMap::new();
    for (alias, attribute) in &model.attributes {
        let Attribute::Relation {
            target_model,
            plugin,
            is_array,
            ..
        } = attribute
        else {
            continue;
        };
        let Some(field_value) = map.get(alias) else {
            continue;
        };
        let target = registry.get_model(target_model, plugin.as_deref());
        let path = child_path(opts, alias);
        let field_opts = CoerceOptions {
            field_path: Some(path),
            ..opts.clone()
        };

        let resolved = if *is_array {
            let items = field_value.as_list().unwrap_or(&[]);
            let mut refs = Vec::with_capacity(items.len());
            for item in items {
                if let Some(r) = resolve_reference_value(registry, logger, item, target.as_deref(), &field_opts)? {
                    refs.push(Value::Reference(r));
                }
            }
            Value::List(refs)
        } else {
            resolve_reference_value(registry, logger, field_value, target.as_deref(), &field_opts)?
                .map(Value::Reference)
                .unwrap_or(Value::Null)
        };
        out.insert(alias.clone(), resolved);
    }
    Ok(out)
}

fn resolve_reference_value(
    registry: &Registry,
    logger: &dyn Logger,
    value: &Value,
    target: Option<&Model>,
    opts: &CoerceOptions,
) -> Result<Option<Ref>> {
    let input = match value {
        Value::Reference(r) => RefInput::Existing(r.clone()),
        Value::String(s) if s.starts_with('/') => RefInput::LegacyDeepPath(s),
        Value::String(s) if s.contains('/') => RefInput::QualifiedPath(s),
        Value::String(s) => RefInput::BareId(s),
        Value::Null => return Ok(None),
        other => {
            return Err(AdapterError::coercion(
                opts.field_path.as_deref().unwrap_or("<root>"),
                format!("reference attribute expects a string id, path, or Ref, got {other:?}"),
            ));
        }
    };
    coerce_to_reference(registry, logger, input, target, opts.strict_references, opts.ignore_mismatched_references)
}

fn child_path(opts: &CoerceOptions, alias: &str) -> String {
    match &opts.field_path {
        Some(parent) => format!("{parent}.{alias}"),
        None => alias.to_string(),
    }
}

fn coerce_attribute_to_model(
    registry: &Registry,
    logger: &dyn Logger,
    attribute: &Attribute,
    raw: &Bson,
    path: &str,
    opts: &CoerceOptions,
) -> Result<Value> {
    match attribute {
        Attribute::Primitive(p) => primitive_from_store(*p, raw, path),
        Attribute::Component { component_model, repeatable } => {
            let model = registry.require_model(component_model)?;
            if *repeatable {
                let Bson::Array(items) = raw else {
                    return Err(AdapterError::coercion(path, "repeatable component expects an array"));
                };
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let nested_opts = CoerceOptions::nested(format!("{path}[{i}]"));
                    out.push(coerce_to_model(registry, logger, &model, item, &nested_opts)?);
                }
                Ok(Value::List(out))
            } else {
                let nested_opts = CoerceOptions::nested(path);
                coerce_to_model(registry, logger, &model, raw, &nested_opts)
            }
        }
        Attribute::DynamicZone { .. } => {
            let Bson::Array(items) = raw else {
                return Err(AdapterError::coercion(path, "dynamic zone expects an array"));
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let Bson::Document(doc) = item else {
                    return Err(AdapterError::coercion(path, "dynamic zone element must be a document"));
                };
                let component_name = doc
                    .get_str(COMPONENT_TAG)
                    .map_err(|_| AdapterError::coercion(path, "dynamic zone element missing __component"))?;
                let component_model = registry.require_model(component_name)?;
                let nested_opts = CoerceOptions::nested(format!("{path}[{i}]"));
                let mut coerced = coerce_to_model(registry, logger, &component_model, item, &nested_opts)?;
                if let Value::Document(m) = &mut coerced {
                    m.insert(COMPONENT_TAG.to_string(), Value::String(component_name.to_string()));
                }
                out.push(coerced);
            }
            Ok(Value::List(out))
        }
        Attribute::Relation {
            target_model,
            plugin,
            is_array,
            ..
        } => {
            let target = registry.get_model(target_model, plugin.as_deref());
            if *is_array {
                let Bson::Array(items) = raw else {
                    return Err(AdapterError::coercion(path, "array relation expects an array"));
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let input = bson_to_ref_input(item, path)?;
                    let resolved = coerce_to_reference(
                        registry,
                        logger,
                        input,
                        target.as_deref(),
                        opts.strict_references,
                        opts.ignore_mismatched_references,
                    )?;
                    if let Some(r) = resolved {
                        out.push(Value::Reference(r));
                    }
                }
                return Ok(Value::List(out));
            }
            let input = bson_to_ref_input(raw, path)?;
            let resolved = coerce_to_reference(
                registry,
                logger,
                input,
                target.as_deref(),
                opts.strict_references,
                opts.ignore_mismatched_references,
            )?;
            Ok(resolved.map(Value::Reference).unwrap_or(Value::Null))
        }
    }
}

fn coerce_attribute_to_store(
    registry: &Registry,
    logger: &dyn Logger,
    attribute: &Attribute,
    value: &Value,
    opts: &CoerceOptions,
) -> Result<Bson> {
    match attribute {
        Attribute::Primitive(p) => primitive_to_store(*p, value, &opts.field_path.clone().unwrap_or_default()),
        Attribute::Component { component_model, repeatable } => {
            let model = registry.require_model(component_model)?;
            if *repeatable {
                let Value::List(items) = value else {
                    return Err(AdapterError::coercion(
                        opts.field_path.as_deref().unwrap_or("<root>"),
                        "repeatable component expects a list",
                    ));
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let item_opts = CoerceOptions {
                        doc_id: component_doc_id(&model, item),
                        ..opts.clone()
                    };
                    out.push(coerce_to_store(registry, logger, &model, item, &item_opts)?);
                }
                Ok(Bson::Array(out))
            } else {
                let item_opts = CoerceOptions {
                    doc_id: component_doc_id(&model, value),
                    ..opts.clone()
                };
                coerce_to_store(registry, logger, &model, value, &item_opts)
            }
        }
        Attribute::DynamicZone { .. } => {
            let Value::List(items) = value else {
                return Err(AdapterError::coercion(
                    opts.field_path.as_deref().unwrap_or("<root>"),
                    "dynamic zone expects a list",
                ));
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let Value::Document(m) = item else {
                    return Err(AdapterError::coercion(
                        opts.field_path.as_deref().unwrap_or("<root>"),
                        "dynamic zone element must be a document",
                    ));
                };
                let component_name = match m.get(COMPONENT_TAG) {
                    Some(Value::String(s)) => s.clone(),
                    _ => {
                        return Err(AdapterError::coercion(
                            opts.field_path.as_deref().unwrap_or("<root>"),
                            "dynamic zone element missing __component",
                        ));
                    }
                };
                let component_model = registry.require_model(&component_name)?;
                let item_opts = CoerceOptions {
                    doc_id: component_doc_id(&component_model, item),
                    ..opts.clone()
                };
                let mut bson_doc = coerce_to_store(registry, logger, &component_model, item, &item_opts)?;
                if let Bson::Document(d) = &mut bson_doc {
                    d.insert(COMPONENT_TAG, component_name);
                }
                out.push(bson_doc);
            }
            Ok(Bson::Array(out))
        }
        // References have no bson wire shape here; `resolve_references`
        // overlays the real, validated `Ref`s back onto this document
        // afterwards. This pass only checks the shape is one a reference
        // attribute could plausibly hold.
        Attribute::Relation { is_array, .. } => match value {
            Value::Reference(_) | Value::String(_) | Value::Null => Ok(Bson::Null),
            Value::List(items) if *is_array => {
                Ok(Bson::Array(items.iter().map(|_| Bson::Null).collect()))
            }
            other => Err(AdapterError::coercion(
                opts.field_path.as_deref().unwrap_or("<root>"),
                format!("expected a reference, id string, or null, got {other:?}"),
            )),
        },
    }
}

fn bson_to_ref_input<'a>(raw: &'a Bson, path: &str) -> Result<RefInput<'a>> {
    match raw {
        Bson::String(s) if s.starts_with('/') => Ok(RefInput::LegacyDeepPath(s)),
        Bson::String(s) if s.contains('/') => Ok(RefInput::QualifiedPath(s)),
        Bson::String(s) => Ok(RefInput::BareId(s)),
        _ => Err(AdapterError::coercion(
            path,
            "reference attribute expects a string id or path",
        )),
    }
}

fn primitive_from_store(kind: PrimitiveType, raw: &Bson, path: &str) -> Result<Value> {
    use PrimitiveType::*;
    match kind {
        Integer | BigInteger => match raw {
            Bson::Int32(n) => Ok(Value::Int(*n as i64)),
            Bson::Int64(n) => Ok(Value::Int(*n)),
            Bson::Double(n) if n.fract() == 0.0 => Ok(Value::Int(*n as i64)),
            Bson::Decimal128(d) => d
                .to_string()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| AdapterError::coercion(path, "big-integer value out of i64 range")),
            other => Err(AdapterError::coercion(path, format!("not an integer: {other:?}"))),
        },
        Float | Decimal => match raw {
            Bson::Double(n) => Ok(Value::Float(*n)),
            Bson::Int32(n) => Ok(Value::Float(*n as f64)),
            Bson::Int64(n) => Ok(Value::Float(*n as f64)),
            other => Err(AdapterError::coercion(path, format!("not a number: {other:?}"))),
        },
        String | Text | Email | Uid | Enumeration => match raw {
            Bson::String(s) => Ok(Value::String(s.clone())),
            other => Err(AdapterError::coercion(path, format!("not a string: {other:?}"))),
        },
        Password => match raw {
            Bson::String(s) => Ok(Value::String(s.clone())),
            other => Err(AdapterError::coercion(path, format!("not a string: {other:?}"))),
        },
        Json => match raw {
            Bson::String(s) => serde_json::from_str::<serde_json::Value>(s)
                .map_err(|e| AdapterError::coercion(path, format!("invalid json text: {e}")))
                .map(json_to_value),
            other => Ok(bson_to_value_lossy(other)),
        },
        Date | Time | DateTime | Timestamp => match raw {
            Bson::DateTime(dt) => Ok(Value::DateTime(dt.to_chrono())),
            Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|e| AdapterError::coercion(path, format!("invalid date/time: {e}"))),
            other => Err(AdapterError::coercion(path, format!("not a date/time: {other:?}"))),
        },
        Boolean => match raw {
            Bson::Boolean(b) => Ok(Value::Bool(*b)),
            other => Err(AdapterError::coercion(path, format!("not a boolean: {other:?}"))),
        },
    }
}

fn primitive_to_store(kind: PrimitiveType, value: &Value, path: &str) -> Result<Bson> {
    use PrimitiveType::*;
    match kind {
        Integer | BigInteger => match value {
            Value::Int(n) => Ok(Bson::Int64(*n)),
            Value::Float(n) if n.fract() == 0.0 => Ok(Bson::Int64(*n as i64)),
            other => Err(AdapterError::coercion(path, format!("not an integer: {other:?}"))),
        },
        Float | Decimal => match value {
            Value::Float(n) => Ok(Bson::Double(*n)),
            Value::Int(n) => Ok(Bson::Double(*n as f64)),
            other => Err(AdapterError::coercion(path, format!("not a number: {other:?}"))),
        },
        String | Text | Email | Uid | Enumeration | Password => match value {
            Value::String(s) => Ok(Bson::String(s.clone())),
            other => Err(AdapterError::coercion(path, format!("not a string: {other:?}"))),
        },
        Json => {
            let json = value_to_json(value);
            let text = serde_json::to_string(&json)
                .map_err(|e| AdapterError::coercion(path, format!("cannot serialize json: {e}")))?;
            Ok(Bson::String(text))
        }
        Date | Time | DateTime | Timestamp => match value {
            Value::DateTime(dt) => Ok(Bson::DateTime(bson::DateTime::from_chrono(*dt))),
            other => Err(AdapterError::coercion(path, format!("not a date/time: {other:?}"))),
        },
        Boolean => match value {
            Value::Bool(b) => Ok(Bson::Boolean(*b)),
            other => Err(AdapterError::coercion(path, format!("not a boolean: {other:?}"))),
        },
    }
}

/// Lossy `Value -> Bson` conversion for container shapes that carry no
/// schema (e.g. the bare document handed to `Store::create`/`update`
/// after `coerce_to_store` has already validated the typed attributes).
/// `Reference` has no bson-wire shape of its own here; callers resolve
/// references through `coerce_to_store`'s attribute dispatch before
/// reaching this, so it only ever sees already-flattened scalars.
pub fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(n) => Bson::Int64(*n),
        Value::Float(n) => Bson::Double(*n),
        Value::String(s) => Bson::String(s.clone()),
        Value::Bytes(b) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: b.clone(),
        }),
        Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Value::Reference(_) => Bson::Null,
        Value::List(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Document(map) => {
            Bson::Document(map.iter().map(|(k, v)| (k.clone(), value_to_bson(v))).collect())
        }
    }
}

/// The inverse of [`value_to_bson`] — public so callers that read a raw
/// document back from a bson-native store binding (anything other than
/// the in-memory reference store, which is `Value`-native already) can
/// feed it into `coerce_to_model`.
pub fn bson_to_value(raw: &Bson) -> Value {
    bson_to_value_lossy(raw)
}

fn bson_to_value_lossy(raw: &Bson) -> Value {
    match raw {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(n) => Value::Int(*n as i64),
        Bson::Int64(n) => Value::Int(*n),
        Bson::Double(n) => Value::Float(*n),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::List(items.iter().map(bson_to_value_lossy).collect()),
        Bson::Document(doc) => Value::Document(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_value_lossy(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            Value::Document(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect())
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::json!(n),
        Value::Float(n) => serde_json::json!(n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::json!(b),
        Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
        Value::Reference(_) => serde_json::Value::Null,
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Document(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use loom_core::CapturingLogger;

    use super::*;

    fn model_with(attrs: &[(&str, Attribute)]) -> Model {
        let mut m = Model::new("article", "id");
        m.collection_name = "articles".into();
        for (k, v) in attrs {
            m.attributes.insert((*k).to_string(), v.clone());
        }
        m
    }

    #[test]
    fn root_object_gets_primary_key_set_from_doc_id() {
        let registry = Registry::new();
        let logger = CapturingLogger::default();
        let model = model_with(&[("title", Attribute::Primitive(PrimitiveType::String))]);
        let raw = Bson::Document(bson::doc! { "title": "hello" });
        let opts = CoerceOptions::root("42");
        let value = coerce_to_model(&registry, &logger, &model, &raw, &opts).unwrap();
        let Value::Document(map) = value else { panic!() };
        assert_eq!(map.get("id"), Some(&Value::String("42".into())));
        assert_eq!(map.get("title"), Some(&Value::String("hello".into())));
    }

    #[test]
    fn big_integer_downgrades_to_int() {
        let registry = Registry::new();
        let logger = CapturingLogger::default();
        let model = model_with(&[("views", Attribute::Primitive(PrimitiveType::BigInteger))]);
        let raw = Bson::Document(bson::doc! { "views": Bson::Int64(9000) });
        let opts = CoerceOptions::nested("x");
        let value = coerce_to_model(&registry, &logger, &model, &raw, &opts).unwrap();
        let Value::Document(map) = value else { panic!() };
        assert_eq!(map.get("views"), Some(&Value::Int(9000)));
    }

    #[test]
    fn json_attribute_round_trips_through_text() {
        let registry = Registry::new();
        let logger = CapturingLogger::default();
        let model = model_with(&[("meta", Attribute::Primitive(PrimitiveType::Json))]);
        let value = Value::Document(
            [(
                "meta".to_string(),
                Value::Document([("k".to_string(), Value::String("v".into()))].into()),
            )]
            .into(),
        );
        let opts = CoerceOptions::nested("x");
        let stored = coerce_to_store(&registry, &logger, &model, &value, &opts).unwrap();
        let Bson::Document(doc) = &stored else { panic!() };
        let Bson::String(text) = doc.get("meta").unwrap() else { panic!() };
        assert_eq!(text, "{\"k\":\"v\"}");

        let back = coerce_to_model(&registry, &logger, &model, &stored, &opts).unwrap();
        let Value::Document(map) = back else { panic!() };
        assert_eq!(
            map.get("meta"),
            Some(&Value::Document([("k".to_string(), Value::String("v".into()))].into()))
        );
    }

    #[test]
    fn invalid_integer_raises_coercion_error() {
        let registry = Registry::new();
        let logger = CapturingLogger::default();
        let model = model_with(&[("views", Attribute::Primitive(PrimitiveType::Integer))]);
        let raw = Bson::Document(bson::doc! { "views": "not a number" });
        let opts = CoerceOptions::nested("x");
        let err = coerce_to_model(&registry, &logger, &model, &raw, &opts).unwrap_err();
        assert!(matches!(err, AdapterError::Coercion { .. }));
    }
}
