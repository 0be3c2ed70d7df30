use loom_core::{AdapterError, Logger, Model, Ref, Registry, Result};

/// Resolve an arbitrary input into a `Ref`, per §4.3. Accepts:
/// - an existing `Ref`, passed straight through after a target-model check;
/// - a bare document id (`target_model` required);
/// - a qualified path `"collection/id"`;
/// - a legacy flattened path `"/collection/single_id/id"`.
///
/// In strict mode a shape or target mismatch returns `Err`; in lenient mode
/// it logs through `logger` and returns `Ok(None)`.
pub fn coerce_to_reference(
    registry: &Registry,
    logger: &dyn Logger,
    input: RefInput<'_>,
    target_model: Option<&Model>,
    strict: bool,
    ignore_mismatched: bool,
) -> Result<Option<Ref>> {
    match resolve(registry, input, target_model, ignore_mismatched) {
        Ok(r) => Ok(Some(r)),
        Err(e) if strict => Err(e),
        Err(e) => {
            logger.warn(&format!("reference resolution failed, dropping value: {e}"));
            Ok(None)
        }
    }
}

/// The shapes `coerce_to_reference` accepts before it has committed to a
/// `Ref` variant.
pub enum RefInput<'a> {
    Existing(Ref),
    BareId(&'a str),
    QualifiedPath(&'a str),
    LegacyDeepPath(&'a str),
}

fn resolve(
    registry: &Registry,
    input: RefInput<'_>,
    target_model: Option<&Model>,
    ignore_mismatched: bool,
) -> Result<Ref> {
    let resolved = match input {
        RefInput::Existing(r) => r,
        RefInput::BareId(id) => {
            let target = target_model.ok_or_else(|| {
                AdapterError::reference_shape("a bare id requires a known target model")
            })?;
            Ref::normal(&target.collection_name, id)?
        }
        RefInput::QualifiedPath(path) => parse_qualified(path)?,
        RefInput::LegacyDeepPath(path) => parse_legacy_deep(path)?,
    };

    if let Some(target) = target_model
        && resolved.parent_collection() != target.collection_name
        && !ignore_mismatched
    {
        return Err(AdapterError::reference_shape(format!(
            "reference points at '{}', expected '{}'",
            resolved.parent_collection(),
            target.collection_name
        )));
    }

    if registry
        .get_model_by_collection_name(resolved.parent_collection())
        .is_none()
    {
        return Err(AdapterError::reference_shape(format!(
            "reference points at unknown collection '{}'",
            resolved.parent_collection()
        )));
    }

    Ok(resolved)
}

/// `"collection/id"` — a normal reference's external path form.
fn parse_qualified(path: &str) -> Result<Ref> {
    let path = path.trim_start_matches('/');
    let (collection, id) = path
        .rsplit_once('/')
        .ok_or_else(|| AdapterError::reference_shape(format!("not a qualified path: '{path}'")))?;
    Ref::normal(collection, id)
}

/// `"/collection/single_id/id"` — the legacy flattened-field path form.
fn parse_legacy_deep(path: &str) -> Result<Ref> {
    let path = path.trim_start_matches('/');
    let mut parts = path.splitn(3, '/');
    let collection = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterError::reference_shape(format!("not a legacy deep path: '{path}'")))?;
    let _single_id = parts
        .next()
        .ok_or_else(|| AdapterError::reference_shape(format!("not a legacy deep path: '{path}'")))?;
    let id = parts
        .next()
        .ok_or_else(|| AdapterError::reference_shape(format!("not a legacy deep path: '{path}'")))?;
    Ref::deep(collection, id)
}

#[cfg(test)]
mod tests {
    use loom_core::CapturingLogger;

    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        let mut article = Model::new("article", "id");
        article.collection_name = "articles".into();
        registry.register(article);
        registry
    }

    #[test]
    fn bare_id_resolves_against_target_model() {
        let registry = registry();
        let target = registry.require_model("article").unwrap();
        let logger = CapturingLogger::default();
        let r = coerce_to_reference(
            &registry,
            &logger,
            RefInput::BareId("1"),
            Some(&target),
            true,
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(r.id(), "1");
        assert_eq!(r.parent_collection(), "articles");
    }

    #[test]
    fn legacy_deep_path_parses_three_segments() {
        let mut registry = Registry::new();
        let mut tag = Model::new("tag", "id");
        tag.collection_name = "tags".into();
        registry.register(tag);
        let logger = CapturingLogger::default();
        let r = coerce_to_reference(
            &registry,
            &logger,
            RefInput::LegacyDeepPath("/tags/default/row-1"),
            None,
            true,
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(r.id(), "row-1");
        assert_eq!(r.parent_collection(), "tags");
    }

    #[test]
    fn strict_mode_propagates_mismatch() {
        let mut registry = registry();
        let mut author = Model::new("author", "id");
        author.collection_name = "authors".into();
        registry.register(author);
        let target = registry.require_model("article").unwrap();
        let logger = CapturingLogger::default();
        let err = coerce_to_reference(
            &registry,
            &logger,
            RefInput::QualifiedPath("authors/5"),
            Some(&target),
            true,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, AdapterError::ReferenceShape { .. }));
    }

    #[test]
    fn lenient_mode_logs_and_returns_none() {
        let registry = Registry::new();
        let logger = CapturingLogger::default();
        let result = coerce_to_reference(
            &registry,
            &logger,
            RefInput::QualifiedPath("unknown/1"),
            None,
            false,
            false,
        )
        .unwrap();
        assert!(result.is_none());
        assert_eq!(logger.messages.lock().unwrap().len(), 1);
    }
}
