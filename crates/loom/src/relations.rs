use std::collections::HashMap;

use loom_core::{Attribute, Registry};
use loom_engine::{RelationAttrInfo, RelationEnd, RelationHandler};

/// Build every model's `Vec<RelationHandler>`, one handler per relation
/// attribute named in `model.associations`. The other end is found by
/// following `via` to the matching attribute on the target model; a
/// relation with no resolvable `via` still gets a handler with an empty
/// `other_ends` (relevant only for the non-dominant dangling-reference
/// scan, which then has nothing to clean up).
pub fn build_all(registry: &Registry) -> HashMap<String, Vec<RelationHandler>> {
    let mut out = HashMap::new();
    for model in registry.models() {
        let mut handlers = Vec::new();
        for alias in &model.associations {
            let Some(attribute) = model.attribute(alias) else { continue };
            let Attribute::Relation {
                target_model,
                plugin,
                via,
                dominant,
                is_array,
                is_morph,
                is_meta,
                actual_alias,
                ..
            } = attribute
            else {
                continue;
            };

            let this_end = RelationEnd {
                model: model.name.clone(),
                attr: RelationAttrInfo {
                    alias: alias.clone(),
                    is_array: *is_array,
                    filter: is_morph.then(|| alias.clone()),
                    is_morph: *is_morph,
                    actual_alias: actual_alias.clone(),
                    is_meta: *is_meta,
                },
                dominant: *dominant,
            };

            let other_ends = via
                .as_deref()
                .and_then(|via_alias| {
                    let target = registry.get_model(target_model, plugin.as_deref())?;
                    let other_attr = target.attribute(via_alias)?;
                    let Attribute::Relation {
                        dominant: other_dominant,
                        is_array: other_is_array,
                        is_morph: other_is_morph,
                        is_meta: other_is_meta,
                        actual_alias: other_actual_alias,
                        ..
                    } = other_attr
                    else {
                        return None;
                    };
                    Some(vec![RelationEnd {
                        model: target.name.clone(),
                        attr: RelationAttrInfo {
                            alias: via_alias.to_string(),
                            is_array: *other_is_array,
                            filter: other_is_morph.then(|| via_alias.to_string()),
                            is_morph: *other_is_morph,
                            actual_alias: other_actual_alias.clone(),
                            is_meta: *other_is_meta,
                        },
                        dominant: *other_dominant,
                    }])
                })
                .unwrap_or_default();

            handlers.push(RelationHandler::new(this_end, other_ends));
        }
        if !handlers.is_empty() {
            out.insert(model.name.clone(), handlers);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use loom_core::{Model, PrimitiveType, ReferenceKind};

    use super::*;

    fn article_tag_registry() -> Registry {
        let mut article = Model::new("article", "id");
        article.collection_name = "articles".into();
        article
            .attributes
            .insert("title".into(), Attribute::Primitive(PrimitiveType::String));
        article.attributes.insert(
            "tags".into(),
            Attribute::Relation {
                target_model: "tag".into(),
                plugin: None,
                kind: ReferenceKind::Normal,
                via: Some("articles".into()),
                dominant: true,
                is_array: true,
                is_morph: false,
                is_meta: false,
                actual_alias: None,
            },
        );
        article.associations.push("tags".into());

        let mut tag = Model::new("tag", "id");
        tag.collection_name = "tags".into();
        tag.attributes.insert(
            "articles".into(),
            Attribute::Relation {
                target_model: "article".into(),
                plugin: None,
                kind: ReferenceKind::Normal,
                via: Some("tags".into()),
                dominant: false,
                is_array: true,
                is_morph: false,
                is_meta: false,
                actual_alias: None,
            },
        );
        tag.associations.push("articles".into());

        let mut registry = Registry::new();
        registry.register(article);
        registry.register(tag);
        registry
    }

    #[test]
    fn resolves_the_other_end_by_following_via() {
        let registry = article_tag_registry();
        let handlers = build_all(&registry);

        let article_handlers = &handlers["article"];
        assert_eq!(article_handlers.len(), 1);
        let h = &article_handlers[0];
        assert!(h.this_end.dominant);
        assert_eq!(h.this_end.attr.alias, "tags");
        assert_eq!(h.other_ends.len(), 1);
        assert_eq!(h.other_ends[0].model, "tag");
        assert_eq!(h.other_ends[0].attr.alias, "articles");
        assert!(!h.other_ends[0].dominant);

        let tag_handlers = &handlers["tag"];
        assert_eq!(tag_handlers.len(), 1);
        assert!(!tag_handlers[0].this_end.dominant);
        assert_eq!(tag_handlers[0].other_ends[0].model, "article");
    }

    #[test]
    fn a_relation_with_no_via_gets_an_empty_other_ends() {
        let mut model = Model::new("orphan", "id");
        model.collection_name = "orphans".into();
        model.attributes.insert(
            "owner".into(),
            Attribute::Relation {
                target_model: "article".into(),
                plugin: None,
                kind: ReferenceKind::Normal,
                via: None,
                dominant: true,
                is_array: false,
                is_morph: false,
                is_meta: false,
                actual_alias: None,
            },
        );
        model.associations.push("owner".into());

        let mut registry = Registry::new();
        registry.register(model);
        let handlers = build_all(&registry);
        assert!(handlers["orphan"][0].other_ends.is_empty());
    }
}
