use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};
use crate::registry::Registry;

/// The three disjoint, non-decorator reference kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// One document per row.
    Normal,
    /// A named field inside a shared "flat" document.
    Deep,
    /// An in-memory row, never touching the backing store directly.
    Virtual,
}

/// Value-type payload shared by the three non-morph kinds: `id` is
/// non-empty, `parent_collection` names the owning model's collection.
/// The parent `Collection` itself is looked up through the `Registry` on
/// demand, breaking the collection/ref/parent cycle — `Ref` never holds a
/// pointer back to its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseRef {
    pub parent_collection: String,
    pub id: String,
}

/// Tagged sum `Ref = Normal | Deep | Virtual | Morph(inner, filter)`.
///
/// Two refs are equal iff they are the same kind, with the same parent
/// path and id, and — for morph — the same filter. This is the
/// reference-aware equality the query translator and relation manager
/// must use in place of structural equality, so two distinct `Ref`
/// instances for the same document compare equal.
#[derive(Debug, Clone)]
pub enum Ref {
    Normal(BaseRef),
    Deep(BaseRef),
    Virtual(BaseRef),
    Morph(Box<Ref>, Option<String>),
}

/// Wire shape as written to / read from the underlying store. See
/// SPEC_FULL.md §6 "Wire formats".
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRefWire {
    Normal { doc_path: String },
    Deep { doc_path: String, id: String },
    MorphNormal { doc_path: String, filter: Option<String> },
    MorphDeep { doc_path: String, id: String, filter: Option<String> },
}

impl Ref {
    pub fn normal(parent_collection: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(AdapterError::reference_shape("ref id must be non-empty"));
        }
        Ok(Self::Normal(BaseRef {
            parent_collection: parent_collection.into(),
            id,
        }))
    }

    pub fn deep(parent_collection: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(AdapterError::reference_shape("ref id must be non-empty"));
        }
        Ok(Self::Deep(BaseRef {
            parent_collection: parent_collection.into(),
            id,
        }))
    }

    pub fn virtual_(parent_collection: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(AdapterError::reference_shape("ref id must be non-empty"));
        }
        Ok(Self::Virtual(BaseRef {
            parent_collection: parent_collection.into(),
            id,
        }))
    }

    pub fn morph(inner: Ref, filter: Option<String>) -> Self {
        Self::Morph(Box::new(inner), filter)
    }

    /// Peel off morph decoration, returning the underlying base ref and
    /// its kind. Every dispatch (`get`, `write_internal`, serialisation)
    /// forwards through this.
    pub fn base(&self) -> (&BaseRef, RefKind) {
        match self {
            Self::Normal(b) => (b, RefKind::Normal),
            Self::Deep(b) => (b, RefKind::Deep),
            Self::Virtual(b) => (b, RefKind::Virtual),
            Self::Morph(inner, _) => inner.base(),
        }
    }

    pub fn id(&self) -> &str {
        &self.base().0.id
    }

    pub fn parent_collection(&self) -> &str {
        &self.base().0.parent_collection
    }

    pub fn kind(&self) -> RefKind {
        self.base().1
    }

    pub fn is_morph(&self) -> bool {
        matches!(self, Self::Morph(..))
    }

    pub fn morph_filter(&self) -> Option<&str> {
        match self {
            Self::Morph(_, filter) => filter.as_deref(),
            _ => None,
        }
    }

    /// `path = parent.path + '/' + id`. For Deep refs the parent is the
    /// shared flat document, addressed by the model's configured
    /// `single_id`.
    pub fn path(&self, registry: &Registry) -> Result<String> {
        let (base, kind) = self.base();
        let model = registry.require_model(&base.parent_collection)?;
        match kind {
            RefKind::Normal | RefKind::Virtual => {
                Ok(format!("{}/{}", base.parent_collection, base.id))
            }
            RefKind::Deep => {
                let single_id = model.options.single_id.as_deref().ok_or_else(|| {
                    AdapterError::reference_shape(format!(
                        "model '{}' is not flattened",
                        base.parent_collection
                    ))
                })?;
                Ok(format!("{}/{}/{}", base.parent_collection, single_id, base.id))
            }
        }
    }

    /// Store-wire shape. Round-tripping `to_store_wire` -> parse ->
    /// `to_store_wire` must be byte-identical.
    pub fn to_store_wire(&self, registry: &Registry) -> Result<StoreRefWire> {
        match self {
            Self::Normal(base) => Ok(StoreRefWire::Normal {
                doc_path: format!("{}/{}", base.parent_collection, base.id),
            }),
            Self::Deep(base) => {
                let model = registry.require_model(&base.parent_collection)?;
                let single_id = model.options.single_id.as_deref().ok_or_else(|| {
                    AdapterError::reference_shape(format!(
                        "model '{}' is not flattened",
                        base.parent_collection
                    ))
                })?;
                Ok(StoreRefWire::Deep {
                    doc_path: format!("{}/{}", base.parent_collection, single_id),
                    id: base.id.clone(),
                })
            }
            Self::Virtual(_) => Err(AdapterError::unsupported(
                "virtual refs have no store-wire representation",
            )),
            Self::Morph(inner, filter) => match inner.to_store_wire(registry)? {
                StoreRefWire::Normal { doc_path } => Ok(StoreRefWire::MorphNormal {
                    doc_path,
                    filter: filter.clone(),
                }),
                StoreRefWire::Deep { doc_path, id } => Ok(StoreRefWire::MorphDeep {
                    doc_path,
                    id,
                    filter: filter.clone(),
                }),
                other => Err(AdapterError::reference_shape(format!(
                    "unsupported morph inner wire shape: {other:?}"
                ))),
            },
        }
    }

    /// External JSON form. Plain refs expose their id; morph refs use the
    /// four-field polymorphic descriptor
    /// `{ref, kind, source, refId, field}`.
    pub fn to_json(&self, registry: &Registry) -> Result<serde_json::Value> {
        match self {
            Self::Morph(inner, filter) => {
                let (base, _) = inner.base();
                let model = registry.require_model(&base.parent_collection)?;
                Ok(serde_json::json!({
                    "ref": model.name,
                    "kind": model.global_id,
                    "source": model.plugin,
                    "refId": base.id,
                    "field": filter,
                }))
            }
            _ => Ok(serde_json::json!({ "id": self.id() })),
        }
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Morph(a, fa), Self::Morph(b, fb)) => a == b && fa == fb,
            (Self::Morph(..), _) | (_, Self::Morph(..)) => false,
            _ => {
                let (ba, ka) = self.base();
                let (bb, kb) = other.base();
                ka == kb && ba == bb
            }
        }
    }
}

impl Eq for Ref {}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_flat() -> Registry {
        use crate::model::Model;
        let mut registry = Registry::new();
        let mut article = Model::new("article", "id");
        article.collection_name = "articles".into();
        registry.register(article);
        let mut tag = Model::new("tag", "id");
        tag.collection_name = "tags".into();
        tag.options.flatten = true;
        tag.options.single_id = Some("default".into());
        registry.register(tag);
        registry
    }

    #[test]
    fn equality_reflexive_symmetric() {
        let a = Ref::normal("articles", "1").unwrap();
        let b = Ref::normal("articles", "1").unwrap();
        let c = Ref::normal("articles", "2").unwrap();
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_eq!(a == b, b == a);
        assert_ne!(a, c);
    }

    #[test]
    fn morph_equality_requires_same_filter() {
        let inner1 = Ref::normal("images", "1").unwrap();
        let inner2 = Ref::normal("images", "1").unwrap();
        let m1 = Ref::morph(inner1, Some("cover".into()));
        let m2 = Ref::morph(inner2, Some("cover".into()));
        let m3 = Ref::morph(Ref::normal("images", "1").unwrap(), Some("thumb".into()));
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
    }

    #[test]
    fn different_kinds_never_equal_even_with_same_id() {
        let n = Ref::normal("articles", "1").unwrap();
        let v = Ref::virtual_("articles", "1").unwrap();
        assert_ne!(n, v);
    }

    #[test]
    fn normal_path_and_wire() {
        let registry = registry_with_flat();
        let r = Ref::normal("articles", "42").unwrap();
        assert_eq!(r.path(&registry).unwrap(), "articles/42");
        match r.to_store_wire(&registry).unwrap() {
            StoreRefWire::Normal { doc_path } => assert_eq!(doc_path, "articles/42"),
            other => panic!("unexpected wire: {other:?}"),
        }
    }

    #[test]
    fn deep_path_and_wire_use_single_id() {
        let registry = registry_with_flat();
        let r = Ref::deep("tags", "row-1").unwrap();
        assert_eq!(r.path(&registry).unwrap(), "tags/default/row-1");
        match r.to_store_wire(&registry).unwrap() {
            StoreRefWire::Deep { doc_path, id } => {
                assert_eq!(doc_path, "tags/default");
                assert_eq!(id, "row-1");
            }
            other => panic!("unexpected wire: {other:?}"),
        }
    }

    #[test]
    fn morph_wire_merges_inner_and_filter() {
        let registry = registry_with_flat();
        let r = Ref::morph(Ref::normal("articles", "1").unwrap(), Some("cover".into()));
        match r.to_store_wire(&registry).unwrap() {
            StoreRefWire::MorphNormal { doc_path, filter } => {
                assert_eq!(doc_path, "articles/1");
                assert_eq!(filter.as_deref(), Some("cover"));
            }
            other => panic!("unexpected wire: {other:?}"),
        }
    }

    #[test]
    fn empty_id_rejected() {
        assert!(Ref::normal("articles", "").is_err());
    }
}
