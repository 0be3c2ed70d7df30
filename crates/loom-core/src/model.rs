use std::collections::HashMap;

/// Primitive attribute types the coercion layer knows how to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Integer,
    Float,
    Decimal,
    BigInteger,
    String,
    Text,
    Email,
    Password,
    Uid,
    Json,
    Date,
    Time,
    DateTime,
    Timestamp,
    Boolean,
    Enumeration,
}

/// The three disjoint reference-attribute shapes, matching the three
/// `Ref` kinds plus the morph decorator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    Normal,
    Deep,
    Virtual,
}

/// `{type?, component?, components?, model?, collection?, plugin?, via?,
/// dominant?, is_meta?, actual_alias?}` with the invariant that exactly one
/// of the four shape discriminants is set.
#[derive(Debug, Clone)]
pub enum Attribute {
    Primitive(PrimitiveType),
    Component {
        component_model: String,
        repeatable: bool,
    },
    DynamicZone {
        allowed_components: Vec<String>,
    },
    Relation {
        target_model: String,
        plugin: Option<String>,
        kind: ReferenceKind,
        via: Option<String>,
        dominant: bool,
        is_array: bool,
        is_morph: bool,
        is_meta: bool,
        actual_alias: Option<String>,
    },
}

impl Attribute {
    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            Self::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Attribute> {
        match self {
            Self::Relation { .. } => Some(self),
            _ => None,
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveType::Password))
    }
}

/// Schema-level options that change how a model's collection behaves.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    pub flatten: bool,
    pub single_id: Option<String>,
    pub virtual_data_source: bool,
    pub timestamps: bool,
    pub max_query_size: Option<usize>,
    pub ignore_mismatched_references: bool,
    pub ensure_component_ids: bool,
}

/// `{name -> Attribute}` plus the options that drive collection behaviour.
/// Exactly one `Model` exists per process for a given name, owned by the
/// `Registry`.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    /// Distinct from `name` in hosts that separate the schema alias from
    /// the class identity used in polymorphic JSON descriptors; defaults
    /// to `name` when the host has no separate concept.
    pub global_id: String,
    pub plugin: Option<String>,
    pub primary_key: String,
    pub collection_name: String,
    pub attributes: HashMap<String, Attribute>,
    pub associations: Vec<String>,
    pub is_component: bool,
    pub options: ModelOptions,
}

impl Model {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            collection_name: name.clone(),
            global_id: name.clone(),
            name,
            plugin: None,
            primary_key: primary_key.into(),
            attributes: HashMap::new(),
            associations: Vec::new(),
            is_component: false,
            options: ModelOptions::default(),
        }
    }

    pub fn attribute(&self, alias: &str) -> Option<&Attribute> {
        self.attributes.get(alias)
    }

    pub fn is_flat(&self) -> bool {
        self.options.flatten
    }

    pub fn is_virtual(&self) -> bool {
        self.options.virtual_data_source
    }
}
