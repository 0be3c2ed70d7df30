use chrono::{DateTime, Utc};

/// Per-call knobs for [`crate::coerce_to_model`] / [`crate::coerce_to_store`].
/// `field_path` distinguishes a root-document call (`None`) from a nested
/// component/dynamic-zone recursion.
#[derive(Debug, Clone, Default)]
pub struct CoerceOptions {
    pub doc_id: Option<String>,
    pub field_path: Option<String>,
    pub apply_timestamps: bool,
    /// Only set `created_at` when this write is a create — an update that
    /// merely lacks the key in its partial payload must not reset it.
    pub is_create: bool,
    pub now: Option<DateTime<Utc>>,
    pub strict_references: bool,
    pub ignore_mismatched_references: bool,
}

impl CoerceOptions {
    pub fn root(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: Some(doc_id.into()),
            ..Default::default()
        }
    }

    pub fn nested(field_path: impl Into<String>) -> Self {
        Self {
            field_path: Some(field_path.into()),
            ..Default::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.field_path.is_none()
    }
}
