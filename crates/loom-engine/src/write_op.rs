use std::collections::BTreeMap;

use loom_store::{DocRef, WritePayload};

/// How a write reached the transaction — drives whether `commit` issues a
/// native `create` or `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Create,
    Update,
    Set,
    SetMerge,
    Delete,
}

/// One document's pending write, keyed by store path in the owning
/// transaction's write map. `data == None` means delete; once set it is
/// never overwritten by a later partial merge ("delete wins forever").
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub doc: DocRef,
    pub data: Option<WritePayload>,
    pub create: bool,
    /// Set by `Set`/`SetMerge` edit modes: the document may or may not
    /// exist yet, so commit tries `update` first and falls back to
    /// `create` on `UnsupportedOperation`, rather than requiring the
    /// caller to know which.
    pub upsert: bool,
}

impl WriteOp {
    pub fn empty(doc: DocRef) -> Self {
        Self {
            doc,
            data: Some(WritePayload::new()),
            create: false,
            upsert: false,
        }
    }

    /// Merge a new write into this op per §4.7's `merge_write_internal`
    /// rules: delete wins forever; otherwise partial-merge by key;
    /// `create`/`upsert` only ever become true, never revert.
    pub fn merge(&mut self, data: Option<WritePayload>, create: bool, upsert: bool) {
        if self.data.is_none() {
            return;
        }
        match data {
            None => self.data = None,
            Some(fields) => {
                let existing = self.data.get_or_insert_with(BTreeMap::new);
                existing.extend(fields);
            }
        }
        self.create = self.create || create;
        self.upsert = self.upsert || upsert;
    }
}

#[cfg(test)]
mod tests {
    use loom_core::Value;
    use loom_store::FieldValue;

    use super::*;

    fn payload(pairs: &[(&str, i64)]) -> WritePayload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::Value(Value::Int(*v))))
            .collect()
    }

    #[test]
    fn delete_wins_over_later_merge() {
        let mut op = WriteOp::empty(DocRef::new("articles", "1"));
        op.merge(None, false, false);
        op.merge(Some(payload(&[("views", 1)])), false, false);
        assert!(op.data.is_none());
    }

    #[test]
    fn partial_merge_overwrites_by_key_only() {
        let mut op = WriteOp::empty(DocRef::new("articles", "1"));
        op.merge(Some(payload(&[("views", 1), ("likes", 2)])), false, false);
        op.merge(Some(payload(&[("views", 3)])), false, false);
        let data = op.data.unwrap();
        assert_eq!(data.len(), 2);
        match &data["views"] {
            FieldValue::Value(Value::Int(n)) => assert_eq!(*n, 3),
            _ => panic!(),
        }
    }

    #[test]
    fn create_flag_is_sticky() {
        let mut op = WriteOp::empty(DocRef::new("articles", "1"));
        op.merge(Some(WritePayload::new()), true, false);
        op.merge(Some(WritePayload::new()), false, false);
        assert!(op.create);
    }

    #[test]
    fn upsert_flag_is_sticky() {
        let mut op = WriteOp::empty(DocRef::new("articles", "1"));
        op.merge(Some(WritePayload::new()), false, true);
        op.merge(Some(WritePayload::new()), false, false);
        assert!(op.upsert);
    }
}
