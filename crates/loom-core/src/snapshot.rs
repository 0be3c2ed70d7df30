use crate::reference::Ref;

/// Uniform read result. `exists == data.is_some()` always holds; use
/// [`Snapshot::new`] rather than constructing the fields directly to keep
/// that invariant enforced in one place.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub reference: Ref,
    data: Option<T>,
}

impl<T> Snapshot<T> {
    pub fn new(reference: Ref, data: Option<T>) -> Self {
        Self { reference, data }
    }

    pub fn missing(reference: Ref) -> Self {
        Self::new(reference, None)
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

/// A page of [`Snapshot`]s returned by `Queryable::get`.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    pub docs: Vec<Snapshot<T>>,
}

impl<T> QuerySnapshot<T> {
    pub fn empty() -> Self {
        Self { docs: Vec::new() }
    }

    pub fn new(docs: Vec<Snapshot<T>>) -> Self {
        Self { docs }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_matches_data_presence() {
        let r = Ref::normal("articles", "1").unwrap();
        let present = Snapshot::new(r.clone(), Some(5));
        let missing = Snapshot::<i32>::missing(r);
        assert!(present.exists());
        assert!(!missing.exists());
    }
}
