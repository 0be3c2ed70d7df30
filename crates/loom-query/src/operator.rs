/// Predicate operators accepted from the CMS host. A subset maps
/// directly onto the store's native filter language; the rest always
/// fall back to the in-memory engine (see `translate.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    /// Case-insensitive substring match. Always in-memory.
    Contains,
    /// Negated case-insensitive substring match. Always in-memory.
    NContains,
    /// Case-sensitive substring match. Always in-memory.
    Containss,
    /// Negated case-sensitive substring match. Always in-memory.
    NContainss,
    /// `true` -> `== null`, `false` -> `!= null`.
    Null,
}

impl Operator {
    pub const fn is_always_manual(self) -> bool {
        matches!(
            self,
            Self::Contains | Self::NContains | Self::Containss | Self::NContainss
        )
    }
}

/// The reduced operator set a native filter spec may carry. `contains`
/// family and `null` never reach this — they're rewritten or rejected
/// before translation produces a native spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
}
