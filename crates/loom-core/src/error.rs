use std::fmt;

/// The adapter's full error taxonomy. Every fallible operation in the
/// workspace funnels into one of these variants so callers can match on
/// kind rather than on crate-local types.
#[derive(Debug)]
pub enum AdapterError {
    /// A value could not be coerced to the attribute's declared type.
    Coercion { attribute: String, reason: String },
    /// A value is not a resolvable reference, or points at the wrong model.
    ReferenceShape { reason: String },
    /// A `Ref` did not match any known variant. Indicates a bug, not user
    /// input.
    UnknownReferenceKind,
    /// An operation was invoked somewhere it is not supported (a
    /// `ComponentCollection`, a write against a `ReadOnlyTransaction`,
    /// `create` on an existing document, `update` on a missing one).
    UnsupportedOperation { reason: String },
    /// A filter has proven to be trivially false. Internal control flow:
    /// callers translate this into an empty `QuerySnapshot` rather than
    /// surfacing it to the caller of the public API.
    EmptyQuery,
    /// The caller asked for `NativeOnly` translation but the predicate
    /// can only be evaluated in memory.
    NativeNotSupported { hint: &'static str },
    /// The store's native retry-class error. The transaction runner
    /// retries on this.
    TransactionContention,
    /// Opaque failure from the store binding.
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coercion { attribute, reason } => {
                write!(f, "cannot coerce attribute '{attribute}': {reason}")
            }
            Self::ReferenceShape { reason } => write!(f, "invalid reference: {reason}"),
            Self::UnknownReferenceKind => write!(f, "unknown reference kind"),
            Self::UnsupportedOperation { reason } => {
                write!(f, "unsupported operation: {reason}")
            }
            Self::EmptyQuery => write!(f, "query is trivially empty"),
            Self::NativeNotSupported { hint } => {
                write!(f, "predicate requires in-memory evaluation: {hint}")
            }
            Self::TransactionContention => write!(f, "transaction contention, retry"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl AdapterError {
    pub fn coercion(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Coercion {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub fn reference_shape(reason: impl Into<String>) -> Self {
        Self::ReferenceShape {
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            reason: reason.into(),
        }
    }

    /// True for the 4xx-class kinds that must be surfaced to the caller
    /// and fail the lifecycle, rather than being logged and swallowed.
    pub fn is_user_fault(&self) -> bool {
        matches!(
            self,
            Self::Coercion { .. } | Self::ReferenceShape { .. } | Self::NativeNotSupported { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
