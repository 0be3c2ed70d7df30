//! Schema-driven conversion between store-wire values and the values the
//! CMS host works with, plus reference resolution (§4.2, §4.3).

mod coerce;
mod options;
mod reference;

pub use coerce::{bson_to_value, coerce_to_model, coerce_to_store, resolve_references, value_to_bson};
pub use options::CoerceOptions;
pub use reference::{coerce_to_reference, RefInput};
