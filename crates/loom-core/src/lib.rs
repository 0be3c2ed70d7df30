mod config;
mod error;
mod logger;
mod model;
mod reference;
mod registry;
mod snapshot;
mod value;

pub use config::RunnerConfig;
pub use error::{AdapterError, Result};
pub use logger::{CapturingLogger, Logger, TracingLogger};
pub use model::{Attribute, Model, ModelOptions, PrimitiveType, ReferenceKind};
pub use reference::{BaseRef, Ref, RefKind, StoreRefWire};
pub use registry::Registry;
pub use snapshot::{QuerySnapshot, Snapshot};
pub use value::Value;
