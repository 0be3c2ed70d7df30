//! Query translation: turning a CMS-level filter/sort/paginate request
//! into either a native store filter or an in-memory predicate, per the
//! operator mapping table.

mod filter;
mod manual;
mod operator;
mod sort;
mod translate;

pub use filter::{AndGroup, FilterInput, NativeFilter, OrFilter, WhereFilter};
pub use manual::{eval_native, sort_page, ManualPredicate, Row};
pub use operator::{NativeOp, Operator};
pub use sort::{Sort, SortDirection};
pub use translate::{translate, TranslateMode, Translated};
