pub mod query;
pub mod result_set;

pub use query::*;
pub use result_set::*;
