pub mod cache;
pub mod context;

pub use cache::RegulatoryContextCache;
pub use context::{build_context, RegulatoryContext};
