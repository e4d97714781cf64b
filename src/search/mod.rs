//! Query side of the index.
//!
//! - **[`fts`]**: MATCH escaping and SQL construction per engine generation.
//! - **[`rank`]**: the `rank()` scoring function over `matchinfo()` blobs.
//! - **[`searcher`]**: the query pipeline (`find`, `enumerate`, item factories).

pub mod fts;
pub mod rank;
pub mod searcher;

pub use fts::{OrderMode, QueryMode};
pub use searcher::{DEFAULT_COLUMN_WEIGHTS, ItemFactory, Searcher, SearcherConfig};
