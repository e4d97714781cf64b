//! Embedded full-text search over SQLite FTS tables.
//!
//! An [`Indexer`] owns the write side of one index table and applies every
//! mutation on a dedicated serial lane. A [`Searcher`] queries the same table
//! on its own lane, optionally ordering by relevance and converting rows
//! through an item factory.
//!
//! ```no_run
//! use fts_searchkit::{IndexDocument, Indexer, OrderMode, Searcher};
//!
//! # fn main() -> anyhow::Result<()> {
//! let indexer = Indexer::named("notes.db", None)?;
//! indexer.add(IndexDocument::new("remember the milk")).wait()?;
//!
//! let searcher = Searcher::from_indexer(&indexer)?.with_order_mode(OrderMode::Relevance);
//! for doc in searcher.find_text("milk").wait()? {
//!     println!("{:?}", doc.identifier);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod indexer;
pub mod lane;
pub mod model;
pub mod search;
pub mod storage;

pub use config::SearchKitConfig;
pub use error::{Result, SearchKitError};
pub use indexer::{IndexOutcome, Indexer, ItemFailure};
pub use lane::Completion;
pub use model::{
    DEFAULT_ITEM_TYPE, ITEM_TYPE_IGNORE, IndexDocument, IndexItem, ItemType, Meta,
};
pub use search::{OrderMode, QueryMode, Searcher, SearcherConfig};
pub use storage::{DatabaseLocation, EngineGeneration};
