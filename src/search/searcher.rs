//! Query pipeline over one index table.
//!
//! A [`Searcher`] runs `find` requests on its own lane, separate from the
//! indexer's, so reads and writes on different pipelines are not serialized
//! against each other beyond the shared connection lock.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, trace, warn};

use crate::config::SearchKitConfig;
use crate::error::{Result, SearchKitError};
use crate::indexer::Indexer;
use crate::lane::{Completion, SerialLane};
use crate::model::types::{ITEM_TYPE_IGNORE, IndexDocument, ItemType};
use crate::search::fts::{
    BuiltQuery, OrderMode, QueryMode, QueryPlan, build_count_sql, build_search_sql,
    validate_weights,
};
use crate::storage::sqlite::{
    DEFAULT_INDEX_NAME, DatabaseLocation, EngineGeneration, IndexStore, TableInfo,
    document_from_row,
};

/// Column weights used for relevance ordering when none are configured:
/// only `textContents` contributes.
pub const DEFAULT_COLUMN_WEIGHTS: [f64; 4] = [0.0, 1.0, 0.0, 0.0];

/// Converts a stored row into the caller's result type.
pub type ItemFactory<T> = Arc<dyn Fn(IndexDocument) -> T + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct SearcherConfig {
    pub order_mode: OrderMode,
    pub query_mode: QueryMode,
    /// One weight per table column, in declaration order.
    pub column_weights: Vec<f64>,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            order_mode: OrderMode::Natural,
            query_mode: QueryMode::Terms,
            column_weights: DEFAULT_COLUMN_WEIGHTS.to_vec(),
        }
    }
}

impl SearcherConfig {
    /// Defaults overridden by `SEARCHKIT_ORDER_MODE` and `SEARCHKIT_QUERY_MODE`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("SEARCHKIT_ORDER_MODE") {
            match val.parse() {
                Ok(order) => cfg.order_mode = order,
                Err(e) => warn!(value = %val, error = %e, "ignoring SEARCHKIT_ORDER_MODE"),
            }
        }

        if let Ok(val) = dotenvy::var("SEARCHKIT_QUERY_MODE") {
            match val.parse() {
                Ok(mode) => cfg.query_mode = mode,
                Err(e) => warn!(value = %val, error = %e, "ignoring SEARCHKIT_QUERY_MODE"),
            }
        }

        cfg
    }
}

/// Read side of an index.
pub struct Searcher<T = IndexDocument> {
    store: IndexStore,
    lane: SerialLane,
    config: SearcherConfig,
    factory: ItemFactory<T>,
}

impl<T> std::fmt::Debug for Searcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Searcher")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Searcher<IndexDocument> {
    /// Search the same table (and connection) an indexer writes to.
    pub fn from_indexer(indexer: &Indexer) -> anyhow::Result<Self> {
        Self::with_store(indexer.store().clone())
    }

    /// Open a searcher with its own connection.
    pub fn open(
        location: DatabaseLocation,
        index_name: Option<&str>,
        config: &SearchKitConfig,
    ) -> anyhow::Result<Self> {
        let index_name = index_name
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_INDEX_NAME);
        Self::with_store(IndexStore::open(&location, index_name, config)?)
    }

    pub fn with_store(store: IndexStore) -> anyhow::Result<Self> {
        let lane = SerialLane::spawn(format!("searchkit-search-{}", store.index_name()))?;
        Ok(Self {
            store,
            lane,
            config: SearcherConfig::default(),
            factory: Arc::new(|doc: IndexDocument| doc),
        })
    }
}

impl<T: Send + 'static> Searcher<T> {
    /// Replace the row conversion; subsequent results are produced by `factory`.
    pub fn with_item_factory<U, F>(self, factory: F) -> Searcher<U>
    where
        F: Fn(IndexDocument) -> U + Send + Sync + 'static,
    {
        Searcher {
            store: self.store,
            lane: self.lane,
            config: self.config,
            factory: Arc::new(factory),
        }
    }

    pub fn with_config(mut self, config: SearcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_order_mode(mut self, order: OrderMode) -> Self {
        self.config.order_mode = order;
        self
    }

    /// Affects queries submitted after the call.
    pub fn set_order_mode(&mut self, order: OrderMode) {
        self.config.order_mode = order;
    }

    pub fn order_mode(&self) -> OrderMode {
        self.config.order_mode
    }

    pub fn set_query_mode(&mut self, mode: QueryMode) {
        self.config.query_mode = mode;
    }

    /// Rejects weights that do not match the table layout.
    pub fn set_column_weights(&mut self, weights: &[f64]) -> Result<()> {
        validate_weights(weights)?;
        self.config.column_weights = weights.to_vec();
        Ok(())
    }

    pub fn config(&self) -> &SearcherConfig {
        &self.config
    }

    pub fn index_name(&self) -> &str {
        self.store.index_name()
    }

    pub fn engine(&self) -> EngineGeneration {
        self.store.table().engine
    }

    /// Matching rows, converted by the item factory.
    ///
    /// `item_type` of [`ITEM_TYPE_IGNORE`] matches every type. `offset` and
    /// `limit` are applied only when at least 1.
    pub fn find(
        &self,
        text: &str,
        item_type: ItemType,
        offset: usize,
        limit: usize,
    ) -> Completion<Vec<T>> {
        let store = self.store.clone();
        let config = self.config.clone();
        let factory = Arc::clone(&self.factory);
        let text = text.to_string();
        self.lane.submit(move || {
            let start = Instant::now();
            let docs = {
                let conn = store.lock();
                let query = plan_query(store.table(), &config, &text, item_type, offset, limit)?;
                query_documents(&conn, &query)?
            };
            debug!(
                index = store.index_name(),
                query = %text,
                item_type,
                hits = docs.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "search finished"
            );
            Ok(docs.into_iter().map(|doc| factory(doc)).collect())
        })
    }

    /// All matches of `text`, any type, no pagination.
    pub fn find_text(&self, text: &str) -> Completion<Vec<T>> {
        self.find(text, ITEM_TYPE_IGNORE, 0, 0)
    }

    /// Number of rows matching `text`, ignoring pagination and ordering.
    pub fn count_matches(&self, text: &str, item_type: ItemType) -> Completion<u64> {
        let store = self.store.clone();
        let mode = self.config.query_mode;
        let text = text.to_string();
        self.lane.submit(move || {
            let query = build_count_sql(store.table(), &text, item_type, mode)?;
            let conn = store.lock();
            let n: i64 = conn.query_row(&query.sql, query.param_refs().as_slice(), |row| {
                row.get(0)
            })?;
            Ok(n.max(0) as u64)
        })
    }

    /// Stream matches to `handler` on the calling thread, in the configured
    /// order, until it returns [`ControlFlow::Break`].
    ///
    /// Returns the number of results delivered. The store's connection stays
    /// locked for the duration, so `handler` must not call back into an
    /// indexer or searcher sharing it.
    pub fn enumerate<F>(&self, text: &str, item_type: ItemType, mut handler: F) -> Result<usize>
    where
        F: FnMut(T) -> ControlFlow<()>,
    {
        let query = plan_query(self.store.table(), &self.config, text, item_type, 0, 0)?;
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&query.sql)?;
        let mut rows = stmt.query(query.param_refs().as_slice())?;

        let mut delivered = 0;
        while let Some(row) = rows.next()? {
            let doc = document_from_row(row)?;
            delivered += 1;
            if handler((self.factory)(doc)).is_break() {
                trace!(index = self.store.index_name(), delivered, "enumeration stopped");
                break;
            }
        }
        Ok(delivered)
    }
}

fn plan_query(
    table: &TableInfo,
    config: &SearcherConfig,
    text: &str,
    item_type: ItemType,
    offset: usize,
    limit: usize,
) -> Result<BuiltQuery> {
    if config.order_mode == OrderMode::Relevance
        && table.engine.supports_matchinfo()
        && !table.supports_ranking
    {
        return Err(SearchKitError::Query(format!(
            "relevance ordering is unavailable: rank() is not registered for {}",
            table.name
        )));
    }
    build_search_sql(
        table,
        &QueryPlan {
            text,
            item_type,
            offset,
            limit,
            order: config.order_mode,
            query_mode: config.query_mode,
            weights: &config.column_weights,
        },
    )
}

fn query_documents(conn: &Connection, query: &BuiltQuery) -> Result<Vec<IndexDocument>> {
    let mut stmt = conn.prepare(&query.sql)?;
    let docs = stmt
        .query_map(query.param_refs().as_slice(), document_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(docs)
}
