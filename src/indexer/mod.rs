//! Mutation pipeline: every write to an index goes through one serial lane.
//!
//! All mutating calls return immediately with a [`Completion`]; the work runs on
//! the indexer's lane in submission order and the completion resolves on that
//! lane once the write has committed.

use std::path::Path;
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::SearchKitConfig;
use crate::error::{Result, SearchKitError};
use crate::lane::{Completion, SerialLane};
use crate::model::types::{
    ITEM_TYPE_IGNORE, IndexDocument, IndexItem, ItemType, Meta, generate_identifier,
};
use crate::storage::sqlite::{
    self, DEFAULT_INDEX_NAME, DatabaseLocation, EngineGeneration, IndexStore, TableInfo,
};

/// A batch item that was not written, with the reason.
#[derive(Debug)]
pub struct ItemFailure<I> {
    pub item: I,
    pub error: SearchKitError,
}

/// Per-batch result: items written and items rejected or failed.
#[derive(Debug)]
pub struct IndexOutcome<I> {
    pub indexed: Vec<I>,
    pub failures: Vec<ItemFailure<I>>,
}

impl<I> Default for IndexOutcome<I> {
    fn default() -> Self {
        Self {
            indexed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<I> IndexOutcome<I> {
    /// True when every submitted item was written.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Serialized writer for one index table.
pub struct Indexer {
    store: IndexStore,
    lane: SerialLane,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("store", &self.store)
            .field("lane", &self.lane)
            .finish()
    }
}

impl Indexer {
    /// Open or create `index_name` (default [`DEFAULT_INDEX_NAME`]) at `location`.
    pub fn open(
        location: DatabaseLocation,
        index_name: Option<&str>,
        config: &SearchKitConfig,
    ) -> anyhow::Result<Self> {
        let index_name = index_name
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_INDEX_NAME);
        let store = IndexStore::open(&location, index_name, config)?;
        Self::with_store(store)
    }

    /// Database `db_name` in the cache directory; empty name means in memory.
    pub fn named(db_name: &str, index_name: Option<&str>) -> anyhow::Result<Self> {
        Self::open(
            DatabaseLocation::named(db_name),
            index_name,
            &SearchKitConfig::from_env(),
        )
    }

    pub fn at_path(path: impl AsRef<Path>, index_name: Option<&str>) -> anyhow::Result<Self> {
        Self::open(
            DatabaseLocation::path(path.as_ref()),
            index_name,
            &SearchKitConfig::from_env(),
        )
    }

    pub fn in_memory(index_name: Option<&str>) -> anyhow::Result<Self> {
        Self::open(
            DatabaseLocation::InMemory,
            index_name,
            &SearchKitConfig::from_env(),
        )
    }

    /// Build an indexer over an already opened store.
    pub fn with_store(store: IndexStore) -> anyhow::Result<Self> {
        let lane = SerialLane::spawn(format!("searchkit-index-{}", store.index_name()))?;
        Ok(Self { store, lane })
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Table name; fixed for the lifetime of the indexer.
    pub fn index_name(&self) -> &str {
        self.store.index_name()
    }

    /// `None` for in-memory stores.
    pub fn database_path(&self) -> Option<&Path> {
        self.store.path()
    }

    pub fn engine(&self) -> EngineGeneration {
        self.store.table().engine
    }

    pub fn supports_ranking(&self) -> bool {
        self.store.table().supports_ranking
    }

    /// Total rows in the index. Runs on the caller's thread.
    pub fn count(&self) -> Result<u64> {
        self.store.count()
    }

    /// Block until every operation submitted so far has completed.
    pub fn drain(&self) -> Result<()> {
        self.lane.drain()
    }

    /// Item writes: the job takes the lock itself so hooks run without it.
    fn run_items<T, F>(&self, job: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&IndexStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        self.lane.submit(move || job(&store))
    }

    fn run<T, F>(&self, job: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &TableInfo) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        self.lane.submit(move || {
            let mut conn = store.lock();
            job(&mut conn, store.table())
        })
    }

    // ---------------------------------------------------------------------
    // Adding
    // ---------------------------------------------------------------------

    /// Add one item, replacing any row with the same identifier.
    pub fn add<I: IndexItem>(&self, mut item: I) -> Completion<I> {
        self.run_items(move |store| {
            write_item(store, &mut item)?;
            Ok(item)
        })
    }

    /// Add items one by one within a single lane turn.
    ///
    /// Not atomic: a failed item is reported in the outcome and earlier items
    /// stay committed.
    pub fn add_batch<I, It>(&self, items: It) -> Completion<IndexOutcome<I>>
    where
        I: IndexItem,
        It: IntoIterator<Item = I>,
    {
        let items: Vec<I> = items.into_iter().collect();
        self.run_items(move |store| {
            let table = store.table();
            let start = Instant::now();
            let submitted = items.len();
            let mut outcome = IndexOutcome::default();
            for mut item in items {
                match write_item(store, &mut item) {
                    Ok(_) => outcome.indexed.push(item),
                    Err(error) => {
                        warn!(index = %table.name, error = %error, "batch item not indexed");
                        outcome.failures.push(ItemFailure { item, error });
                    }
                }
            }
            info!(
                index = %table.name,
                submitted,
                indexed = outcome.indexed.len(),
                failed = outcome.failures.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "batch indexed"
            );
            Ok(outcome)
        })
    }

    /// Index raw text as a new [`IndexDocument`].
    ///
    /// The identifier is assigned before queuing, so the returned document can
    /// be used right away.
    pub fn add_text_contents(
        &self,
        text_contents: impl Into<String>,
        item_type: ItemType,
        meta: Option<Meta>,
    ) -> (IndexDocument, Completion<IndexDocument>) {
        let mut doc = IndexDocument::new(text_contents)
            .with_identifier(generate_identifier())
            .with_item_type(item_type);
        doc.meta = meta;
        (doc.clone(), self.add(doc))
    }

    /// Remove-then-add of the item's identifier in one transaction.
    pub fn update<I: IndexItem>(&self, mut item: I) -> Completion<I> {
        self.run_items(move |store| {
            let replaced = write_item(store, &mut item)?;
            debug!(
                index = store.index_name(),
                identifier = item.index_item_identifier().unwrap_or_default(),
                replaced,
                "item updated"
            );
            Ok(item)
        })
    }

    // ---------------------------------------------------------------------
    // Removing
    // ---------------------------------------------------------------------

    /// Delete rows with `identifier`. Missing identifiers are not an error.
    pub fn remove(&self, identifier: impl Into<String>) -> Completion<usize> {
        self.remove_batch([identifier.into()])
    }

    pub fn remove_item<I: IndexItem + ?Sized>(&self, item: &I) -> Completion<usize> {
        match item.index_item_identifier() {
            Some(id) => self.remove(id),
            None => Completion::ready(Err(SearchKitError::validation(
                None,
                "item has no identifier",
            ))),
        }
    }

    /// Delete several identifiers in one transaction. Returns rows deleted.
    pub fn remove_batch<S, It>(&self, identifiers: It) -> Completion<usize>
    where
        S: Into<String>,
        It: IntoIterator<Item = S>,
    {
        let identifiers: Vec<String> = identifiers.into_iter().map(Into::into).collect();
        self.run(move |conn, table| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            for id in &identifiers {
                removed += sqlite::delete_rows(&tx, &table.name, id)?;
            }
            tx.commit()?;
            debug!(
                index = %table.name,
                requested = identifiers.len(),
                removed,
                "items removed"
            );
            Ok(removed)
        })
    }

    /// Drop the whole index table and recreate it empty.
    ///
    /// Resolves to whether the table existed.
    pub fn remove_all(&self) -> Completion<bool> {
        self.run(|conn, table| {
            let existed = sqlite::drop_index_table(conn, &table.name)?;
            sqlite::ensure_index_table(conn, &table.name, table.engine)?;
            info!(index = %table.name, existed, "index cleared");
            Ok(existed)
        })
    }

    /// Drop the table and delete the backing database file.
    ///
    /// Waits for queued operations first. Returns `Ok(false)` when there was
    /// nothing to delete.
    pub fn destroy(self) -> Result<bool> {
        self.lane.drain()?;
        let Indexer { store, lane } = self;
        drop(lane);

        let table_existed = sqlite::drop_index_table(&store.lock(), store.index_name())?;
        let path = store.path().map(Path::to_path_buf);
        if store.handle_count() > 1 {
            warn!(
                index = store.index_name(),
                "destroying index while searchers still hold its connection"
            );
        }
        drop(store);

        let file_removed = match path {
            Some(path) => {
                let removed = sqlite::remove_database_files(&path)?;
                info!(path = %path.display(), removed, "index database removed");
                removed
            }
            None => false,
        };
        Ok(table_existed || file_removed)
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    /// Rebuild the full-text structures of every row. Resolves to the row count.
    ///
    /// Identifiers, types and metadata are carried over unchanged.
    pub fn reindex(&self) -> Completion<usize> {
        self.run(|conn, table| {
            let start = Instant::now();
            let tx = conn.transaction()?;
            let rows = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT identifier, textContents, itemType, meta FROM \"{}\"",
                    table.name
                ))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, ItemType>(2)?,
                            row.get::<_, Option<Vec<u8>>>(3)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            tx.execute(&format!("DELETE FROM \"{}\"", table.name), [])?;
            for (id, text, item_type, meta) in &rows {
                tx.execute(
                    &format!(
                        "INSERT INTO \"{}\" (identifier, textContents, itemType, meta) VALUES (?1, ?2, ?3, ?4)",
                        table.name
                    ),
                    rusqlite::params![id, text, item_type, meta],
                )?;
            }
            tx.commit()?;

            info!(
                index = %table.name,
                rows = rows.len(),
                elapsed_ms = start.elapsed().as_millis(),
                "index rebuilt"
            );
            Ok(rows.len())
        })
    }

    /// Merge the full-text index b-trees. No data changes.
    pub fn optimize(&self) -> Completion<()> {
        self.run(|conn, table| {
            let start = Instant::now();
            conn.execute(
                &format!(
                    "INSERT INTO \"{0}\"(\"{0}\") VALUES('optimize')",
                    table.name
                ),
                [],
            )?;
            info!(
                index = %table.name,
                elapsed_ms = start.elapsed().as_millis(),
                "index optimized"
            );
            Ok(())
        })
    }
}

fn validate_item<I: IndexItem>(item: &I) -> Result<()> {
    let id = item.index_item_identifier();
    if !item.can_index() {
        return Err(SearchKitError::validation(id, "item cannot be indexed"));
    }
    if item.index_text_contents().trim().is_empty() {
        return Err(SearchKitError::validation(id, "text contents are empty"));
    }
    if item.index_item_type() == ITEM_TYPE_IGNORE {
        return Err(SearchKitError::validation(
            id,
            "item type is reserved for query filters",
        ));
    }
    Ok(())
}

/// Validate, run hooks and write one item in its own transaction.
///
/// The store lock is held only around the transaction. Returns the number of
/// rows the write replaced.
fn write_item<I: IndexItem>(store: &IndexStore, item: &mut I) -> Result<usize> {
    let table = store.index_name();
    validate_item(item)?;
    if item.index_item_identifier().is_none() {
        item.set_index_item_identifier(generate_identifier());
    }
    let identifier = item
        .index_item_identifier()
        .map(str::to_owned)
        .ok_or_else(|| SearchKitError::validation(None, "identifier could not be assigned"))?;

    item.will_index();
    let meta = sqlite::encode_meta(item.index_meta())?;

    let replaced = {
        let mut conn = store.lock();
        let tx = conn.transaction()?;
        let replaced = sqlite::delete_rows(&tx, table, &identifier)?;
        sqlite::insert_row(
            &tx,
            table,
            &identifier,
            item.index_text_contents(),
            item.index_item_type(),
            meta.as_deref(),
        )?;
        tx.commit()?;
        replaced
    };

    item.did_index();
    debug!(index = table, identifier = %identifier, replaced, "item indexed");
    Ok(replaced)
}
