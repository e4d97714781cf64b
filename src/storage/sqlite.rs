//! `SQLite` backend: engine generations, database location, FTS table schema
//! and row encoding.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::config::SearchKitConfig;
use crate::error::SearchKitError;
use crate::model::types::{IndexDocument, ItemType, Meta};
use crate::search::rank::register_rank_function;

/// Table columns, in declaration order.
pub const COLUMNS: [&str; 4] = ["identifier", "textContents", "itemType", "meta"];
pub const COLUMN_COUNT: usize = COLUMNS.len();

/// Index name used when the caller does not supply one.
pub const DEFAULT_INDEX_NAME: &str = "cbs_fts";

// -------------------------------------------------------------------------
// Engine generations
// -------------------------------------------------------------------------

/// Full-text engine module a table is created with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineGeneration {
    Fts3,
    #[default]
    Fts4,
    Fts5,
}

impl EngineGeneration {
    pub fn module_name(self) -> &'static str {
        match self {
            EngineGeneration::Fts3 => "fts3",
            EngineGeneration::Fts4 => "fts4",
            EngineGeneration::Fts5 => "fts5",
        }
    }

    /// Whether `matchinfo()` (and therefore `rank()`) is available.
    pub fn supports_matchinfo(self) -> bool {
        matches!(self, EngineGeneration::Fts3 | EngineGeneration::Fts4)
    }

    fn create_table_sql(self, table: &str) -> String {
        match self {
            EngineGeneration::Fts3 => format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS \"{table}\" USING fts3(identifier, textContents, itemType, meta)"
            ),
            EngineGeneration::Fts4 => format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS \"{table}\" USING fts4(identifier, textContents, itemType, meta, notindexed=itemType, notindexed=meta)"
            ),
            EngineGeneration::Fts5 => format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS \"{table}\" USING fts5(identifier UNINDEXED, textContents, itemType UNINDEXED, meta UNINDEXED)"
            ),
        }
    }
}

impl fmt::Display for EngineGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_name())
    }
}

impl FromStr for EngineGeneration {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fts3" | "3" => Ok(EngineGeneration::Fts3),
            "fts4" | "4" => Ok(EngineGeneration::Fts4),
            "fts5" | "5" => Ok(EngineGeneration::Fts5),
            other => Err(format!("unknown FTS engine generation: {other}")),
        }
    }
}

// -------------------------------------------------------------------------
// Database location
// -------------------------------------------------------------------------

/// Where an index database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Transient store, gone when the last connection closes.
    InMemory,
    /// File name resolved inside the cache directory.
    Named(String),
    /// Explicit file path.
    Path(PathBuf),
}

impl DatabaseLocation {
    /// Named database; an empty name selects an in-memory store.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            DatabaseLocation::InMemory
        } else {
            DatabaseLocation::Named(name)
        }
    }

    /// Explicit path; an empty path selects an in-memory store.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.as_os_str().is_empty() {
            DatabaseLocation::InMemory
        } else {
            DatabaseLocation::Path(path)
        }
    }

    /// File path for this location, `None` when in memory.
    pub fn resolve(&self, config: &SearchKitConfig) -> Option<PathBuf> {
        match self {
            DatabaseLocation::InMemory => None,
            DatabaseLocation::Named(name) => database_path_with_component(config, name),
            DatabaseLocation::Path(path) => Some(path.clone()),
        }
    }
}

/// Path of a database named `component` in the cache directory.
///
/// Returns `None` for an empty component.
pub fn database_path_with_component(config: &SearchKitConfig, component: &str) -> Option<PathBuf> {
    if component.trim().is_empty() {
        return None;
    }
    Some(config.resolved_cache_dir().join(component))
}

// -------------------------------------------------------------------------
// Connection + schema
// -------------------------------------------------------------------------

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_index_name(name: &str) -> std::result::Result<(), SearchKitError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SearchKitError::InvalidIndexName(name.to_string()))
    }
}

pub fn open_connection(path: Option<&Path>, config: &SearchKitConfig) -> Result<Connection> {
    let conn = match path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating db directory {}", parent.display()))?;
            }
            let conn = Connection::open(path)
                .with_context(|| format!("opening sqlite db at {}", path.display()))?;
            apply_file_pragmas(&conn)?;
            conn
        }
        None => Connection::open_in_memory().context("opening in-memory sqlite db")?,
    };
    apply_common_pragmas(&conn, config.busy_timeout)?;
    Ok(conn)
}

fn apply_file_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;
    Ok(())
}

fn apply_common_pragmas(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
    Ok(())
}

/// Effective layout of an opened index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    /// Generation the table was actually created with.
    pub engine: EngineGeneration,
    /// `rank()` is registered and usable against this table.
    pub supports_ranking: bool,
}

/// Read the generation of an existing table from its `CREATE` statement.
pub fn detect_table_generation(
    conn: &Connection,
    table: &str,
) -> rusqlite::Result<Option<EngineGeneration>> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;

    Ok(sql.map(|sql| {
        let lower = sql.to_ascii_lowercase();
        if lower.contains("using fts5") {
            EngineGeneration::Fts5
        } else if lower.contains("using fts4") {
            EngineGeneration::Fts4
        } else {
            EngineGeneration::Fts3
        }
    }))
}

/// Create the index table if needed and register `rank()` when usable.
///
/// An existing table keeps the generation it was created with; a mismatch with
/// `requested` is logged and the existing generation wins.
pub fn ensure_index_table(
    conn: &Connection,
    table: &str,
    requested: EngineGeneration,
) -> std::result::Result<TableInfo, SearchKitError> {
    validate_index_name(table)?;

    let engine = match detect_table_generation(conn, table)? {
        Some(existing) => {
            if existing != requested {
                warn!(
                    index = table,
                    existing = %existing,
                    requested = %requested,
                    "index table uses a different FTS generation; keeping existing table"
                );
            }
            existing
        }
        None => {
            conn.execute_batch(&requested.create_table_sql(table))?;
            debug!(index = table, engine = %requested, "created index table");
            requested
        }
    };

    let supports_ranking = engine.supports_matchinfo()
        && match register_rank_function(conn) {
            Ok(()) => true,
            Err(e) => {
                warn!(index = table, error = %e, "failed to register rank()");
                false
            }
        };

    Ok(TableInfo {
        name: table.to_string(),
        engine,
        supports_ranking,
    })
}

/// Drop the index table. Returns whether it existed.
pub fn drop_index_table(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let existed = detect_table_generation(conn, table)?.is_some();
    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;
    Ok(existed)
}

/// Remove a database file and its WAL/SHM sidecars.
///
/// Returns `Ok(false)` when the main file does not exist.
pub fn remove_database_files(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }

    // Best-effort removal of sidecar files (ignore errors if they don't exist)
    let path_str = path.to_string_lossy();
    let _ = fs::remove_file(format!("{path_str}-wal"));
    let _ = fs::remove_file(format!("{path_str}-shm"));

    Ok(true)
}

// -------------------------------------------------------------------------
// Meta serialization
// -------------------------------------------------------------------------
// Meta is stored as MessagePack. Empty maps are stored as NULL.

pub fn encode_meta(meta: Option<&Meta>) -> std::result::Result<Option<Vec<u8>>, SearchKitError> {
    match meta {
        None => Ok(None),
        Some(m) if m.is_empty() => Ok(None),
        Some(m) => rmp_serde::to_vec(m)
            .map(Some)
            .map_err(|e| SearchKitError::Meta(e.to_string())),
    }
}

pub fn decode_meta(bytes: &[u8]) -> std::result::Result<Option<Meta>, SearchKitError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    rmp_serde::from_slice(bytes)
        .map(Some)
        .map_err(|e| SearchKitError::Meta(e.to_string()))
}

// -------------------------------------------------------------------------
// Row access
// -------------------------------------------------------------------------

/// Build a document from `identifier, textContents, itemType, meta`.
pub fn document_from_row(row: &Row<'_>) -> rusqlite::Result<IndexDocument> {
    let identifier: Option<String> = row.get(0)?;
    let text_contents: Option<String> = row.get(1)?;
    let item_type: ItemType = row.get(2)?;
    let meta = match row.get::<_, Option<Vec<u8>>>(3)? {
        Some(bytes) => decode_meta(&bytes).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Blob, Box::new(e))
        })?,
        None => None,
    };
    Ok(IndexDocument {
        identifier,
        text_contents: text_contents.unwrap_or_default(),
        item_type,
        meta,
    })
}

pub fn insert_row(
    conn: &Connection,
    table: &str,
    identifier: &str,
    text_contents: &str,
    item_type: ItemType,
    meta: Option<&[u8]>,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO \"{table}\" (identifier, textContents, itemType, meta) VALUES (?1, ?2, ?3, ?4)"
        ),
        params![identifier, text_contents, item_type, meta],
    )?;
    Ok(())
}

/// Delete every row carrying `identifier`. Returns the number removed.
pub fn delete_rows(conn: &Connection, table: &str, identifier: &str) -> rusqlite::Result<usize> {
    conn.execute(
        &format!("DELETE FROM \"{table}\" WHERE identifier = ?1"),
        params![identifier],
    )
}

pub fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })?;
    Ok(n.max(0) as u64)
}

// -------------------------------------------------------------------------
// Shared store handle
// -------------------------------------------------------------------------

/// One connection to one index table, shareable between an indexer and its
/// searchers.
#[derive(Clone)]
pub struct IndexStore {
    path: Option<PathBuf>,
    table: TableInfo,
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexStore")
            .field("path", &self.path)
            .field("table", &self.table)
            .finish()
    }
}

impl IndexStore {
    /// Open (or create) `index_name` inside the database at `location`.
    pub fn open(
        location: &DatabaseLocation,
        index_name: &str,
        config: &SearchKitConfig,
    ) -> Result<Self> {
        let start = Instant::now();
        let path = location.resolve(config);
        let conn = open_connection(path.as_deref(), config)?;
        let table = ensure_index_table(&conn, index_name, config.engine)
            .with_context(|| format!("preparing index table {index_name}"))?;

        info!(
            index = index_name,
            path = %path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| ":memory:".into()),
            engine = %table.engine,
            ranking = table.supports_ranking,
            elapsed_ms = start.elapsed().as_millis(),
            "opened index store"
        );

        Ok(Self {
            path,
            table,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn table(&self) -> &TableInfo {
        &self.table
    }

    pub fn index_name(&self) -> &str {
        &self.table.name
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Number of handles sharing the connection.
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.conn)
    }

    pub fn count(&self) -> std::result::Result<u64, SearchKitError> {
        Ok(count_rows(&self.lock(), &self.table.name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> SearchKitConfig {
        SearchKitConfig::default().with_cache_dir(dir.path())
    }

    #[test]
    fn engine_generation_parses_and_orders() {
        assert_eq!("FTS3".parse(), Ok(EngineGeneration::Fts3));
        assert_eq!(" fts5 ".parse(), Ok(EngineGeneration::Fts5));
        assert_eq!("4".parse(), Ok(EngineGeneration::Fts4));
        assert!("fts2".parse::<EngineGeneration>().is_err());
        assert!(EngineGeneration::Fts3 < EngineGeneration::Fts4);
        assert!(EngineGeneration::Fts4 < EngineGeneration::Fts5);
        assert_eq!(EngineGeneration::default(), EngineGeneration::Fts4);
    }

    #[test]
    fn location_resolution() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);

        assert_eq!(DatabaseLocation::named("").resolve(&cfg), None);
        assert_eq!(DatabaseLocation::path("").resolve(&cfg), None);
        assert_eq!(
            DatabaseLocation::named("notes.db").resolve(&cfg),
            Some(dir.path().join("notes.db"))
        );
        assert_eq!(
            DatabaseLocation::path("/abs/index.db").resolve(&cfg),
            Some(PathBuf::from("/abs/index.db"))
        );
        assert_eq!(database_path_with_component(&cfg, "  "), None);
    }

    #[test]
    fn index_name_validation() {
        assert!(validate_index_name("cbs_fts").is_ok());
        assert!(validate_index_name("_docs2").is_ok());
        assert!(validate_index_name("").is_err());
        assert!(validate_index_name("2docs").is_err());
        assert!(validate_index_name("docs\"; DROP").is_err());
        assert!(validate_index_name("my-index").is_err());
    }

    #[test]
    fn ensure_table_creates_each_generation() {
        for engine in [
            EngineGeneration::Fts3,
            EngineGeneration::Fts4,
            EngineGeneration::Fts5,
        ] {
            let conn = Connection::open_in_memory().unwrap();
            let info = ensure_index_table(&conn, "docs", engine).unwrap();
            assert_eq!(info.engine, engine);
            assert_eq!(info.supports_ranking, engine.supports_matchinfo());
            assert_eq!(detect_table_generation(&conn, "docs").unwrap(), Some(engine));

            // Idempotent.
            let again = ensure_index_table(&conn, "docs", engine).unwrap();
            assert_eq!(again, info);
        }
    }

    #[test]
    fn ensure_table_keeps_existing_generation() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_index_table(&conn, "docs", EngineGeneration::Fts3).unwrap();
        let info = ensure_index_table(&conn, "docs", EngineGeneration::Fts5).unwrap();
        assert_eq!(info.engine, EngineGeneration::Fts3);
        assert!(info.supports_ranking);
    }

    #[test]
    fn drop_reports_existence() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!drop_index_table(&conn, "docs").unwrap());
        ensure_index_table(&conn, "docs", EngineGeneration::Fts4).unwrap();
        assert!(drop_index_table(&conn, "docs").unwrap());
        assert_eq!(detect_table_generation(&conn, "docs").unwrap(), None);
    }

    #[test]
    fn meta_round_trips_structurally() {
        let mut meta = Meta::new();
        meta.insert("title".into(), json!("Doc"));
        meta.insert("tags".into(), json!(["a", "b"]));
        meta.insert("nested".into(), json!({"n": 3, "ok": true, "ratio": 0.5}));

        let bytes = encode_meta(Some(&meta)).unwrap().unwrap();
        assert_eq!(decode_meta(&bytes).unwrap(), Some(meta));
    }

    #[test]
    fn empty_meta_is_stored_as_null() {
        assert_eq!(encode_meta(None).unwrap(), None);
        assert_eq!(encode_meta(Some(&Meta::new())).unwrap(), None);
        assert_eq!(decode_meta(&[]).unwrap(), None);
        assert!(decode_meta(&[0xc1]).is_err());
    }

    #[test]
    fn rows_round_trip_through_table() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_index_table(&conn, "docs", EngineGeneration::Fts4).unwrap();

        let mut meta = Meta::new();
        meta.insert("k".into(), json!("v"));
        let blob = encode_meta(Some(&meta)).unwrap();
        insert_row(&conn, "docs", "id-1", "hello world", 4, blob.as_deref()).unwrap();
        insert_row(&conn, "docs", "id-2", "other", 0, None).unwrap();
        assert_eq!(count_rows(&conn, "docs").unwrap(), 2);

        let doc = conn
            .query_row(
                "SELECT identifier, textContents, itemType, meta FROM docs WHERE identifier = 'id-1'",
                [],
                document_from_row,
            )
            .unwrap();
        assert_eq!(doc.identifier.as_deref(), Some("id-1"));
        assert_eq!(doc.text_contents, "hello world");
        assert_eq!(doc.item_type, 4);
        assert_eq!(doc.meta, Some(meta));

        assert_eq!(delete_rows(&conn, "docs", "id-1").unwrap(), 1);
        assert_eq!(delete_rows(&conn, "docs", "missing").unwrap(), 0);
        assert_eq!(count_rows(&conn, "docs").unwrap(), 1);
    }

    #[test]
    fn remove_database_files_handles_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.db");
        assert!(!remove_database_files(&path).unwrap());

        std::fs::write(&path, b"x").unwrap();
        std::fs::write(dir.path().join("gone.db-wal"), b"x").unwrap();
        assert!(remove_database_files(&path).unwrap());
        assert!(!path.exists());
        assert!(!dir.path().join("gone.db-wal").exists());
    }

    #[test]
    fn store_opens_named_database_in_cache_dir() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(&dir);
        let store = IndexStore::open(&DatabaseLocation::named("named.db"), "docs", &cfg).unwrap();
        assert_eq!(store.path(), Some(dir.path().join("named.db").as_path()));
        assert!(dir.path().join("named.db").exists());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.index_name(), "docs");
    }

    #[test]
    fn store_rejects_bad_index_name() {
        let cfg = SearchKitConfig::default();
        assert!(IndexStore::open(&DatabaseLocation::InMemory, "bad name", &cfg).is_err());
    }
}
