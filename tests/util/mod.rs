use std::sync::Arc;

use fts_searchkit::{
    DatabaseLocation, EngineGeneration, IndexDocument, IndexItem, Indexer, ItemType, Meta,
    SearchKitConfig, Searcher,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Captures tracing output for tests.
///
/// Only events emitted on the installing thread are captured.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Temporary directory used as the cache dir for named databases.
#[allow(dead_code)]
pub struct TempIndexDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempIndexDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn config(&self, engine: EngineGeneration) -> SearchKitConfig {
        SearchKitConfig::default()
            .with_engine(engine)
            .with_cache_dir(self.dir.path())
    }

    pub fn db_path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

pub const ALL_ENGINES: [EngineGeneration; 3] = [
    EngineGeneration::Fts3,
    EngineGeneration::Fts4,
    EngineGeneration::Fts5,
];

/// In-memory indexer plus a searcher sharing its connection.
#[allow(dead_code)]
pub fn memory_pair(engine: EngineGeneration) -> (Indexer, Searcher) {
    let cfg = SearchKitConfig::default().with_engine(engine);
    let indexer = Indexer::open(DatabaseLocation::InMemory, None, &cfg).expect("open indexer");
    let searcher = Searcher::from_indexer(&indexer).expect("open searcher");
    (indexer, searcher)
}

#[allow(dead_code)]
pub fn doc(id: &str, text: &str) -> IndexDocument {
    IndexDocument::new(text).with_identifier(id)
}

#[allow(dead_code)]
pub fn sorted_ids(docs: &[IndexDocument]) -> Vec<String> {
    let mut ids: Vec<String> = docs.iter().filter_map(|d| d.identifier.clone()).collect();
    ids.sort();
    ids
}

/// Application-side item that records its lifecycle hooks.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Note {
    pub id: Option<String>,
    pub body: String,
    pub kind: ItemType,
    pub meta: Option<Meta>,
    pub archived: bool,
    pub journal: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl Note {
    pub fn new(body: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: None,
            body: body.to_string(),
            kind: 1,
            meta: None,
            archived: false,
            journal: Arc::clone(journal),
        }
    }

    fn record(&self, event: &str) {
        self.journal
            .lock()
            .push(format!("{event}:{}", self.body));
    }
}

impl IndexItem for Note {
    fn index_item_identifier(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_index_item_identifier(&mut self, identifier: String) {
        self.id = Some(identifier);
    }

    fn index_text_contents(&self) -> &str {
        &self.body
    }

    fn index_item_type(&self) -> ItemType {
        self.kind
    }

    fn index_meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    fn can_index(&self) -> bool {
        !self.archived
    }

    fn will_index(&mut self) {
        self.record("will");
    }

    fn did_index(&mut self) {
        self.record("did");
    }
}
