//! Process-level configuration for opening indexes.
//!
//! Values are passed explicitly at construction. `SearchKitConfig::from_env`
//! reads overrides from the environment (and a `.env` file, via `dotenvy`):
//!
//! - `SEARCHKIT_FTS_ENGINE`: `fts3`, `fts4` or `fts5`
//! - `SEARCHKIT_CACHE_DIR`: directory used for named databases
//! - `SEARCHKIT_BUSY_TIMEOUT_MS`: SQLite busy timeout

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::storage::sqlite::EngineGeneration;

/// Directory name appended to the platform cache dir for named databases.
pub const CACHE_DIR_NAME: &str = "fts-searchkit";

#[derive(Debug, Clone)]
pub struct SearchKitConfig {
    /// Generation used when a table is created. Existing tables keep theirs.
    pub engine: EngineGeneration,
    /// Overrides the platform cache directory for named databases.
    pub cache_dir: Option<PathBuf>,
    pub busy_timeout: Duration,
}

impl Default for SearchKitConfig {
    fn default() -> Self {
        Self {
            engine: EngineGeneration::default(),
            cache_dir: None,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SearchKitConfig {
    /// Load config from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("SEARCHKIT_FTS_ENGINE") {
            match val.parse() {
                Ok(engine) => cfg.engine = engine,
                Err(e) => warn!(value = %val, error = %e, "ignoring SEARCHKIT_FTS_ENGINE"),
            }
        }

        if let Ok(dir) = dotenvy::var("SEARCHKIT_CACHE_DIR")
            && !dir.trim().is_empty()
        {
            cfg.cache_dir = Some(PathBuf::from(dir));
        }

        if let Ok(val) = dotenvy::var("SEARCHKIT_BUSY_TIMEOUT_MS")
            && let Ok(ms) = val.parse()
        {
            cfg.busy_timeout = Duration::from_millis(ms);
        }

        cfg
    }

    pub fn with_engine(mut self, engine: EngineGeneration) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Directory where named databases live.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(CACHE_DIR_NAME)
        })
    }
}
