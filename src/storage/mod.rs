pub mod sqlite;

pub use sqlite::{DEFAULT_INDEX_NAME, DatabaseLocation, EngineGeneration, IndexStore, TableInfo};
