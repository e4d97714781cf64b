//! Indexable item contract and the generic stored document.

use serde::{Deserialize, Serialize};

/// Item type tag stored with every row.
pub type ItemType = i64;

/// Filter value meaning "any type". Never stored on a row.
pub const ITEM_TYPE_IGNORE: ItemType = -1;

/// Type assigned to documents created without an explicit type.
pub const DEFAULT_ITEM_TYPE: ItemType = 0;

/// Opaque key/value payload stored alongside a row. Not searchable.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Capability contract for values that can be written to an index.
///
/// The indexer calls `will_index` right before the row is written and
/// `did_index` only once the write has committed. Both run on the indexer's
/// lane thread without the store lock held, so a hook may read through handles
/// sharing the store. A hook must not wait on a completion of the same
/// indexer: that completion is queued behind the running job.
pub trait IndexItem: Send + 'static {
    /// Identifier of the row, if one has been assigned.
    fn index_item_identifier(&self) -> Option<&str>;

    /// Store the identifier generated by the indexer for an unassigned item.
    fn set_index_item_identifier(&mut self, identifier: String);

    /// The searchable text.
    fn index_text_contents(&self) -> &str;

    fn index_item_type(&self) -> ItemType {
        DEFAULT_ITEM_TYPE
    }

    fn index_meta(&self) -> Option<&Meta> {
        None
    }

    /// Evaluated only while indexing.
    fn can_index(&self) -> bool {
        true
    }

    fn will_index(&mut self) {}

    fn did_index(&mut self) {}
}

/// Generic row representation, returned by searches when no item factory is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub identifier: Option<String>,
    pub text_contents: String,
    pub item_type: ItemType,
    pub meta: Option<Meta>,
}

impl IndexDocument {
    pub fn new(text_contents: impl Into<String>) -> Self {
        Self {
            identifier: None,
            text_contents: text_contents.into(),
            item_type: DEFAULT_ITEM_TYPE,
            meta: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_item_type(mut self, item_type: ItemType) -> Self {
        self.item_type = item_type;
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Look up a single metadata value.
    pub fn meta_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.as_ref().and_then(|m| m.get(key))
    }

    /// Snapshot any indexable item into a plain document.
    pub fn from_item<I: IndexItem + ?Sized>(item: &I) -> Self {
        Self {
            identifier: item.index_item_identifier().map(str::to_owned),
            text_contents: item.index_text_contents().to_owned(),
            item_type: item.index_item_type(),
            meta: item.index_meta().cloned(),
        }
    }
}

impl IndexItem for IndexDocument {
    fn index_item_identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    fn set_index_item_identifier(&mut self, identifier: String) {
        self.identifier = Some(identifier);
    }

    fn index_text_contents(&self) -> &str {
        &self.text_contents
    }

    fn index_item_type(&self) -> ItemType {
        self.item_type
    }

    fn index_meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    fn can_index(&self) -> bool {
        !self.text_contents.trim().is_empty()
    }
}

/// Mint a fresh identifier for an item that has none.
pub fn generate_identifier() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
