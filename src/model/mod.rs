pub mod types;

pub use types::{
    DEFAULT_ITEM_TYPE, ITEM_TYPE_IGNORE, IndexDocument, IndexItem, ItemType, Meta,
    generate_identifier,
};
