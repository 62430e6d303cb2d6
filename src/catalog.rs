use std::collections::{HashMap, HashSet};

use crate::normalize::{normalize_item, IntoTransferable};
use crate::types::TransferableItem;

/// Resolves item ids to display records. Consulted only while validating
/// transfers and when the engine needs to rehydrate an id.
pub trait ItemCatalog {
    fn get_item_by_id(&self, id: &str) -> Option<TransferableItem>;
    fn is_item_used(&self, id: &str) -> bool;
}

/// HashMap-backed catalog for embedding and tests.
#[derive(Default, Debug, Clone)]
pub struct MemoryCatalog {
    items: HashMap<String, TransferableItem>,
    used: HashSet<String>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        MemoryCatalog::default()
    }

    /// Build from any normalizable records; records without ids are skipped.
    pub fn from_records<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoTransferable,
    {
        let mut catalog = MemoryCatalog::new();
        for record in records {
            catalog.insert(record);
        }
        catalog
    }

    /// Returns the normalized id when the record was accepted.
    pub fn insert(&mut self, record: impl IntoTransferable) -> Option<String> {
        let item = normalize_item(record)?;
        let id = item.id.clone();
        self.items.insert(id.clone(), item);
        Some(id)
    }

    pub fn mark_used(&mut self, id: &str, used: bool) {
        if used {
            self.used.insert(id.to_string());
        } else {
            self.used.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ItemCatalog for MemoryCatalog {
    fn get_item_by_id(&self, id: &str) -> Option<TransferableItem> {
        self.items.get(id).cloned()
    }

    fn is_item_used(&self, id: &str) -> bool {
        self.used.contains(id)
    }
}
