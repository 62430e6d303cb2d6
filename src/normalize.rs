use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{RankedSlot, TransferableItem};

/// Item record as the catalog/search index hands it out.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Entry of a candidate pool. Pool entries carry their own id; `item_id`
/// points back at the catalog item when the two differ.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolItem {
    pub id: String,
    #[serde(default)]
    pub item_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// Conversion of a heterogeneous record into the canonical item shape.
/// Returns `None` when the record carries no usable id.
pub trait IntoTransferable {
    fn into_transferable(self) -> Option<TransferableItem>;
}

impl IntoTransferable for TransferableItem {
    fn into_transferable(self) -> Option<TransferableItem> {
        Some(self)
    }
}

impl IntoTransferable for &TransferableItem {
    fn into_transferable(self) -> Option<TransferableItem> {
        Some(self.clone())
    }
}

impl IntoTransferable for CatalogItem {
    fn into_transferable(self) -> Option<TransferableItem> {
        Some(TransferableItem {
            id: self.id,
            title: self.name,
            description: self.description,
            image_url: self.image_url,
            tags: if self.tags.is_empty() { None } else { Some(self.tags) },
            category: self.category,
            subcategory: self.subcategory,
            metadata: self.metadata,
        })
    }
}

impl IntoTransferable for PoolItem {
    fn into_transferable(self) -> Option<TransferableItem> {
        let id = self
            .item_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(self.id);
        Some(TransferableItem {
            id,
            title: self.title,
            description: self.description,
            image_url: self.image_url,
            tags: self.tags,
            category: self.category,
            subcategory: self.subcategory,
            metadata: None,
        })
    }
}

impl IntoTransferable for &RankedSlot {
    fn into_transferable(self) -> Option<TransferableItem> {
        match (&self.item, &self.item_id) {
            (Some(item), _) => Some(item.clone()),
            (None, Some(id)) => Some(TransferableItem::new(id.clone(), id.clone())),
            (None, None) => None,
        }
    }
}

impl IntoTransferable for &Value {
    fn into_transferable(self) -> Option<TransferableItem> {
        let obj = self.as_object()?;
        let id = pick_id(self, &["itemId", "item_id", "id"])?;
        let title = pick_str(self, &["title", "name", "label"]).unwrap_or_else(|| id.clone());
        let tags = match obj.get("tags") {
            Some(Value::Array(values)) => {
                let tags: Vec<String> = values
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Some(tags)
            }
            Some(Value::String(raw)) => Some(
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            _ => None,
        };
        Some(TransferableItem {
            id,
            title,
            description: pick_str(self, &["description", "summary"]),
            image_url: pick_str(self, &["image_url", "imageUrl", "image"]),
            tags,
            category: pick_str(self, &["category"]),
            subcategory: pick_str(self, &["subcategory", "subCategory"]),
            metadata: obj.get("metadata").cloned().filter(|v| !v.is_null()),
        })
    }
}

impl IntoTransferable for Value {
    fn into_transferable(self) -> Option<TransferableItem> {
        (&self).into_transferable()
    }
}

/// Normalize any supported record. Ids and titles are trimmed, an empty
/// title falls back to the id, and empty tag lists collapse to `None`.
pub fn normalize_item(record: impl IntoTransferable) -> Option<TransferableItem> {
    let mut item = record.into_transferable()?;
    let id = item.id.trim();
    if id.is_empty() {
        return None;
    }
    item.id = id.to_string();
    let title = item.title.trim();
    item.title = if title.is_empty() { item.id.clone() } else { title.to_string() };
    item.description = item.description.and_then(non_empty);
    item.image_url = item.image_url.and_then(non_empty);
    item.category = item.category.and_then(non_empty);
    item.subcategory = item.subcategory.and_then(non_empty);
    if item.tags.as_ref().is_some_and(|tags| tags.is_empty()) {
        item.tags = None;
    }
    Some(item)
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn pick_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn pick_id(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match value.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}
