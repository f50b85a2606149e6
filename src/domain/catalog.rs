//! Catalog record types exchanged with the external document store

use serde::{Deserialize, Serialize};

/// A product document as read from the store. Only the fields the
/// automation flows touch are modeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub categories_ids: Vec<String>,
    #[serde(default)]
    pub subcategories_ids: Vec<String>,
    #[serde(default)]
    pub shelves: Vec<ShelfEntry>,
    #[serde(default)]
    pub shelves_ids: Vec<String>,
}

impl ProductRecord {
    #[must_use]
    pub fn has_any_category(&self, category_ids: &[String]) -> bool {
        self.categories_ids.iter().any(|c| category_ids.contains(c))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub id: String,
    pub name: String,
    pub category_id: String,
}

/// Shelf placement written alongside the category id arrays, in the shape
/// the store schema expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfEntry {
    pub id: String,
    pub product_category_id: String,
    pub product_subcategory_id: Option<String>,
    pub category_name: String,
    pub subcategory_name: Option<String>,
}

impl ShelfEntry {
    #[must_use]
    pub fn new(category: &Category, subcategory: Option<&Subcategory>) -> Self {
        let shelf_id = match subcategory {
            Some(sub) => format!("{}_{}", category.id, sub.id),
            None => category.id.clone(),
        };
        Self {
            id: shelf_id,
            product_category_id: category.id.clone(),
            product_subcategory_id: subcategory.map(|s| s.id.clone()),
            category_name: category.name.clone(),
            subcategory_name: subcategory.map(|s| s.name.clone()),
        }
    }
}

/// Proposed mutation of a product record, dispatched to the store unless
/// the run is a dry run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductUpdate {
    Rename {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    Categorize {
        categories_ids: Vec<String>,
        subcategories_ids: Vec<String>,
        shelves: Vec<ShelfEntry>,
        shelves_ids: Vec<String>,
    },
}

impl ProductUpdate {
    /// Build the categorization payload for an assignment decision.
    #[must_use]
    pub fn categorize(category: &Category, subcategory: Option<&Subcategory>) -> Self {
        let shelf = ShelfEntry::new(category, subcategory);
        ProductUpdate::Categorize {
            categories_ids: vec![category.id.clone()],
            subcategories_ids: subcategory.map(|s| vec![s.id.clone()]).unwrap_or_default(),
            shelves_ids: vec![shelf.id.clone()],
            shelves: vec![shelf],
        }
    }

    /// The categorization payload that restores a record's previous
    /// category fields, used by the undo store.
    #[must_use]
    pub fn restore_categories(record: &ProductRecord) -> Self {
        ProductUpdate::Categorize {
            categories_ids: record.categories_ids.clone(),
            subcategories_ids: record.subcategories_ids.clone(),
            shelves: record.shelves.clone(),
            shelves_ids: record.shelves_ids.clone(),
        }
    }

    /// Whether applying this update to the record would change it.
    #[must_use]
    pub fn differs_from(&self, record: &ProductRecord) -> bool {
        match self {
            ProductUpdate::Rename { name } => *name != record.name,
            ProductUpdate::Categorize {
                categories_ids,
                subcategories_ids,
                ..
            } => {
                *categories_ids != record.categories_ids
                    || *subcategories_ids != record.subcategories_ids
            }
        }
    }
}

/// The record a job is currently working on, surfaced in progress events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRecord {
    pub id: String,
    pub name: String,
    pub index: u64,
    pub total: u64,
}
