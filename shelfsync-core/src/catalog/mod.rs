// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Local Catalog Source
//!
//! The engine's view of the local library. Items are opaque versioned
//! blobs with a stable id and a last-modified timestamp; the engine never
//! interprets payloads beyond the reading-state fields it merges.
//!
//! The catalog is read concurrently by multiple sessions; implementations
//! must tolerate concurrent reads and serialize writes per item id.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

/// What kind of library object an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Book,
    Chapter,
    History,
}

/// Scalar user-state fields that are merged rather than overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingState {
    /// Whether the item has been read.
    pub read: bool,
    /// Whether the item is bookmarked.
    pub bookmarked: bool,
    /// Reading progress in percent (0-100).
    pub progress_percent: u8,
}

impl ReadingState {
    /// Merges two reading states: boolean flags by logical OR, progress
    /// by most-advanced-wins.
    pub fn merged_with(&self, other: &ReadingState) -> ReadingState {
        ReadingState {
            read: self.read || other.read,
            bookmarked: self.bookmarked || other.bookmarked,
            progress_percent: self.progress_percent.max(other.progress_percent),
        }
    }
}

/// A syncable library item: a book, chapter, or reading-history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncableItem {
    /// Stable, globally unique id.
    pub id: String,
    /// Kind of library object.
    pub kind: ItemKind,
    /// Display title.
    pub title: String,
    /// Unix timestamp (milliseconds) of the last content modification.
    pub updated_at: u64,
    /// User-state fields merged on conflict.
    pub state: ReadingState,
    /// Opaque content-bearing metadata.
    pub payload: serde_json::Value,
    /// Nested child items (e.g. chapters of a book).
    pub children: Vec<SyncableItem>,
}

impl SyncableItem {
    /// Creates an item with empty payload and no children.
    pub fn new(id: impl Into<String>, kind: ItemKind, title: impl Into<String>, updated_at: u64) -> Self {
        SyncableItem {
            id: id.into(),
            kind,
            title: title.into(),
            updated_at,
            state: ReadingState::default(),
            payload: serde_json::Value::Null,
            children: Vec::new(),
        }
    }

    /// Returns the manifest entry for this item.
    pub fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            item_id: self.id.clone(),
            last_modified: self.updated_at,
        }
    }
}

/// One entry of a device's library manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Stable item id.
    pub item_id: String,
    /// Unix timestamp (milliseconds) of the last modification.
    pub last_modified: u64,
}

/// The local library, as seen by the sync engine.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Returns all syncable items.
    async fn list_items(&self) -> SyncResult<Vec<SyncableItem>>;

    /// Returns the manifest, sorted by item id.
    async fn manifest(&self) -> SyncResult<Vec<ManifestEntry>>;

    /// Returns a single item by id, if present.
    async fn get_item(&self, item_id: &str) -> SyncResult<Option<SyncableItem>>;

    /// Inserts or replaces an item.
    async fn apply_item(&self, item: SyncableItem) -> SyncResult<()>;

    /// Applies merged reading-state fields to an existing item without
    /// touching its content. A missing item is ignored; the engine only
    /// merges state for items it has already applied or found locally.
    async fn apply_merged_state(&self, item_id: &str, state: ReadingState) -> SyncResult<()>;
}

/// In-memory catalog backed by a sorted map.
///
/// Writes are serialized through a single lock, which also covers the
/// hypothetical case of two sessions touching the same item id.
#[derive(Default)]
pub struct MemoryCatalog {
    items: Mutex<BTreeMap<String, SyncableItem>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog pre-populated with the given items.
    pub fn with_items(items: Vec<SyncableItem>) -> Self {
        let catalog = Self::new();
        {
            let mut map = catalog.items.lock().expect("catalog lock poisoned");
            for item in items {
                map.insert(item.id.clone(), item);
            }
        }
        catalog
    }

    /// Returns the number of items in the catalog.
    pub fn len(&self) -> usize {
        self.items.lock().expect("catalog lock poisoned").len()
    }

    /// Returns true if the catalog holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn list_items(&self) -> SyncResult<Vec<SyncableItem>> {
        let map = self.items.lock().expect("catalog lock poisoned");
        Ok(map.values().cloned().collect())
    }

    async fn manifest(&self) -> SyncResult<Vec<ManifestEntry>> {
        let map = self.items.lock().expect("catalog lock poisoned");
        // BTreeMap iteration is already id-ordered
        Ok(map.values().map(SyncableItem::manifest_entry).collect())
    }

    async fn get_item(&self, item_id: &str) -> SyncResult<Option<SyncableItem>> {
        let map = self.items.lock().expect("catalog lock poisoned");
        Ok(map.get(item_id).cloned())
    }

    async fn apply_item(&self, item: SyncableItem) -> SyncResult<()> {
        let mut map = self.items.lock().expect("catalog lock poisoned");
        map.insert(item.id.clone(), item);
        Ok(())
    }

    async fn apply_merged_state(&self, item_id: &str, state: ReadingState) -> SyncResult<()> {
        let mut map = self.items.lock().expect("catalog lock poisoned");
        if let Some(item) = map.get_mut(item_id) {
            item.state = state;
        } else {
            tracing::warn!(item_id, "merged state for unknown item ignored");
        }
        Ok(())
    }
}
