// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conflict Merge Strategies
//!
//! When both devices modified the same item, the transfer engine resolves
//! the conflict through a pluggable strategy rather than a hardwired rule.

use crate::catalog::SyncableItem;

/// Resolves an item both sides modified into a single merged item.
pub trait MergeStrategy: Send + Sync {
    /// Merges the local and remote versions of one item.
    fn merge(&self, local: &SyncableItem, remote: &SyncableItem) -> SyncableItem;
}

/// Default strategy: the newer content wins, user reading state is
/// merged field-wise so neither side loses progress or bookmarks.
pub struct NewerWins;

impl MergeStrategy for NewerWins {
    fn merge(&self, local: &SyncableItem, remote: &SyncableItem) -> SyncableItem {
        let mut merged = if remote.updated_at > local.updated_at {
            remote.clone()
        } else {
            local.clone()
        };
        merged.state = local.state.merged_with(&remote.state);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ItemKind, ReadingState};

    fn item(title: &str, updated_at: u64, state: ReadingState) -> SyncableItem {
        let mut item = SyncableItem::new("book-1", ItemKind::Book, title, updated_at);
        item.state = state;
        item
    }

    #[test]
    fn test_newer_content_wins() {
        let local = item("Old Title", 100, ReadingState::default());
        let remote = item("New Title", 200, ReadingState::default());

        let merged = NewerWins.merge(&local, &remote);
        assert_eq!(merged.title, "New Title");
        assert_eq!(merged.updated_at, 200);
    }

    #[test]
    fn test_ties_keep_local() {
        let local = item("Local", 100, ReadingState::default());
        let remote = item("Remote", 100, ReadingState::default());
        assert_eq!(NewerWins.merge(&local, &remote).title, "Local");
    }

    #[test]
    fn test_reading_state_merged_regardless_of_winner() {
        let local = item(
            "Old",
            100,
            ReadingState {
                read: true,
                bookmarked: false,
                progress_percent: 80,
            },
        );
        let remote = item(
            "New",
            200,
            ReadingState {
                read: false,
                bookmarked: true,
                progress_percent: 30,
            },
        );

        let merged = NewerWins.merge(&local, &remote);
        assert_eq!(merged.title, "New");
        assert!(merged.state.read);
        assert!(merged.state.bookmarked);
        assert_eq!(merged.state.progress_percent, 80);
    }
}
