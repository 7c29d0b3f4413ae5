// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Item Transfer Module
//!
//! Executes sync plans: sends, receives, and merges items one at a time in
//! deterministic plan order, checkpointing after every finalized item so
//! an interrupted transfer resumes where it left off.

#[cfg(feature = "testing")]
pub mod engine;
#[cfg(not(feature = "testing"))]
mod engine;

#[cfg(feature = "testing")]
pub mod merge;
#[cfg(not(feature = "testing"))]
mod merge;

pub use engine::TransferEngine;
pub use merge::{MergeStrategy, NewerWins};
