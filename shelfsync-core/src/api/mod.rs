// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Public API Module
//!
//! [`SyncEngine`] is the single entry point platform frontends talk to:
//! discovery control, pairing, sync orchestration, progress observation,
//! and history.

mod engine;

pub use engine::SyncEngine;
