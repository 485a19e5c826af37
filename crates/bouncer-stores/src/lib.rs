// SPDX-License-Identifier: Apache-2.0

//! Storage backends for Bouncer
//!
//! - [`memory`]: process-local, snapshot transactions; used by tests and
//!   embedders without a database.
//! - [`sqlite`]: sqlx-backed proposal table plus a generic table adapter.

pub mod memory;
pub mod sqlite;

pub use memory::{require_fields, MemoryDatabase, MemoryProposalStore, MemoryRecordStore};
pub use sqlite::{SqliteDatabase, SqliteProposalStore, SqliteRecordStore, PROPOSALS_TABLE};
