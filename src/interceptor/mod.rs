//! Mutation Interceptor
//!
//! Turns create, update and delete calls on guarded collections into
//! proposals awaiting review:
//! - **Bypass policy**: flag, predicate, exempt proposers, gated operations
//! - **Engine**: payload building, draft merging, supersession
//! - **Guarded collections**: the store wrapper callers write through

pub mod bypass;
pub mod collection;
pub mod pipeline;
pub mod types;

pub use bypass::{BypassPolicy, BypassPredicate, BypassVerdict};
pub use collection::{DraftedRecord, GuardedCollection};
pub use pipeline::InterceptionEngine;
pub use types::*;
