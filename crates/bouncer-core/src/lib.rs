// SPDX-License-Identifier: Apache-2.0

//! Bouncer core
//!
//! Proposal model, store traits and error handling shared by the
//! interception engine and the storage backends.

pub mod error;
pub mod proposal;
pub mod traits;
pub mod types;

pub use error::{BouncerError, BouncerResult};
pub use proposal::{
    Proposal, ProposalFilter, ProposalId, ProposalKind, ProposalPayload, ProposalStatus,
    DELETE_SENTINEL,
};
pub use traits::{ProposalStore, RecordStore, UnitOfWork, ValidateFn};
pub use types::*;
