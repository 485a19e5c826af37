//! Store trait definitions
//!
//! The core never depends on a specific storage engine. Target collections
//! implement [`RecordStore`], proposal persistence implements
//! [`ProposalStore`], and the enclosing transaction is driven through
//! [`UnitOfWork`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BouncerResult;
use crate::proposal::{Proposal, ProposalFilter, ProposalId};
use crate::types::{FieldErrors, FieldMap, Record, RecordKey, UserId};

/// Validation hook a record store may be configured with
pub type ValidateFn = Arc<dyn Fn(&FieldMap, bool) -> FieldErrors + Send + Sync>;

/// A target collection whose mutations can be intercepted
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Name of the collection (table name, collection name, ...)
    fn collection_name(&self) -> &str;

    /// Field holding the record identifier
    fn identifier_field(&self) -> &str;

    /// Loads the full current state of a record
    async fn get(&self, key: &RecordKey) -> BouncerResult<Option<FieldMap>>;

    /// Inserts a new record and returns it with its assigned key
    async fn create(&self, fields: &FieldMap) -> BouncerResult<Record>;

    /// Merges `fields` onto an existing record and returns the new state
    ///
    /// Fails with `NotFound` when the record does not exist.
    async fn patch(&self, key: &RecordKey, fields: &FieldMap) -> BouncerResult<FieldMap>;

    /// Deletes a record. Returns false when nothing was deleted.
    async fn delete(&self, key: &RecordKey) -> BouncerResult<bool>;

    /// Runs the collection's own validation rules
    fn validate(&self, _fields: &FieldMap, _is_new: bool) -> FieldErrors {
        FieldErrors::new()
    }
}

/// Persistence for proposals
#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn insert(&self, proposal: &Proposal) -> BouncerResult<()>;

    /// Overwrites a stored proposal. Fails with `NotFound` when absent.
    async fn save(&self, proposal: &Proposal) -> BouncerResult<()>;

    /// Overwrites a proposal only while the stored copy is still pending.
    ///
    /// Fails with `Conflict` when it was finalized or superseded in the
    /// meantime and with `NotFound` when absent.
    async fn save_pending(&self, proposal: &Proposal) -> BouncerResult<()>;

    async fn get(&self, id: ProposalId) -> BouncerResult<Proposal>;

    /// Proposals matching the filter, newest first
    async fn find(&self, filter: &ProposalFilter) -> BouncerResult<Vec<Proposal>>;

    /// Pending proposals for a `(source, primary_key)` pair, newest first
    ///
    /// `primary_key == None` matches new-record proposals.
    async fn find_pending_for_key(
        &self,
        source: &str,
        primary_key: Option<&RecordKey>,
        proposer_id: Option<&UserId>,
    ) -> BouncerResult<Vec<Proposal>>;

    /// All pending proposals, newest first
    async fn find_all_pending(&self) -> BouncerResult<Vec<Proposal>> {
        self.find(&ProposalFilter::pending()).await
    }

    /// Marks every other pending proposal for the pair as superseded
    ///
    /// Returns the number of proposals affected.
    async fn supersede_others(
        &self,
        source: &str,
        primary_key: Option<&RecordKey>,
        exclude: ProposalId,
    ) -> BouncerResult<u64>;

    /// Distinct source names, ascending
    async fn sources(&self) -> BouncerResult<Vec<String>>;
}

/// Transaction control over the storage shared by proposals and records
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> BouncerResult<()>;

    async fn commit(&self) -> BouncerResult<()>;

    async fn rollback(&self) -> BouncerResult<()>;

    /// Whether a transaction is currently open
    async fn in_progress(&self) -> bool;
}
