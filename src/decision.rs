// SPDX-License-Identifier: Apache-2.0

//! Decision Engine
//!
//! Applies a reviewer's verdict to a pending proposal. Approval replays the
//! proposed change against the target collection with interception
//! bypassed, then marks the proposal approved, all inside one unit of work.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use bouncer_core::{
    BouncerError, BouncerResult, Proposal, ProposalId, ProposalPayload, ProposalStatus,
    ProposalStore, Record, RecordKey, UnitOfWork, UserId,
};

use crate::interceptor::InterceptContext;
use crate::metrics;
use crate::registry::CollectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => f.write_str("approve"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// What replaying a proposal did to the target collection
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    Created(Record),
    Updated(Record),
    Deleted(RecordKey),
}

pub struct DecisionEngine {
    proposals: Arc<dyn ProposalStore>,
    unit_of_work: Arc<dyn UnitOfWork>,
    registry: Arc<CollectionRegistry>,
}

impl DecisionEngine {
    pub fn new(
        proposals: Arc<dyn ProposalStore>,
        unit_of_work: Arc<dyn UnitOfWork>,
        registry: Arc<CollectionRegistry>,
    ) -> Self {
        Self {
            proposals,
            unit_of_work,
            registry,
        }
    }

    /// Finalizes a pending proposal in a transaction of its own
    ///
    /// Deciding a proposal that is no longer pending is a `Conflict`. A
    /// failed replay leaves the proposal pending.
    pub async fn decide(
        &self,
        id: ProposalId,
        decision: Decision,
        reviewer: &UserId,
        reason: Option<String>,
    ) -> BouncerResult<Proposal> {
        self.decide_within(id, decision, reviewer, reason, None).await
    }

    /// Finalizes a pending proposal, joining `transaction` when it is open
    ///
    /// Without a caller transaction the engine begins one on the shared unit
    /// of work; that fails while someone else holds it open. On error the
    /// engine rolls back only a transaction it began itself.
    #[instrument(skip(self, reason, transaction), fields(%id, %decision, %reviewer))]
    pub async fn decide_within(
        &self,
        id: ProposalId,
        decision: Decision,
        reviewer: &UserId,
        reason: Option<String>,
        transaction: Option<&dyn UnitOfWork>,
    ) -> BouncerResult<Proposal> {
        let (unit_of_work, owns_transaction): (&dyn UnitOfWork, bool) =
            match transaction {
                Some(tx) if tx.in_progress().await => (tx, false),
                Some(tx) => (tx, true),
                None => (self.unit_of_work.as_ref(), true),
            };
        if owns_transaction {
            unit_of_work.begin().await?;
        }

        let result = self.apply(id, decision, reviewer, reason).await;

        match result {
            Ok(decided) => {
                if owns_transaction {
                    unit_of_work.commit().await?;
                }
                match decision {
                    Decision::Approve => metrics::record_approved(),
                    Decision::Reject => metrics::record_rejected(),
                }
                info!(source = %decided.source, status = %decided.status, "Proposal decided");
                Ok(decided)
            }
            Err(e) => {
                metrics::record_failed_decision();
                if owns_transaction {
                    if let Err(rollback_err) = unit_of_work.rollback().await {
                        warn!("Rollback after failed decision failed: {}", rollback_err);
                    }
                }
                warn!("Decision failed, proposal left pending: {}", e);
                Err(e)
            }
        }
    }

    pub async fn approve_by_id(
        &self,
        id: ProposalId,
        reviewer: &UserId,
        reason: Option<String>,
    ) -> BouncerResult<Proposal> {
        self.decide(id, Decision::Approve, reviewer, reason).await
    }

    pub async fn reject_by_id(
        &self,
        id: ProposalId,
        reviewer: &UserId,
        reason: Option<String>,
    ) -> BouncerResult<Proposal> {
        self.decide(id, Decision::Reject, reviewer, reason).await
    }

    async fn apply(
        &self,
        id: ProposalId,
        decision: Decision,
        reviewer: &UserId,
        reason: Option<String>,
    ) -> BouncerResult<Proposal> {
        let proposal = self.proposals.get(id).await?;
        if !proposal.is_pending() {
            return Err(BouncerError::conflict(format!(
                "Proposal {} is already {}",
                id, proposal.status
            )));
        }

        let status = match decision {
            Decision::Approve => {
                self.replay(&proposal).await?;
                ProposalStatus::Approved
            }
            Decision::Reject => ProposalStatus::Rejected,
        };

        // A concurrent reviewer may have finalized it since the read above.
        let decided = finalize(proposal, status, reviewer, reason);
        self.proposals.save_pending(&decided).await?;
        Ok(decided)
    }

    /// Materializes a proposal against its target collection
    ///
    /// Every write carries the explicit bypass flag so it is never
    /// intercepted again.
    pub async fn replay(&self, proposal: &Proposal) -> BouncerResult<ReplayOutcome> {
        let collection = self.registry.get(&proposal.source)?;
        let context = InterceptContext::bypassed();

        match (&proposal.primary_key, &proposal.payload) {
            (Some(key), ProposalPayload::Delete) => {
                collection.delete(key.clone(), &context).await?;
                Ok(ReplayOutcome::Deleted(key.clone()))
            }
            (None, ProposalPayload::Delete) => Err(BouncerError::internal(format!(
                "Delete proposal {} has no primary key",
                proposal.id
            ))),
            (None, ProposalPayload::Fields(fields)) => {
                let result = collection.create(fields.clone(), &context).await?;
                result.record.map(ReplayOutcome::Created).ok_or_else(|| {
                    BouncerError::internal("Bypassed create returned no record")
                })
            }
            (Some(key), ProposalPayload::Fields(fields)) => {
                if collection.get(key).await?.is_none() {
                    return Err(BouncerError::not_found(format!(
                        "{} record {} no longer exists",
                        proposal.source, key
                    )));
                }
                let result = collection
                    .update(key.clone(), fields.clone(), &context)
                    .await?;
                result.record.map(ReplayOutcome::Updated).ok_or_else(|| {
                    BouncerError::internal("Bypassed update returned no record")
                })
            }
        }
    }
}

fn finalize(
    mut proposal: Proposal,
    status: ProposalStatus,
    reviewer: &UserId,
    reason: Option<String>,
) -> Proposal {
    let now = Utc::now();
    proposal.status = status;
    proposal.reviewer_id = Some(reviewer.clone());
    proposal.reviewed_at = Some(now);
    proposal.updated_at = now;
    if reason.is_some() {
        proposal.reason = reason;
    }
    proposal
}
