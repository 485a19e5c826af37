// SPDX-License-Identifier: Apache-2.0

//! Interception Engine
//!
//! Orchestrates one intercepted mutation:
//! 1. Bypass checks (flag, predicate, exempt proposer, gated operations)
//! 2. Proposer resolution and validation of the proposed state
//! 3. Payload building, merge into an existing draft, supersession
//! 4. Commit of the enclosing transaction so the proposal survives a rollback

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use bouncer_core::{
    BouncerError, BouncerResult, FieldMap, Operation, Proposal, ProposalId, ProposalKind,
    ProposalPayload, ProposalStore, RecordKey, RecordStore, UnitOfWork, UserId,
};

use super::bypass::{BypassPolicy, BypassVerdict};
use super::types::{BouncerConfig, Entity, InterceptContext, InterceptOutcome};
use crate::metrics;

/// Intercepts mutations of one guarded collection
pub struct InterceptionEngine {
    config: BouncerConfig,
    policy: BypassPolicy,
    proposals: Arc<dyn ProposalStore>,
    unit_of_work: Arc<dyn UnitOfWork>,
}

impl InterceptionEngine {
    pub fn new(
        config: BouncerConfig,
        proposals: Arc<dyn ProposalStore>,
        unit_of_work: Arc<dyn UnitOfWork>,
    ) -> Self {
        let policy = BypassPolicy::from_config(&config);
        Self {
            config,
            policy,
            proposals,
            unit_of_work,
        }
    }

    /// Attaches a custom bypass predicate, consulted before the exempt list
    pub fn with_bypass_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Entity, &InterceptContext, &dyn RecordStore) -> BypassVerdict
            + Send
            + Sync
            + 'static,
    {
        self.policy = self.policy.with_predicate(predicate);
        self
    }

    pub fn config(&self) -> &BouncerConfig {
        &self.config
    }

    pub fn proposals(&self) -> &Arc<dyn ProposalStore> {
        &self.proposals
    }

    /// Decides what happens to a mutation before it reaches the store
    ///
    /// On [`InterceptOutcome::Proceed`] the caller performs the write itself;
    /// any other outcome means the write must be suppressed.
    #[instrument(skip_all, fields(collection = store.collection_name(), %operation))]
    pub async fn intercept(
        &self,
        operation: Operation,
        entity: &Entity,
        store: &dyn RecordStore,
        context: &InterceptContext,
    ) -> BouncerResult<InterceptOutcome> {
        // A missing key is only an error once the bypass checks are done.
        let stored = match entity.key.as_ref() {
            Some(key) if !context.bypass && operation != Operation::Create => {
                store.get(key).await?
            }
            _ => None,
        };

        let proposer = self.resolve_proposer(operation, entity, stored.as_ref(), context);

        if let Some(reason) =
            self.policy
                .check(operation, entity, context, store, proposer.as_ref())
        {
            metrics::record_bypassed();
            return Ok(InterceptOutcome::Proceed(reason));
        }

        if operation != Operation::Create {
            require_key(operation, entity, store)?;
        }
        let proposer =
            proposer.ok_or_else(|| BouncerError::missing_proposer(store.collection_name()))?;
        let transaction = self.caller_transaction(context).await?;

        match operation {
            Operation::Create => {
                if self.config.validate_on_propose {
                    validate(store, &entity.fields, true)?;
                }
                self.propose(
                    store,
                    None,
                    proposer,
                    ProposalPayload::Fields(entity.fields.clone()),
                    None,
                    context,
                    transaction,
                )
                .await
            }
            Operation::Update => {
                let key = require_key(operation, entity, store)?;
                let stored = stored.ok_or_else(|| missing_record(store, key))?;

                if self.config.validate_on_propose {
                    let mut merged = stored.clone();
                    merged.extend(entity.fields.clone());
                    validate(store, &merged, false)?;
                }

                let mut changes = self.changed_fields(&stored, &entity.fields, store);
                if changes.is_empty() {
                    if self.config.discard_noop_edits {
                        return self.withdraw(store, key, transaction).await;
                    }
                    changes = self.carried_fields(&entity.fields, store);
                }

                self.propose(
                    store,
                    Some(key.clone()),
                    proposer,
                    ProposalPayload::Fields(changes),
                    Some(stored),
                    context,
                    transaction,
                )
                .await
            }
            Operation::Delete => {
                let key = require_key(operation, entity, store)?;
                let stored = stored.ok_or_else(|| missing_record(store, key))?;

                self.propose(
                    store,
                    Some(key.clone()),
                    proposer,
                    ProposalPayload::Delete,
                    Some(stored),
                    context,
                    transaction,
                )
                .await
            }
        }
    }

    /// Context override first, then the proposer field of the record
    fn resolve_proposer(
        &self,
        operation: Operation,
        entity: &Entity,
        stored: Option<&FieldMap>,
        context: &InterceptContext,
    ) -> Option<UserId> {
        if let Some(ref proposer) = context.proposer {
            return Some(proposer.clone());
        }

        let field = self.config.proposer_field.as_str();
        let from_stored = || stored.and_then(|s| s.get(field));
        let value = match operation {
            Operation::Create => entity.get(field),
            // Merged state: a proposed value overrides the stored one.
            Operation::Update => entity.get(field).or_else(from_stored),
            Operation::Delete => from_stored().or_else(|| entity.get(field)),
        };
        value.and_then(UserId::from_value)
    }

    /// Fields of `proposed` whose value differs from the stored record
    fn changed_fields(
        &self,
        stored: &FieldMap,
        proposed: &FieldMap,
        store: &dyn RecordStore,
    ) -> FieldMap {
        proposed
            .iter()
            .filter(|(name, _)| self.is_carried(name, store))
            .filter(|(name, value)| stored.get(name.as_str()) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn carried_fields(&self, proposed: &FieldMap, store: &dyn RecordStore) -> FieldMap {
        proposed
            .iter()
            .filter(|(name, _)| self.is_carried(name, store))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn is_carried(&self, field: &str, store: &dyn RecordStore) -> bool {
        field != store.identifier_field() && !self.config.is_ignored(field)
    }

    /// Writes or refreshes the proposer's draft and supersedes competitors
    async fn propose(
        &self,
        store: &dyn RecordStore,
        primary_key: Option<RecordKey>,
        proposer: UserId,
        payload: ProposalPayload,
        original_payload: Option<FieldMap>,
        context: &InterceptContext,
        transaction: Option<&dyn UnitOfWork>,
    ) -> BouncerResult<InterceptOutcome> {
        let source = store.collection_name();
        let kind = match (&payload, &primary_key) {
            (ProposalPayload::Delete, _) => ProposalKind::Delete,
            (_, None) => ProposalKind::Create,
            (_, Some(_)) => ProposalKind::Edit,
        };

        let existing = self
            .proposals
            .find_pending_for_key(source, primary_key.as_ref(), Some(&proposer))
            .await?
            .into_iter()
            .find(|p| p.kind() == kind);

        let proposal = match existing {
            Some(mut draft) => {
                draft.payload = payload;
                draft.original_payload = original_payload;
                if context.reason.is_some() {
                    draft.reason = context.reason.clone();
                }
                draft.updated_at = Utc::now();
                self.proposals.save_pending(&draft).await?;
                debug!(proposal_id = %draft.id, "Refreshed pending draft");
                draft
            }
            None => {
                let mut proposal = Proposal::pending(
                    source,
                    primary_key.clone(),
                    proposer,
                    payload,
                    original_payload,
                );
                proposal.reason = context.reason.clone();
                self.proposals.insert(&proposal).await?;
                proposal
            }
        };

        let superseded = if self.config.auto_supersede {
            self.proposals
                .supersede_others(source, primary_key.as_ref(), proposal.id)
                .await?
        } else {
            0
        };

        splice_transaction(transaction).await?;
        metrics::record_intercepted(superseded);

        info!(
            proposal_id = %proposal.id,
            source,
            kind = ?kind,
            proposer = %proposal.proposer_id,
            superseded,
            reason = context.reason.as_deref().unwrap_or(""),
            "Change captured for review"
        );

        Ok(InterceptOutcome::Bounced {
            proposal,
            superseded,
        })
    }

    /// Supersedes every pending proposal for the record without writing one
    async fn withdraw(
        &self,
        store: &dyn RecordStore,
        key: &RecordKey,
        transaction: Option<&dyn UnitOfWork>,
    ) -> BouncerResult<InterceptOutcome> {
        // A fresh id never matches, so nothing is excluded.
        let superseded = self
            .proposals
            .supersede_others(store.collection_name(), Some(key), ProposalId::new())
            .await?;

        splice_transaction(transaction).await?;
        metrics::record_withdrawn(superseded);
        info!(source = store.collection_name(), %key, superseded, "No-op edit withdrew pending drafts");

        Ok(InterceptOutcome::Withdrawn { superseded })
    }

    /// The caller's open transaction, if it declared one
    ///
    /// A transaction open on the shared unit of work that the caller did not
    /// hand in is refused.
    async fn caller_transaction<'a>(
        &self,
        context: &'a InterceptContext,
    ) -> BouncerResult<Option<&'a dyn UnitOfWork>> {
        match context.transaction.as_deref() {
            Some(tx) => Ok(tx.in_progress().await.then_some(tx)),
            None if self.unit_of_work.in_progress().await => {
                Err(BouncerError::transaction_error(
                    "A transaction not owned by this call is open; \
                     pass it with InterceptContext::in_transaction",
                ))
            }
            None => Ok(None),
        }
    }
}

/// Commits the caller's transaction so the proposal outlives its rollback,
/// then reopens one for the caller to finish.
async fn splice_transaction(transaction: Option<&dyn UnitOfWork>) -> BouncerResult<()> {
    let Some(tx) = transaction else {
        return Ok(());
    };
    tx.commit().await?;
    tx.begin().await?;
    debug!("Committed proposal ahead of the enclosing transaction");
    Ok(())
}

fn require_key<'a>(
    operation: Operation,
    entity: &'a Entity,
    store: &dyn RecordStore,
) -> BouncerResult<&'a RecordKey> {
    entity.key.as_ref().ok_or_else(|| {
        BouncerError::invalid_field(
            store.identifier_field(),
            format!("a record key is required to {}", operation),
        )
    })
}

fn missing_record(store: &dyn RecordStore, key: &RecordKey) -> BouncerError {
    BouncerError::not_found(format!(
        "{} record {} not found",
        store.collection_name(),
        key
    ))
}

fn validate(store: &dyn RecordStore, fields: &FieldMap, is_new: bool) -> BouncerResult<()> {
    let errors = store.validate(fields, is_new);
    if errors.is_empty() {
        Ok(())
    } else {
        debug!(collection = store.collection_name(), fields = errors.len(), "Proposal failed validation");
        Err(BouncerError::validation(errors))
    }
}
