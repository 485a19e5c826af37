// SPDX-License-Identifier: Apache-2.0

//! Guarded Collection
//!
//! Wraps a [`RecordStore`] so every create, update and delete first passes
//! through the interception engine. Writes only reach the store when the
//! engine answers [`InterceptOutcome::Proceed`].

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use bouncer_core::{
    BouncerError, BouncerResult, FieldMap, Operation, Proposal, Record, RecordKey, RecordStore,
    UserId,
};

use super::pipeline::InterceptionEngine;
use super::types::{Entity, InterceptContext, InterceptOutcome, MutationResult};

/// A record overlaid with a proposer's pending edit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftedRecord {
    pub key: RecordKey,
    pub fields: FieldMap,
    /// The draft that was found, if any
    pub draft: Option<Proposal>,
    /// Whether the draft's fields were merged into `fields`
    pub draft_applied: bool,
}

pub struct GuardedCollection {
    store: Arc<dyn RecordStore>,
    engine: Arc<InterceptionEngine>,
}

impl GuardedCollection {
    pub fn new(store: Arc<dyn RecordStore>, engine: Arc<InterceptionEngine>) -> Self {
        Self { store, engine }
    }

    pub fn name(&self) -> &str {
        self.store.collection_name()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<InterceptionEngine> {
        &self.engine
    }

    /// Current stored state of a record; drafts are not applied.
    pub async fn get(&self, key: &RecordKey) -> BouncerResult<Option<FieldMap>> {
        self.store.get(key).await
    }

    #[instrument(skip_all, fields(collection = self.name()))]
    pub async fn create(
        &self,
        fields: FieldMap,
        context: &InterceptContext,
    ) -> BouncerResult<MutationResult> {
        let entity = Entity::new(fields);
        let outcome = self
            .engine
            .intercept(Operation::Create, &entity, self.store.as_ref(), context)
            .await?;

        let record = match outcome {
            InterceptOutcome::Proceed(_) => Some(self.store.create(&entity.fields).await?),
            _ => None,
        };
        Ok(MutationResult { outcome, record })
    }

    #[instrument(skip_all, fields(collection = self.name(), %key))]
    pub async fn update(
        &self,
        key: RecordKey,
        fields: FieldMap,
        context: &InterceptContext,
    ) -> BouncerResult<MutationResult> {
        let entity = Entity::existing(key, fields);
        let outcome = self
            .engine
            .intercept(Operation::Update, &entity, self.store.as_ref(), context)
            .await?;

        let record = match (&outcome, entity.key) {
            (InterceptOutcome::Proceed(_), Some(key)) => {
                let fields = self.store.patch(&key, &entity.fields).await?;
                Some(Record { key, fields })
            }
            _ => None,
        };
        Ok(MutationResult { outcome, record })
    }

    #[instrument(skip_all, fields(collection = self.name(), %key))]
    pub async fn delete(
        &self,
        key: RecordKey,
        context: &InterceptContext,
    ) -> BouncerResult<MutationResult> {
        let current = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| self.not_found(&key))?;

        let entity = Entity::existing(key, current);
        let outcome = self
            .engine
            .intercept(Operation::Delete, &entity, self.store.as_ref(), context)
            .await?;

        if let (InterceptOutcome::Proceed(_), Some(key)) = (&outcome, entity.key.as_ref()) {
            if !self.store.delete(key).await? {
                return Err(self.not_found(key));
            }
        }
        Ok(MutationResult {
            outcome,
            record: None,
        })
    }

    /// Newest pending proposal for the record from `proposer`
    pub async fn load_draft(
        &self,
        key: &RecordKey,
        proposer: &UserId,
    ) -> BouncerResult<Option<Proposal>> {
        Ok(self
            .engine
            .proposals()
            .find_pending_for_key(self.name(), Some(key), Some(proposer))
            .await?
            .into_iter()
            .next())
    }

    pub async fn has_pending_draft(&self, key: &RecordKey, proposer: &UserId) -> BouncerResult<bool> {
        Ok(self.load_draft(key, proposer).await?.is_some())
    }

    /// Stored record with the proposer's pending edit applied on top.
    ///
    /// A pending delete is returned as the draft but not applied.
    pub async fn with_draft(
        &self,
        key: &RecordKey,
        proposer: &UserId,
    ) -> BouncerResult<DraftedRecord> {
        let mut fields = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| self.not_found(key))?;

        let draft = self.load_draft(key, proposer).await?;
        let draft_applied = match draft.as_ref().and_then(|d| d.payload.fields()) {
            Some(changes) => {
                fields.extend(changes.clone());
                true
            }
            None => false,
        };

        Ok(DraftedRecord {
            key: key.clone(),
            fields,
            draft,
            draft_applied,
        })
    }

    fn not_found(&self, key: &RecordKey) -> BouncerError {
        BouncerError::not_found(format!("{} record {} not found", self.name(), key))
    }
}
