// SPDX-License-Identifier: Apache-2.0

//! In-memory backend
//!
//! A process-local database holding both proposals and target collections.
//! Transactions are snapshot based: `begin` clones the whole state,
//! `rollback` restores it and `commit` discards the snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use bouncer_core::{
    BouncerError, BouncerResult, FieldErrors, FieldMap, Proposal, ProposalFilter, ProposalId,
    ProposalStatus, ProposalStore, Record, RecordKey, RecordStore, UnitOfWork, UserId,
    ValidateFn, Value,
};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    next_id: i64,
    rows: BTreeMap<RecordKey, FieldMap>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    /// Insertion order; newest-first ordering is derived on read
    proposals: Vec<Proposal>,
}

#[derive(Default)]
struct Inner {
    state: MemoryState,
    snapshot: Option<MemoryState>,
}

/// Shared in-memory database; also the unit of work for its stores
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of rows currently stored in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .state
            .tables
            .get(collection)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Number of proposals in any status
    pub fn proposal_count(&self) -> usize {
        self.inner.lock().state.proposals.len()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut inner = self.inner.lock();
        f(&mut inner.state)
    }
}

#[async_trait]
impl UnitOfWork for MemoryDatabase {
    async fn begin(&self) -> BouncerResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_some() {
            return Err(BouncerError::transaction_error(
                "A transaction is already active",
            ));
        }
        inner.snapshot = Some(inner.state.clone());
        Ok(())
    }

    async fn commit(&self) -> BouncerResult<()> {
        let mut inner = self.inner.lock();
        inner
            .snapshot
            .take()
            .ok_or_else(|| BouncerError::transaction_error("No active transaction to commit"))?;
        Ok(())
    }

    async fn rollback(&self) -> BouncerResult<()> {
        let mut inner = self.inner.lock();
        let snapshot = inner
            .snapshot
            .take()
            .ok_or_else(|| BouncerError::transaction_error("No active transaction to rollback"))?;
        inner.state = snapshot;
        debug!("In-memory transaction rolled back");
        Ok(())
    }

    async fn in_progress(&self) -> bool {
        self.inner.lock().snapshot.is_some()
    }
}

/// Proposal store over a [`MemoryDatabase`]
pub struct MemoryProposalStore {
    db: Arc<MemoryDatabase>,
}

impl MemoryProposalStore {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }
}

fn newest_first<'a>(proposals: impl DoubleEndedIterator<Item = &'a Proposal>) -> Vec<Proposal> {
    // Reverse first so equal timestamps keep the most recently inserted on top.
    let mut out: Vec<Proposal> = proposals.rev().cloned().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    out
}

#[async_trait]
impl ProposalStore for MemoryProposalStore {
    async fn insert(&self, proposal: &Proposal) -> BouncerResult<()> {
        self.db.with_state(|state| {
            if state.proposals.iter().any(|p| p.id == proposal.id) {
                return Err(BouncerError::conflict(format!(
                    "Proposal {} already exists",
                    proposal.id
                )));
            }
            state.proposals.push(proposal.clone());
            Ok(())
        })
    }

    async fn save(&self, proposal: &Proposal) -> BouncerResult<()> {
        self.db.with_state(|state| {
            let existing = state
                .proposals
                .iter_mut()
                .find(|p| p.id == proposal.id)
                .ok_or_else(|| {
                    BouncerError::not_found(format!("Proposal {} not found", proposal.id))
                })?;
            *existing = proposal.clone();
            Ok(())
        })
    }

    async fn save_pending(&self, proposal: &Proposal) -> BouncerResult<()> {
        self.db.with_state(|state| {
            let existing = state
                .proposals
                .iter_mut()
                .find(|p| p.id == proposal.id)
                .ok_or_else(|| {
                    BouncerError::not_found(format!("Proposal {} not found", proposal.id))
                })?;
            if !existing.is_pending() {
                return Err(BouncerError::conflict(format!(
                    "Proposal {} is already {}",
                    proposal.id, existing.status
                )));
            }
            *existing = proposal.clone();
            Ok(())
        })
    }

    async fn get(&self, id: ProposalId) -> BouncerResult<Proposal> {
        self.db.with_state(|state| {
            state
                .proposals
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| BouncerError::not_found(format!("Proposal {} not found", id)))
        })
    }

    async fn find(&self, filter: &ProposalFilter) -> BouncerResult<Vec<Proposal>> {
        Ok(self.db.with_state(|state| {
            newest_first(state.proposals.iter().filter(|p| filter.matches(p)))
                .into_iter()
                .skip(filter.offset)
                .take(filter.limit.unwrap_or(usize::MAX))
                .collect()
        }))
    }

    async fn find_pending_for_key(
        &self,
        source: &str,
        primary_key: Option<&RecordKey>,
        proposer_id: Option<&UserId>,
    ) -> BouncerResult<Vec<Proposal>> {
        Ok(self.db.with_state(|state| {
            newest_first(state.proposals.iter().filter(|p| {
                p.is_pending()
                    && p.source == source
                    && p.primary_key.as_ref() == primary_key
                    && proposer_id.map_or(true, |id| &p.proposer_id == id)
            }))
        }))
    }

    async fn supersede_others(
        &self,
        source: &str,
        primary_key: Option<&RecordKey>,
        exclude: ProposalId,
    ) -> BouncerResult<u64> {
        Ok(self.db.with_state(|state| {
            let now = Utc::now();
            let mut affected = 0;
            for proposal in state.proposals.iter_mut().filter(|p| {
                p.is_pending()
                    && p.id != exclude
                    && p.source == source
                    && p.primary_key.as_ref() == primary_key
            }) {
                proposal.status = ProposalStatus::Superseded;
                proposal.updated_at = now;
                affected += 1;
            }
            affected
        }))
    }

    async fn sources(&self) -> BouncerResult<Vec<String>> {
        Ok(self.db.with_state(|state| {
            let mut sources: Vec<String> = state.proposals.iter().map(|p| p.source.clone()).collect();
            sources.sort();
            sources.dedup();
            sources
        }))
    }
}

/// A target collection stored in a [`MemoryDatabase`]
///
/// Integer keys are assigned automatically unless the identifier field is
/// supplied on create.
pub struct MemoryRecordStore {
    db: Arc<MemoryDatabase>,
    collection: String,
    identifier_field: String,
    validator: Option<ValidateFn>,
}

impl MemoryRecordStore {
    pub fn new(db: Arc<MemoryDatabase>, collection: impl Into<String>) -> Self {
        Self {
            db,
            collection: collection.into(),
            identifier_field: "id".to_string(),
            validator: None,
        }
    }

    pub fn with_identifier_field(mut self, field: impl Into<String>) -> Self {
        self.identifier_field = field.into();
        self
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&FieldMap, bool) -> FieldErrors + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    fn identifier_field(&self) -> &str {
        &self.identifier_field
    }

    async fn get(&self, key: &RecordKey) -> BouncerResult<Option<FieldMap>> {
        Ok(self.db.with_state(|state| {
            state
                .tables
                .get(&self.collection)
                .and_then(|t| t.rows.get(key))
                .cloned()
        }))
    }

    async fn create(&self, fields: &FieldMap) -> BouncerResult<Record> {
        self.db.with_state(|state| {
            let table = state.tables.entry(self.collection.clone()).or_default();

            let key = match fields.get(&self.identifier_field) {
                Some(value) if !value.is_null() => RecordKey::from_value(value).ok_or_else(|| {
                    BouncerError::invalid_field(
                        self.identifier_field.clone(),
                        "identifier must be an integer or non-empty text",
                    )
                })?,
                _ => RecordKey::Int(table.next_id.max(0) + 1),
            };

            if table.rows.contains_key(&key) {
                return Err(BouncerError::conflict(format!(
                    "{} record {} already exists",
                    self.collection, key
                )));
            }
            if let RecordKey::Int(i) = key {
                table.next_id = table.next_id.max(i);
            }

            let mut row = fields.clone();
            row.insert(self.identifier_field.clone(), key.to_value());
            table.rows.insert(key.clone(), row.clone());

            Ok(Record { key, fields: row })
        })
    }

    async fn patch(&self, key: &RecordKey, fields: &FieldMap) -> BouncerResult<FieldMap> {
        self.db.with_state(|state| {
            let row = state
                .tables
                .get_mut(&self.collection)
                .and_then(|t| t.rows.get_mut(key))
                .ok_or_else(|| {
                    BouncerError::not_found(format!("{} record {} not found", self.collection, key))
                })?;

            for (name, value) in fields {
                if name == &self.identifier_field {
                    continue;
                }
                row.insert(name.clone(), value.clone());
            }
            Ok(row.clone())
        })
    }

    async fn delete(&self, key: &RecordKey) -> BouncerResult<bool> {
        Ok(self.db.with_state(|state| {
            state
                .tables
                .get_mut(&self.collection)
                .map(|t| t.rows.remove(key).is_some())
                .unwrap_or(false)
        }))
    }

    fn validate(&self, fields: &FieldMap, is_new: bool) -> FieldErrors {
        match self.validator {
            Some(ref validator) => validator(fields, is_new),
            None => FieldErrors::new(),
        }
    }
}

/// Rejects records whose `field` is missing, null or blank text.
pub fn require_fields(fields: &FieldMap, required: &[&str]) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for name in required {
        let missing = match fields.get(*name) {
            None | Some(Value::Null) => true,
            Some(Value::Text(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            errors
                .entry(name.to_string())
                .or_default()
                .push("This field is required".to_string());
        }
    }
    errors
}
