// Bouncer - change-approval layer for record stores
// Core library

pub mod decision;
pub mod interceptor;
pub mod metrics;
pub mod observability;
pub mod registry;
pub mod review;

use std::sync::Arc;

use tracing::info;

pub use bouncer_core::*;
pub use decision::{Decision, DecisionEngine, ReplayOutcome};
pub use interceptor::{
    BouncerConfig, BypassReason, BypassVerdict, DraftedRecord, Entity, GuardedCollection,
    InterceptContext, InterceptOutcome, InterceptionEngine, MutationResult,
};
pub use registry::CollectionRegistry;
pub use review::{FieldChange, ProposalView, ReviewFilter, ReviewPage, ReviewQueue, StatusFilter};

use bouncer_stores::{MemoryDatabase, MemoryProposalStore, SqliteDatabase, SqliteProposalStore};

/// Wires proposal storage, guarded collections and the decision engine
/// around one shared unit of work.
pub struct Bouncer {
    proposals: Arc<dyn ProposalStore>,
    unit_of_work: Arc<dyn UnitOfWork>,
    registry: Arc<CollectionRegistry>,
    decisions: Arc<DecisionEngine>,
}

impl Bouncer {
    pub fn new(proposals: Arc<dyn ProposalStore>, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        let registry = Arc::new(CollectionRegistry::new());
        let decisions = Arc::new(DecisionEngine::new(
            Arc::clone(&proposals),
            Arc::clone(&unit_of_work),
            Arc::clone(&registry),
        ));

        Self {
            proposals,
            unit_of_work,
            registry,
            decisions,
        }
    }

    /// Proposals and transactions backed by an in-memory database
    pub fn in_memory(db: Arc<MemoryDatabase>) -> Self {
        let proposals = Arc::new(MemoryProposalStore::new(Arc::clone(&db)));
        Self::new(proposals, db)
    }

    /// Proposals and transactions backed by SQLite
    ///
    /// The proposal table must exist; see [`SqliteDatabase::open`].
    pub fn sqlite(db: Arc<SqliteDatabase>) -> Self {
        let proposals = Arc::new(SqliteProposalStore::new(Arc::clone(&db)));
        Self::new(proposals, db)
    }

    /// An engine sharing this instance's proposal store and unit of work
    pub fn engine(&self, config: BouncerConfig) -> InterceptionEngine {
        InterceptionEngine::new(
            config,
            Arc::clone(&self.proposals),
            Arc::clone(&self.unit_of_work),
        )
    }

    /// Guards a store with `config` and registers it
    pub fn guard(
        &self,
        store: Arc<dyn RecordStore>,
        config: BouncerConfig,
    ) -> Arc<GuardedCollection> {
        let engine = Arc::new(self.engine(config));
        self.register(GuardedCollection::new(store, engine))
    }

    /// Registers a collection built around a customized engine
    pub fn register(&self, collection: GuardedCollection) -> Arc<GuardedCollection> {
        let collection = Arc::new(collection);
        self.registry.register(Arc::clone(&collection));
        info!(collection = collection.name(), "Collection guarded");
        collection
    }

    pub fn collection(&self, name: &str) -> BouncerResult<Arc<GuardedCollection>> {
        self.registry.get(name)
    }

    pub fn proposals(&self) -> &Arc<dyn ProposalStore> {
        &self.proposals
    }

    pub fn unit_of_work(&self) -> &Arc<dyn UnitOfWork> {
        &self.unit_of_work
    }

    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    pub fn decisions(&self) -> Arc<DecisionEngine> {
        Arc::clone(&self.decisions)
    }

    pub fn review(&self) -> ReviewQueue {
        ReviewQueue::new(
            Arc::clone(&self.proposals),
            Arc::clone(&self.registry),
            Arc::clone(&self.decisions),
        )
    }
}
