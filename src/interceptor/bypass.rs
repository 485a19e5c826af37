// SPDX-License-Identifier: Apache-2.0

//! Bypass Policy
//!
//! Decides whether a mutation skips approval. Checks run in a fixed order
//! and the first match wins:
//!
//! 1. explicit bypass flag in the context
//! 2. custom predicate returning [`BypassVerdict::Allow`]
//! 3. proposer listed as exempt
//! 4. operation not gated

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use bouncer_core::{Operation, RecordStore, UserId};

use super::types::{BypassReason, BouncerConfig, Entity, InterceptContext};

/// Answer of a custom bypass predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassVerdict {
    /// Apply the mutation directly
    Allow,
    /// Defer to the remaining checks
    FallThrough,
}

impl From<bool> for BypassVerdict {
    fn from(allow: bool) -> Self {
        if allow {
            Self::Allow
        } else {
            Self::FallThrough
        }
    }
}

pub type BypassPredicate =
    Arc<dyn Fn(&Entity, &InterceptContext, &dyn RecordStore) -> BypassVerdict + Send + Sync>;

/// Ordered bypass checks built from a [`BouncerConfig`]
#[derive(Clone)]
pub struct BypassPolicy {
    predicate: Option<BypassPredicate>,
    exempt: HashSet<UserId>,
    gated: HashSet<Operation>,
}

impl fmt::Debug for BypassPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BypassPolicy")
            .field("predicate", &self.predicate.is_some())
            .field("exempt", &self.exempt)
            .field("gated", &self.gated)
            .finish()
    }
}

impl BypassPolicy {
    pub fn from_config(config: &BouncerConfig) -> Self {
        Self {
            predicate: None,
            exempt: config.exempt_proposers.iter().cloned().collect(),
            gated: config.gated_operations.iter().copied().collect(),
        }
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Entity, &InterceptContext, &dyn RecordStore) -> BypassVerdict
            + Send
            + Sync
            + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn is_exempt(&self, proposer: &UserId) -> bool {
        self.exempt.contains(proposer)
    }

    /// Returns the reason a mutation skips approval, or `None` when it must
    /// be intercepted.
    pub fn check(
        &self,
        operation: Operation,
        entity: &Entity,
        context: &InterceptContext,
        store: &dyn RecordStore,
        proposer: Option<&UserId>,
    ) -> Option<BypassReason> {
        let reason = if context.bypass {
            Some(BypassReason::ExplicitFlag)
        } else if self
            .predicate
            .as_ref()
            .map(|p| p(entity, context, store) == BypassVerdict::Allow)
            .unwrap_or(false)
        {
            Some(BypassReason::Predicate)
        } else if proposer.map(|p| self.is_exempt(p)).unwrap_or(false) {
            Some(BypassReason::ExemptProposer)
        } else if !self.gated.contains(&operation) {
            Some(BypassReason::OperationNotGated)
        } else {
            None
        };

        if let Some(reason) = reason {
            debug!(
                collection = store.collection_name(),
                %operation,
                reason = reason.as_str(),
                "Bypassing approval"
            );
        }
        reason
    }
}
