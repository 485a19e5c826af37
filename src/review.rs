//! Review Queue
//!
//! The reviewer-facing surface: paginated listing, distinct sources, a
//! detail view with the live record, and approve/reject.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use bouncer_core::{
    BouncerError, BouncerResult, FieldMap, Proposal, ProposalFilter, ProposalId, ProposalStatus,
    ProposalStore, UserId, Value,
};

use crate::decision::{Decision, DecisionEngine};
use crate::registry::CollectionRegistry;

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

/// Largest page a listing returns
pub const MAX_PAGE_SIZE: usize = 500;

/// Status selection for listings; pending unless asked otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    All,
    Only(ProposalStatus),
}

impl Default for StatusFilter {
    fn default() -> Self {
        Self::Only(ProposalStatus::Pending)
    }
}

impl FromStr for StatusFilter {
    type Err = BouncerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Ok(Self::default())
        } else if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse::<ProposalStatus>().map(Self::Only)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFilter {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub proposer: Option<UserId>,
    /// 1-based
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ReviewFilter {
    fn default() -> Self {
        Self {
            status: StatusFilter::default(),
            source: None,
            proposer: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl ReviewFilter {
    pub fn all() -> Self {
        Self {
            status: StatusFilter::All,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_proposer(mut self, proposer: impl Into<UserId>) -> Self {
        self.proposer = Some(proposer.into());
        self
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`
    fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    fn to_store_filter(&self) -> ProposalFilter {
        let page_size = self.effective_page_size();
        ProposalFilter {
            status: match self.status {
                StatusFilter::All => None,
                StatusFilter::Only(status) => Some(status),
            },
            source: self.source.clone(),
            proposer_id: self.proposer.clone(),
            // One extra row tells whether another page follows.
            limit: Some(page_size + 1),
            offset: (self.page.max(1) - 1).saturating_mul(page_size),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewPage {
    pub items: Vec<Proposal>,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// One changed field, before and after
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<Value>,
    pub after: Value,
}

/// A proposal with the live state of its target record
#[derive(Debug, Clone, Serialize)]
pub struct ProposalView {
    pub proposal: Proposal,
    /// Current stored record for edits and deletes
    pub current_record: Option<FieldMap>,
    /// The target record no longer exists
    pub record_missing: bool,
}

impl ProposalView {
    /// Proposed values next to the snapshot taken when they were proposed
    pub fn changes(&self) -> Vec<FieldChange> {
        let original = self.proposal.original_data();
        self.proposal
            .data()
            .into_iter()
            .map(|(field, after)| FieldChange {
                before: original.get(&field).cloned(),
                field,
                after,
            })
            .collect()
    }
}

pub struct ReviewQueue {
    proposals: Arc<dyn ProposalStore>,
    registry: Arc<CollectionRegistry>,
    decisions: Arc<DecisionEngine>,
}

impl ReviewQueue {
    pub fn new(
        proposals: Arc<dyn ProposalStore>,
        registry: Arc<CollectionRegistry>,
        decisions: Arc<DecisionEngine>,
    ) -> Self {
        Self {
            proposals,
            registry,
            decisions,
        }
    }

    /// Proposals matching the filter, newest first
    pub async fn list(&self, filter: &ReviewFilter) -> BouncerResult<ReviewPage> {
        let page_size = filter.effective_page_size();
        let mut items = self.proposals.find(&filter.to_store_filter()).await?;
        let has_more = items.len() > page_size;
        items.truncate(page_size);

        Ok(ReviewPage {
            items,
            page: filter.page.max(1),
            page_size,
            has_more,
        })
    }

    /// Distinct source names, for the source filter
    pub async fn sources(&self) -> BouncerResult<Vec<String>> {
        self.proposals.sources().await
    }

    pub async fn view(&self, id: ProposalId) -> BouncerResult<ProposalView> {
        let proposal = self.proposals.get(id).await?;

        let (current_record, record_missing) = match proposal.primary_key {
            Some(ref key) => {
                let collection = self.registry.get(&proposal.source)?;
                let current = collection.get(key).await?;
                let missing = current.is_none();
                (current, missing)
            }
            None => (None, false),
        };

        Ok(ProposalView {
            proposal,
            current_record,
            record_missing,
        })
    }

    pub async fn approve(
        &self,
        id: ProposalId,
        reviewer: &UserId,
        reason: Option<String>,
    ) -> BouncerResult<Proposal> {
        self.decisions
            .decide(id, Decision::Approve, reviewer, reason)
            .await
    }

    pub async fn reject(
        &self,
        id: ProposalId,
        reviewer: &UserId,
        reason: Option<String>,
    ) -> BouncerResult<Proposal> {
        self.decisions
            .decide(id, Decision::Reject, reviewer, reason)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_parses_all_and_statuses() {
        assert_eq!("all".parse::<StatusFilter>().unwrap(), StatusFilter::All);
        assert_eq!(
            "".parse::<StatusFilter>().unwrap(),
            StatusFilter::Only(ProposalStatus::Pending)
        );
        assert_eq!(
            "Rejected".parse::<StatusFilter>().unwrap(),
            StatusFilter::Only(ProposalStatus::Rejected)
        );
        assert!("bogus".parse::<StatusFilter>().is_err());
    }

    #[test]
    fn filter_pages_map_to_offsets() {
        let filter = ReviewFilter::all().with_source("Articles").page(3, 10);
        let store_filter = filter.to_store_filter();

        assert_eq!(store_filter.status, None);
        assert_eq!(store_filter.source.as_deref(), Some("Articles"));
        assert_eq!(store_filter.offset, 20);
        assert_eq!(store_filter.limit, Some(11));
    }

    #[test]
    fn page_zero_is_treated_as_first_page() {
        let filter = ReviewFilter::default().page(0, 0);
        let store_filter = filter.to_store_filter();
        assert_eq!(store_filter.offset, 0);
        assert_eq!(store_filter.limit, Some(2));
        assert_eq!(store_filter.status, Some(ProposalStatus::Pending));
    }

    #[test]
    fn oversized_pages_are_clamped() {
        let filter: ReviewFilter = serde_json::from_str(
            r#"{"page":18446744073709551615,"page_size":18446744073709551615}"#,
        )
        .unwrap();
        let store_filter = filter.to_store_filter();
        assert_eq!(store_filter.limit, Some(MAX_PAGE_SIZE + 1));
        assert_eq!(store_filter.offset, usize::MAX);
    }

    #[test]
    fn filter_deserializes_with_defaults() {
        let filter: ReviewFilter = serde_json::from_str(r#"{"source":"Articles"}"#).unwrap();
        assert_eq!(filter.status, StatusFilter::default());
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, 20);
    }
}
