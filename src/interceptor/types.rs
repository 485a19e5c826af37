//! Interceptor Types
//!
//! Configuration, per-call context and outcomes of the interception engine.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use bouncer_core::{
    BouncerError, BouncerResult, FieldMap, Operation, Proposal, Record, RecordKey, UnitOfWork,
    UserId, Value,
};

fn default_true() -> bool {
    true
}

fn default_proposer_field() -> String {
    "user_id".to_string()
}

fn default_gated_operations() -> Vec<Operation> {
    Operation::all()
}

fn default_ignored_fields() -> Vec<String> {
    ["created", "modified", "created_at", "updated_at"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Configuration for a guarded collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BouncerConfig {
    /// Record field holding the proposer id when the context carries none
    #[serde(default = "default_proposer_field")]
    pub proposer_field: String,
    /// Operations that require approval
    #[serde(default = "default_gated_operations")]
    pub gated_operations: Vec<Operation>,
    /// Proposers whose changes are applied directly
    #[serde(default)]
    pub exempt_proposers: Vec<UserId>,
    /// Run the collection's validation before a proposal is stored
    #[serde(default = "default_true")]
    pub validate_on_propose: bool,
    /// Keep a single pending proposal per record
    #[serde(default = "default_true")]
    pub auto_supersede: bool,
    /// Withdraw pending proposals when an edit changes nothing
    #[serde(default)]
    pub discard_noop_edits: bool,
    /// Fields never carried in an edit payload
    #[serde(default = "default_ignored_fields")]
    pub ignored_fields: Vec<String>,
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            proposer_field: default_proposer_field(),
            gated_operations: default_gated_operations(),
            exempt_proposers: Vec::new(),
            validate_on_propose: true,
            auto_supersede: true,
            discard_noop_edits: false,
            ignored_fields: default_ignored_fields(),
        }
    }
}

impl BouncerConfig {
    /// Loads configuration from a JSON file; a missing file yields defaults.
    pub fn load(path: &Path) -> BouncerResult<Self> {
        if !path.exists() {
            debug!("No bouncer config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| BouncerError::config(format!("Failed to read config: {}", e)))?;

        let config: BouncerConfig = serde_json::from_str(&content)
            .map_err(|e| BouncerError::config(format!("Failed to parse config: {}", e)))?;

        info!("Loaded bouncer configuration from {:?}", path);
        Ok(config)
    }

    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> BouncerResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BouncerError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BouncerError::config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| BouncerError::config(format!("Failed to write config: {}", e)))?;

        debug!("Saved bouncer configuration to {:?}", path);
        Ok(())
    }

    pub fn is_gated(&self, operation: Operation) -> bool {
        self.gated_operations.contains(&operation)
    }

    pub fn is_ignored(&self, field: &str) -> bool {
        self.ignored_fields.iter().any(|f| f == field)
    }
}

/// Per-call context passed through the interception engine
#[derive(Clone, Default)]
pub struct InterceptContext {
    /// Overrides the proposer field of the record
    pub proposer: Option<UserId>,
    /// Apply the mutation directly
    pub bypass: bool,
    /// Proposer's note, stored on the proposal
    pub reason: Option<String>,
    /// Caller options, visible to the bypass predicate
    pub options: FieldMap,
    /// The transaction this call runs in, if the caller opened one
    pub transaction: Option<Arc<dyn UnitOfWork>>,
}

impl fmt::Debug for InterceptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptContext")
            .field("proposer", &self.proposer)
            .field("bypass", &self.bypass)
            .field("reason", &self.reason)
            .field("options", &self.options)
            .field("in_transaction", &self.transaction.is_some())
            .finish()
    }
}

impl InterceptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_proposer(proposer: impl Into<UserId>) -> Self {
        Self {
            proposer: Some(proposer.into()),
            ..Default::default()
        }
    }

    /// Context used when replaying an approved proposal or for trusted writes
    pub fn bypassed() -> Self {
        Self {
            bypass: true,
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Runs the call inside the caller's open transaction
    ///
    /// Only this transaction is ever committed early to keep a proposal.
    pub fn in_transaction(mut self, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        self.transaction = Some(unit_of_work);
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }
}

/// The record a mutation targets
///
/// For create and update the fields are the proposed values; for delete
/// they are the current stored state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    pub key: Option<RecordKey>,
    pub fields: FieldMap,
}

impl Entity {
    pub fn new(fields: FieldMap) -> Self {
        Self { key: None, fields }
    }

    pub fn existing(key: RecordKey, fields: FieldMap) -> Self {
        Self {
            key: Some(key),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Why a mutation was allowed through untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassReason {
    ExplicitFlag,
    Predicate,
    ExemptProposer,
    OperationNotGated,
}

impl BypassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExplicitFlag => "explicit_flag",
            Self::Predicate => "predicate",
            Self::ExemptProposer => "exempt_proposer",
            Self::OperationNotGated => "operation_not_gated",
        }
    }
}

/// Result of intercepting one mutation
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptOutcome {
    /// Apply the mutation to the store
    Proceed(BypassReason),
    /// The mutation was captured as a proposal and must not be applied
    Bounced {
        proposal: Proposal,
        /// Other pending proposals superseded by this one
        superseded: u64,
    },
    /// A no-op edit withdrew the pending proposals for the record
    Withdrawn { superseded: u64 },
}

impl InterceptOutcome {
    pub fn should_proceed(&self) -> bool {
        matches!(self, Self::Proceed(_))
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        match self {
            Self::Bounced { proposal, .. } => Some(proposal),
            _ => None,
        }
    }
}

/// Outcome of a mutation issued through a guarded collection
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    pub outcome: InterceptOutcome,
    /// The stored record when the mutation was applied (absent for deletes)
    pub record: Option<Record>,
}

impl MutationResult {
    pub fn was_bounced(&self) -> bool {
        matches!(self.outcome, InterceptOutcome::Bounced { .. })
    }

    pub fn was_applied(&self) -> bool {
        self.outcome.should_proceed()
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.outcome.proposal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: BouncerConfig =
            serde_json::from_str(r#"{"exempt_proposers":["1"],"gated_operations":["delete"]}"#)
                .unwrap();

        assert_eq!(config.proposer_field, "user_id");
        assert_eq!(config.exempt_proposers, vec![UserId::from(1)]);
        assert!(config.is_gated(Operation::Delete));
        assert!(!config.is_gated(Operation::Create));
        assert!(config.validate_on_propose);
        assert!(config.auto_supersede);
        assert!(!config.discard_noop_edits);
        assert!(config.is_ignored("modified"));
    }

    #[test]
    fn config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bouncer.json");

        let config = BouncerConfig {
            discard_noop_edits: true,
            ignored_fields: vec!["touched_at".to_string()],
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = BouncerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_config_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = BouncerConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, BouncerConfig::default());
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bouncer.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = BouncerConfig::load(&path).unwrap_err();
        assert!(matches!(err, BouncerError::Config { .. }));
    }
}
