// SPDX-License-Identifier: Apache-2.0

//! Proposal model
//!
//! A proposal ("bouncer record") is a queued, not-yet-applied mutation of a
//! target record awaiting a reviewer decision.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{BouncerError, BouncerResult};
use crate::types::{FieldMap, RecordKey, UserId, Value};

/// Payload key marking a deletion proposal
pub const DELETE_SENTINEL: &str = "_delete";

/// Unique identifier for a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(id: &str) -> BouncerResult<Self> {
        Uuid::parse_str(id)
            .map(Self)
            .map_err(|e| BouncerError::not_found(format!("Invalid proposal ID '{}': {}", id, e)))
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Review status of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Superseded,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }

    /// Terminal statuses are never re-opened.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Default for ProposalStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = BouncerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "superseded" => Ok(Self::Superseded),
            other => Err(BouncerError::invalid_field(
                "status",
                format!("unknown proposal status '{}'", other),
            )),
        }
    }
}

/// Proposed end-state of the target record.
///
/// Serialized as the field map itself, or as `{"_delete": true}` for deletions.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalPayload {
    Fields(FieldMap),
    Delete,
}

impl ProposalPayload {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }

    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            Self::Fields(fields) => Some(fields),
            Self::Delete => None,
        }
    }

    pub fn to_json(&self) -> BouncerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> BouncerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Serialize for ProposalPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Fields(fields) => fields.serialize(serializer),
            Self::Delete => {
                let mut sentinel = FieldMap::new();
                sentinel.insert(DELETE_SENTINEL.to_string(), Value::Bool(true));
                sentinel.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for ProposalPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = FieldMap::deserialize(deserializer)?;
        if fields.get(DELETE_SENTINEL) == Some(&Value::Bool(true)) {
            Ok(Self::Delete)
        } else {
            Ok(Self::Fields(fields))
        }
    }
}

/// What a proposal would do if approved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalKind {
    Create,
    Edit,
    Delete,
}

/// A queued change awaiting review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    /// Target collection name
    pub source: String,
    /// Target record; `None` for new-record proposals
    pub primary_key: Option<RecordKey>,
    pub proposer_id: UserId,
    #[serde(default)]
    pub reviewer_id: Option<UserId>,
    pub status: ProposalStatus,
    pub payload: ProposalPayload,
    /// Full snapshot of the record before the change (edits and deletes)
    #[serde(default)]
    pub original_payload: Option<FieldMap>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Builds a new pending proposal with a fresh id and timestamps.
    pub fn pending(
        source: impl Into<String>,
        primary_key: Option<RecordKey>,
        proposer_id: UserId,
        payload: ProposalPayload,
        original_payload: Option<FieldMap>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProposalId::new(),
            source: source.into(),
            primary_key,
            proposer_id,
            reviewer_id: None,
            status: ProposalStatus::Pending,
            payload,
            original_payload,
            reason: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> ProposalKind {
        if self.payload.is_delete() {
            ProposalKind::Delete
        } else if self.primary_key.is_none() {
            ProposalKind::Create
        } else {
            ProposalKind::Edit
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    pub fn is_new_record_proposal(&self) -> bool {
        self.primary_key.is_none()
    }

    pub fn is_edit_proposal(&self) -> bool {
        self.kind() == ProposalKind::Edit
    }

    pub fn is_delete_proposal(&self) -> bool {
        self.payload.is_delete()
    }

    /// Proposed field values; empty for deletions.
    pub fn data(&self) -> FieldMap {
        self.payload.fields().cloned().unwrap_or_default()
    }

    /// Snapshot of the record before the change; empty for creations.
    pub fn original_data(&self) -> FieldMap {
        self.original_payload.clone().unwrap_or_default()
    }
}

/// Query filter over stored proposals. Results are always newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalFilter {
    pub status: Option<ProposalStatus>,
    pub source: Option<String>,
    pub proposer_id: Option<UserId>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl ProposalFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(ProposalStatus::Pending),
            ..Default::default()
        }
    }

    pub fn matches(&self, proposal: &Proposal) -> bool {
        if let Some(status) = self.status {
            if proposal.status != status {
                return false;
            }
        }

        if let Some(ref source) = self.source {
            if &proposal.source != source {
                return false;
            }
        }

        if let Some(ref proposer) = self.proposer_id {
            if &proposal.proposer_id != proposer {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_payload_uses_sentinel() {
        let json = ProposalPayload::Delete.to_json().unwrap();
        assert_eq!(json, r#"{"_delete":true}"#);

        let parsed = ProposalPayload::from_json(&json).unwrap();
        assert!(parsed.is_delete());
    }

    #[test]
    fn false_sentinel_is_an_ordinary_field() {
        let parsed = ProposalPayload::from_json(r#"{"_delete":false,"title":"A"}"#).unwrap();
        let fields = parsed.fields().expect("fields payload");
        assert_eq!(fields.get("title"), Some(&Value::Text("A".to_string())));
        assert_eq!(fields.get(DELETE_SENTINEL), Some(&Value::Bool(false)));
    }

    #[test]
    fn kind_follows_key_and_payload() {
        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), Value::from("A"));

        let create = Proposal::pending(
            "Articles",
            None,
            UserId::from(1),
            ProposalPayload::Fields(fields.clone()),
            None,
        );
        assert_eq!(create.kind(), ProposalKind::Create);
        assert!(create.is_new_record_proposal());
        assert!(create.is_pending());

        let edit = Proposal::pending(
            "Articles",
            Some(RecordKey::Int(5)),
            UserId::from(1),
            ProposalPayload::Fields(fields),
            None,
        );
        assert!(edit.is_edit_proposal());

        let delete = Proposal::pending(
            "Articles",
            Some(RecordKey::Int(5)),
            UserId::from(1),
            ProposalPayload::Delete,
            None,
        );
        assert_eq!(delete.kind(), ProposalKind::Delete);
        assert!(delete.data().is_empty());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "Superseded".parse::<ProposalStatus>().unwrap(),
            ProposalStatus::Superseded
        );
        assert!("archived".parse::<ProposalStatus>().is_err());
        assert!(ProposalStatus::Approved.is_terminal());
        assert!(!ProposalStatus::Pending.is_terminal());
    }
}
