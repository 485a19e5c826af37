// SPDX-License-Identifier: Apache-2.0

//! Proposal persistence in the `bouncer_records` table

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use bouncer_core::{
    BouncerError, BouncerResult, FieldMap, Proposal, ProposalFilter, ProposalId, ProposalPayload,
    ProposalStatus, ProposalStore, RecordKey, UserId,
};

use super::{storage_err, SqliteDatabase};

const COLUMNS: &str = "id, source, primary_key, proposer_id, reviewer_id, status, payload, \
                       original_payload, reason, reviewed_at, created_at, updated_at";

const ORDER: &str = "ORDER BY created_at DESC, rowid DESC";

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> BouncerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BouncerError::serialization(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn encode_key(key: Option<&RecordKey>) -> BouncerResult<Option<String>> {
    key.map(serde_json::to_string)
        .transpose()
        .map_err(BouncerError::from)
}

/// Column values of one proposal, owned so they can be bound by reference
struct EncodedProposal {
    id: String,
    primary_key: Option<String>,
    reviewer_id: Option<String>,
    payload: String,
    original_payload: Option<String>,
    reviewed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl EncodedProposal {
    fn new(proposal: &Proposal) -> BouncerResult<Self> {
        Ok(Self {
            id: proposal.id.to_string(),
            primary_key: encode_key(proposal.primary_key.as_ref())?,
            reviewer_id: proposal.reviewer_id.as_ref().map(|r| r.0.clone()),
            payload: proposal.payload.to_json()?,
            original_payload: proposal
                .original_payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            reviewed_at: proposal.reviewed_at.as_ref().map(format_ts),
            created_at: format_ts(&proposal.created_at),
            updated_at: format_ts(&proposal.updated_at),
        })
    }
}

fn decode_row(row: &SqliteRow) -> BouncerResult<Proposal> {
    let get_text = |name: &str| row.try_get::<String, _>(name).map_err(storage_err);
    let get_opt = |name: &str| row.try_get::<Option<String>, _>(name).map_err(storage_err);

    let primary_key = get_opt("primary_key")?
        .map(|raw| serde_json::from_str::<RecordKey>(&raw))
        .transpose()?;
    let original_payload = get_opt("original_payload")?
        .map(|raw| serde_json::from_str::<FieldMap>(&raw))
        .transpose()?;

    Ok(Proposal {
        id: ProposalId::parse(&get_text("id")?)?,
        source: get_text("source")?,
        primary_key,
        proposer_id: UserId(get_text("proposer_id")?),
        reviewer_id: get_opt("reviewer_id")?.map(UserId),
        status: get_text("status")?.parse::<ProposalStatus>()?,
        payload: ProposalPayload::from_json(&get_text("payload")?)?,
        original_payload,
        reason: get_opt("reason")?,
        reviewed_at: get_opt("reviewed_at")?.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&get_text("created_at")?)?,
        updated_at: parse_ts(&get_text("updated_at")?)?,
    })
}

/// [`ProposalStore`] over a [`SqliteDatabase`]
pub struct SqliteProposalStore {
    db: Arc<SqliteDatabase>,
}

impl SqliteProposalStore {
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self { db }
    }

    /// Rewrites every column of the row; `guard` narrows the WHERE clause.
    async fn update_row(&self, proposal: &Proposal, guard: &str) -> BouncerResult<u64> {
        let enc = EncodedProposal::new(proposal)?;
        let sql = format!(
            "UPDATE bouncer_records SET source = ?, primary_key = ?, proposer_id = ?, \
             reviewer_id = ?, status = ?, payload = ?, original_payload = ?, reason = ?, \
             reviewed_at = ?, created_at = ?, updated_at = ? WHERE id = ?{}",
            guard
        );
        let query = sqlx::query(&sql)
            .bind(proposal.source.as_str())
            .bind(enc.primary_key.as_deref())
            .bind(proposal.proposer_id.as_str())
            .bind(enc.reviewer_id.as_deref())
            .bind(proposal.status.as_str())
            .bind(enc.payload.as_str())
            .bind(enc.original_payload.as_deref())
            .bind(proposal.reason.as_deref())
            .bind(enc.reviewed_at.as_deref())
            .bind(enc.created_at.as_str())
            .bind(enc.updated_at.as_str())
            .bind(enc.id.as_str());

        Ok(self.db.execute(query).await?.rows_affected())
    }
}

#[async_trait]
impl ProposalStore for SqliteProposalStore {
    async fn insert(&self, proposal: &Proposal) -> BouncerResult<()> {
        let enc = EncodedProposal::new(proposal)?;
        let sql = format!(
            "INSERT INTO bouncer_records ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        );

        let query = sqlx::query(&sql)
            .bind(enc.id.as_str())
            .bind(proposal.source.as_str())
            .bind(enc.primary_key.as_deref())
            .bind(proposal.proposer_id.as_str())
            .bind(enc.reviewer_id.as_deref())
            .bind(proposal.status.as_str())
            .bind(enc.payload.as_str())
            .bind(enc.original_payload.as_deref())
            .bind(proposal.reason.as_deref())
            .bind(enc.reviewed_at.as_deref())
            .bind(enc.created_at.as_str())
            .bind(enc.updated_at.as_str());

        self.db.execute(query).await.map_err(|e| match e {
            BouncerError::Storage { ref message } if message.contains("UNIQUE") => {
                BouncerError::conflict(format!("Proposal {} already exists", proposal.id))
            }
            other => other,
        })?;
        Ok(())
    }

    async fn save(&self, proposal: &Proposal) -> BouncerResult<()> {
        let affected = self.update_row(proposal, "").await?;
        if affected == 0 {
            return Err(BouncerError::not_found(format!(
                "Proposal {} not found",
                proposal.id
            )));
        }
        Ok(())
    }

    async fn save_pending(&self, proposal: &Proposal) -> BouncerResult<()> {
        let affected = self
            .update_row(proposal, " AND status = 'pending'")
            .await?;
        if affected == 0 {
            // Either gone or no longer pending; tell the two apart.
            let current = self.get(proposal.id).await?;
            return Err(BouncerError::conflict(format!(
                "Proposal {} is already {}",
                proposal.id, current.status
            )));
        }
        Ok(())
    }

    async fn get(&self, id: ProposalId) -> BouncerResult<Proposal> {
        let sql = format!("SELECT {} FROM bouncer_records WHERE id = ?", COLUMNS);
        let id_text = id.to_string();
        let row = self
            .db
            .fetch_optional(sqlx::query(&sql).bind(id_text.as_str()))
            .await?
            .ok_or_else(|| BouncerError::not_found(format!("Proposal {} not found", id)))?;
        decode_row(&row)
    }

    async fn find(&self, filter: &ProposalFilter) -> BouncerResult<Vec<Proposal>> {
        let mut sql = format!("SELECT {} FROM bouncer_records WHERE 1 = 1", COLUMNS);
        let mut params: Vec<&str> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(status.as_str());
        }
        if let Some(ref source) = filter.source {
            sql.push_str(" AND source = ?");
            params.push(source.as_str());
        }
        if let Some(ref proposer) = filter.proposer_id {
            sql.push_str(" AND proposer_id = ?");
            params.push(proposer.as_str());
        }
        sql.push_str(&format!(" {} LIMIT ? OFFSET ?", ORDER));

        // Out-of-range values saturate; a negative OFFSET would mean zero.
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let offset = i64::try_from(filter.offset).unwrap_or(i64::MAX);

        let mut query = sqlx::query(&sql);
        for param in params {
            query = query.bind(param);
        }
        query = query.bind(limit).bind(offset);

        self.db
            .fetch_all(query)
            .await?
            .iter()
            .map(decode_row)
            .collect()
    }

    async fn find_pending_for_key(
        &self,
        source: &str,
        primary_key: Option<&RecordKey>,
        proposer_id: Option<&UserId>,
    ) -> BouncerResult<Vec<Proposal>> {
        let key = encode_key(primary_key)?;
        let mut sql = format!(
            "SELECT {} FROM bouncer_records \
             WHERE status = 'pending' AND source = ? AND primary_key IS ?",
            COLUMNS
        );
        if proposer_id.is_some() {
            sql.push_str(" AND proposer_id = ?");
        }
        sql.push(' ');
        sql.push_str(ORDER);

        let mut query = sqlx::query(&sql).bind(source).bind(key.as_deref());
        if let Some(proposer) = proposer_id {
            query = query.bind(proposer.as_str());
        }

        self.db
            .fetch_all(query)
            .await?
            .iter()
            .map(decode_row)
            .collect()
    }

    async fn supersede_others(
        &self,
        source: &str,
        primary_key: Option<&RecordKey>,
        exclude: ProposalId,
    ) -> BouncerResult<u64> {
        let key = encode_key(primary_key)?;
        let now = format_ts(&Utc::now());
        let exclude = exclude.to_string();

        let query = sqlx::query(
            "UPDATE bouncer_records SET status = 'superseded', updated_at = ? \
             WHERE status = 'pending' AND source = ? AND primary_key IS ? AND id != ?",
        )
        .bind(now.as_str())
        .bind(source)
        .bind(key.as_deref())
        .bind(exclude.as_str());

        Ok(self.db.execute(query).await?.rows_affected())
    }

    async fn sources(&self) -> BouncerResult<Vec<String>> {
        let rows = self
            .db
            .fetch_all(sqlx::query(
                "SELECT DISTINCT source FROM bouncer_records ORDER BY source ASC",
            ))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(storage_err))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncer_core::Value;

    async fn store() -> SqliteProposalStore {
        let db = SqliteDatabase::open(":memory:").await.unwrap();
        SqliteProposalStore::new(Arc::new(db))
    }

    fn fields(title: &str) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("title".to_string(), Value::from(title));
        map
    }

    #[tokio::test]
    async fn insert_then_get_preserves_every_column() {
        let store = store().await;
        let mut proposal = Proposal::pending(
            "Articles",
            Some(RecordKey::Int(3)),
            UserId::from(7),
            ProposalPayload::Fields(fields("New")),
            Some(fields("Old")),
        );
        proposal.reason = Some("typo".to_string());
        store.insert(&proposal).await.unwrap();

        let loaded = store.get(proposal.id).await.unwrap();
        assert_eq!(loaded, proposal);
    }

    #[tokio::test]
    async fn delete_payload_round_trips_through_sentinel() {
        let store = store().await;
        let proposal = Proposal::pending(
            "Articles",
            Some(RecordKey::from("abc")),
            UserId::from(1),
            ProposalPayload::Delete,
            Some(fields("Gone")),
        );
        store.insert(&proposal).await.unwrap();

        let loaded = store.get(proposal.id).await.unwrap();
        assert!(loaded.is_delete_proposal());
        assert_eq!(loaded.primary_key, Some(RecordKey::from("abc")));
    }

    #[tokio::test]
    async fn null_key_lookup_matches_only_new_record_proposals() {
        let store = store().await;
        let create = Proposal::pending(
            "Articles",
            None,
            UserId::from(1),
            ProposalPayload::Fields(fields("A")),
            None,
        );
        let edit = Proposal::pending(
            "Articles",
            Some(RecordKey::Int(1)),
            UserId::from(1),
            ProposalPayload::Fields(fields("B")),
            None,
        );
        store.insert(&create).await.unwrap();
        store.insert(&edit).await.unwrap();

        let found = store
            .find_pending_for_key("Articles", None, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, create.id);
    }

    #[tokio::test]
    async fn save_unknown_proposal_is_not_found() {
        let store = store().await;
        let proposal = Proposal::pending(
            "Articles",
            None,
            UserId::from(1),
            ProposalPayload::Fields(fields("A")),
            None,
        );
        assert!(store.save(&proposal).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn only_one_finalization_of_a_pending_proposal_wins() {
        let store = store().await;
        let proposal = Proposal::pending(
            "Articles",
            Some(RecordKey::Int(2)),
            UserId::from(1),
            ProposalPayload::Fields(fields("A")),
            None,
        );
        store.insert(&proposal).await.unwrap();

        let mut first = proposal.clone();
        first.status = ProposalStatus::Approved;
        first.reviewer_id = Some(UserId::from("alice"));
        let mut second = proposal.clone();
        second.status = ProposalStatus::Approved;
        second.reviewer_id = Some(UserId::from("bob"));

        store.save_pending(&first).await.unwrap();
        assert!(store.save_pending(&second).await.unwrap_err().is_conflict());

        let stored = store.get(proposal.id).await.unwrap();
        assert_eq!(stored.reviewer_id, Some(UserId::from("alice")));

        let mut unknown = proposal.clone();
        unknown.id = ProposalId::new();
        assert!(store.save_pending(&unknown).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let store = store().await;
        let proposal = Proposal::pending(
            "Articles",
            None,
            UserId::from(1),
            ProposalPayload::Fields(fields("A")),
            None,
        );
        store.insert(&proposal).await.unwrap();
        assert!(store.insert(&proposal).await.unwrap_err().is_conflict());
    }
}
