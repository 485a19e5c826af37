// SPDX-License-Identifier: Apache-2.0

//! Generic table adapter exposing an SQLite table as a [`RecordStore`]

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row};

use bouncer_core::{
    BouncerError, BouncerResult, FieldErrors, FieldMap, Record, RecordKey, RecordStore,
    ValidateFn, Value,
};

use super::{bind_value, extract_value, quote_ident, SqliteDatabase};

fn key_value(key: &RecordKey) -> Value {
    key.to_value()
}

fn row_to_fields(row: &SqliteRow) -> FieldMap {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), extract_value(row, col.ordinal())))
        .collect()
}

/// A target table addressed by a single identifier column
pub struct SqliteRecordStore {
    db: Arc<SqliteDatabase>,
    table: String,
    identifier_field: String,
    validator: Option<ValidateFn>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqliteDatabase>, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
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

    fn not_found(&self, key: &RecordKey) -> BouncerError {
        BouncerError::not_found(format!("{} record {} not found", self.table, key))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn collection_name(&self) -> &str {
        &self.table
    }

    fn identifier_field(&self) -> &str {
        &self.identifier_field
    }

    async fn get(&self, key: &RecordKey) -> BouncerResult<Option<FieldMap>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(&self.table),
            quote_ident(&self.identifier_field)
        );
        let key = key_value(key);
        let row = self
            .db
            .fetch_optional(bind_value(sqlx::query(&sql), &key))
            .await?;
        Ok(row.as_ref().map(row_to_fields))
    }

    async fn create(&self, fields: &FieldMap) -> BouncerResult<Record> {
        let table_name = quote_ident(&self.table);
        let keys: Vec<&String> = fields.keys().collect();

        let sql = if keys.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table_name)
        } else {
            let cols_str = keys
                .iter()
                .map(|k| quote_ident(k))
                .collect::<Vec<_>>()
                .join(", ");
            let params_str = vec!["?"; keys.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table_name, cols_str, params_str
            )
        };

        let mut query = sqlx::query(&sql);
        for value in fields.values() {
            query = bind_value(query, value);
        }

        let result = self.db.execute(query).await.map_err(|e| match e {
            BouncerError::Storage { ref message } if message.contains("UNIQUE") => {
                BouncerError::conflict(format!("{} record already exists", self.table))
            }
            other => other,
        })?;

        let key = match fields.get(&self.identifier_field) {
            Some(value) if !value.is_null() => RecordKey::from_value(value).ok_or_else(|| {
                BouncerError::invalid_field(
                    self.identifier_field.clone(),
                    "identifier must be an integer or non-empty text",
                )
            })?,
            _ => RecordKey::Int(result.last_insert_rowid()),
        };

        // Re-read so column defaults are part of the returned record.
        let stored = self
            .get(&key)
            .await?
            .ok_or_else(|| BouncerError::internal(format!("{} row vanished after insert", self.table)))?;

        Ok(Record {
            key,
            fields: stored,
        })
    }

    async fn patch(&self, key: &RecordKey, fields: &FieldMap) -> BouncerResult<FieldMap> {
        let changes: Vec<(&String, &Value)> = fields
            .iter()
            .filter(|(name, _)| *name != &self.identifier_field)
            .collect();

        if !changes.is_empty() {
            let set_clause = changes
                .iter()
                .map(|(name, _)| format!("{} = ?", quote_ident(name)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote_ident(&self.table),
                set_clause,
                quote_ident(&self.identifier_field)
            );

            let key_val = key_value(key);
            let mut query = sqlx::query(&sql);
            for (_, value) in &changes {
                query = bind_value(query, value);
            }
            query = bind_value(query, &key_val);

            if self.db.execute(query).await?.rows_affected() == 0 {
                return Err(self.not_found(key));
            }
        }

        self.get(key).await?.ok_or_else(|| self.not_found(key))
    }

    async fn delete(&self, key: &RecordKey) -> BouncerResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(&self.table),
            quote_ident(&self.identifier_field)
        );
        let key = key_value(key);
        let result = self.db.execute(bind_value(sqlx::query(&sql), &key)).await?;
        Ok(result.rows_affected() > 0)
    }

    fn validate(&self, fields: &FieldMap, is_new: bool) -> FieldErrors {
        match self.validator {
            Some(ref validator) => validator(fields, is_new),
            None => FieldErrors::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn articles() -> SqliteRecordStore {
        let db = SqliteDatabase::open(":memory:").await.unwrap();
        db.execute_script(
            "CREATE TABLE articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                body TEXT NULL,
                published INTEGER NOT NULL DEFAULT 0,
                featured BOOLEAN NOT NULL DEFAULT 0
            );",
        )
        .await
        .unwrap();
        SqliteRecordStore::new(Arc::new(db), "articles")
    }

    fn article(title: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), Value::from(title));
        fields.insert("user_id".to_string(), Value::Int(1));
        fields
    }

    #[tokio::test]
    async fn create_returns_row_with_defaults() {
        let store = articles().await;
        let record = store.create(&article("Hello")).await.unwrap();

        assert_eq!(record.key, RecordKey::Int(1));
        assert_eq!(record.get("title"), Some(&Value::from("Hello")));
        assert_eq!(record.get("published"), Some(&Value::Int(0)));
        assert_eq!(record.get("featured"), Some(&Value::Bool(false)));
        assert_eq!(record.get("body"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn patch_merges_and_ignores_identifier() {
        let store = articles().await;
        let record = store.create(&article("Hello")).await.unwrap();

        let mut changes = FieldMap::new();
        changes.insert("title".to_string(), Value::from("Changed"));
        changes.insert("id".to_string(), Value::Int(99));
        let updated = store.patch(&record.key, &changes).await.unwrap();

        assert_eq!(updated.get("title"), Some(&Value::from("Changed")));
        assert_eq!(updated.get("id"), Some(&Value::Int(1)));
        assert_eq!(updated.get("user_id"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn boolean_columns_read_back_as_booleans() {
        let store = articles().await;
        let mut fields = article("Hello");
        fields.insert("featured".to_string(), Value::Bool(true));
        let record = store.create(&fields).await.unwrap();

        let stored = store.get(&record.key).await.unwrap().unwrap();
        assert_eq!(stored.get("featured"), Some(&Value::Bool(true)));
        assert_eq!(stored.get("published"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn patch_and_delete_report_missing_rows() {
        let store = articles().await;
        let err = store
            .patch(&RecordKey::Int(5), &article("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.delete(&RecordKey::Int(5)).await.unwrap());
    }
}
