use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sql_types::Text;
use diesel::SqliteConnection;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use securitymaster_core::documents::{apply_patch, Document, DocumentPatch};
use securitymaster_core::errors::{Result, ValidationError};
use securitymaster_core::sync::{BulkWriteResult, DocumentStore, WriteFailure, WriteOp};
use securitymaster_core::constants::DOCUMENT_ID_FIELD;
use securitymaster_core::{Clock, SystemClock};

use super::model::DocumentDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::documents;
use crate::utils::{chunk_for_sqlite, format_timestamp};

/// Document store over the `documents` table.
///
/// Reads go through the pool; every bulk write is a single job on the writer
/// actor, with each operation in its own savepoint so one failure leaves its
/// siblings intact.
pub struct DocumentRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    clock: Arc<dyn Clock>,
}

// Membership test against a JSON array bound as text, so one statement covers
// a whole chunk of values.
const FIND_BY_FIELD_SQL: &str = "SELECT collection, id, body, created_at, updated_at \
     FROM documents \
     WHERE collection = ? AND json_extract(body, ?) IN (SELECT value FROM json_each(?))";

enum Applied {
    Inserted,
    Updated,
    Upserted,
    Unchanged,
}

impl DocumentRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self::with_clock(pool, writer, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: Arc<DbPool>, writer: WriteHandle, clock: Arc<dyn Clock>) -> Self {
        DocumentRepository {
            pool,
            writer,
            clock,
        }
    }

    /// Last write time of one document.
    pub fn updated_at(&self, collection: &str, id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = get_connection(&self.pool)?;
        let row = documents::table
            .find((collection, id))
            .select(DocumentDB::as_select())
            .first::<DocumentDB>(&mut conn)
            .optional()
            .into_core()?;
        row.map(|r| r.updated_at()).transpose()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        documents::table
            .filter(documents::collection.eq(collection))
            .count()
            .get_result(&mut conn)
            .into_core()
    }
}

/// `$.field` path for json_extract. Field names are restricted to identifier
/// characters so they can be spliced into the path.
fn json_path(field: &str) -> Result<String> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ValidationError::InvalidInput(format!("invalid field name '{}'", field)).into());
    }
    Ok(format!("$.{}", field))
}

fn load_body(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
) -> std::result::Result<Option<Document>, StorageError> {
    let body: Option<String> = documents::table
        .find((collection, id))
        .select(documents::body)
        .first(conn)
        .optional()?;
    match body {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn store_body(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
    body: &Document,
    now: &str,
) -> std::result::Result<(), StorageError> {
    diesel::update(documents::table.find((collection, id)))
        .set((
            documents::body.eq(serde_json::to_string(body)?),
            documents::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

fn insert_body(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
    body: &Document,
    now: &str,
) -> std::result::Result<(), StorageError> {
    let row = DocumentDB::new(collection, id, body, now)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    diesel::insert_into(documents::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

fn write_one(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
    op: WriteOp,
    now: &str,
) -> std::result::Result<Applied, StorageError> {
    match op {
        WriteOp::Insert { document } => {
            insert_body(conn, collection, id, &document, now)?;
            Ok(Applied::Inserted)
        }
        WriteOp::Update { patch, .. } => {
            let mut body = load_body(conn, collection, id)?
                .ok_or(StorageError::QueryFailed(DieselError::NotFound))?;
            if apply_patch(&mut body, &patch) {
                store_body(conn, collection, id, &body, now)?;
                Ok(Applied::Updated)
            } else {
                Ok(Applied::Unchanged)
            }
        }
        WriteOp::Upsert { set, .. } => match load_body(conn, collection, id)? {
            None => {
                let mut body = set;
                body.entry(DOCUMENT_ID_FIELD.to_string())
                    .or_insert_with(|| Value::String(id.to_string()));
                insert_body(conn, collection, id, &body, now)?;
                Ok(Applied::Upserted)
            }
            Some(mut body) => {
                let patch = DocumentPatch {
                    set,
                    unset: Vec::new(),
                };
                if apply_patch(&mut body, &patch) {
                    store_body(conn, collection, id, &body, now)?;
                    Ok(Applied::Upserted)
                } else {
                    Ok(Applied::Unchanged)
                }
            }
        },
    }
}

#[async_trait]
impl DocumentStore for DocumentRepository {
    fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
    ) -> Result<Vec<Document>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let path = json_path(field)?;
        let mut conn = get_connection(&self.pool)?;

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for chunk in chunk_for_sqlite(values) {
            let values_json = serde_json::to_string(chunk)?;
            let rows: Vec<DocumentDB> = diesel::sql_query(FIND_BY_FIELD_SQL)
                .bind::<Text, _>(collection)
                .bind::<Text, _>(path.as_str())
                .bind::<Text, _>(values_json.as_str())
                .load(&mut conn)
                .into_core()?;
            for row in rows {
                if seen.insert(row.id.clone()) {
                    found.push(row.document()?);
                }
            }
        }
        Ok(found)
    }

    fn scan(&self, collection: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Document>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = documents::table
            .filter(documents::collection.eq(collection))
            .into_boxed();
        if let Some(since) = since {
            query = query.filter(documents::updated_at.ge(format_timestamp(since)));
        }
        let rows = query
            .order((documents::updated_at.asc(), documents::id.asc()))
            .select(DocumentDB::as_select())
            .load::<DocumentDB>(&mut conn)
            .into_core()?;
        rows.iter().map(DocumentDB::document).collect()
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> Result<BulkWriteResult> {
        let collection = collection.to_string();
        let now = format_timestamp(self.clock.now());
        debug!("Writing {} operations to '{}'", ops.len(), collection);

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<BulkWriteResult> {
                let mut result = BulkWriteResult::default();
                for (index, op) in ops.into_iter().enumerate() {
                    let Some(id) = op.id().map(str::to_string) else {
                        result.failures.push(WriteFailure {
                            index,
                            id: None,
                            message: "document has no id".to_string(),
                        });
                        continue;
                    };
                    let outcome = conn.transaction::<_, StorageError, _>(|tx| {
                        write_one(tx, &collection, &id, op, &now)
                    });
                    match outcome {
                        Ok(Applied::Inserted) => result.inserted += 1,
                        Ok(Applied::Updated) => result.updated += 1,
                        Ok(Applied::Upserted) => result.upserted += 1,
                        Ok(Applied::Unchanged) => result.unchanged += 1,
                        Err(e) => {
                            warn!("Write of '{}' in '{}' failed: {}", id, collection, e);
                            result.failures.push(WriteFailure {
                                index,
                                id: Some(id),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                Ok(result)
            })
            .await
    }
}
