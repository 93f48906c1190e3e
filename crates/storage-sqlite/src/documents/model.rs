//! Database model for stored documents.

use diesel::prelude::*;
use securitymaster_core::documents::Document;
use securitymaster_core::Result;

use crate::utils::parse_timestamp;
use chrono::{DateTime, Utc};

/// One row of the `documents` table. The body is the document as JSON text.
#[derive(Queryable, QueryableByName, Selectable, Insertable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentDB {
    pub collection: String,
    pub id: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentDB {
    pub fn new(collection: &str, id: &str, body: &Document, now: &str) -> Result<Self> {
        Ok(Self {
            collection: collection.to_string(),
            id: id.to_string(),
            body: serde_json::to_string(body)?,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    pub fn document(&self) -> Result<Document> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn updated_at(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.updated_at)
    }
}
