//! Database models for merged symbols and their slot index.

use diesel::prelude::*;
use std::collections::BTreeMap;

use securitymaster_core::symbols::{MergedSymbol, SourceRecord};
use securitymaster_core::Result;

use crate::utils::{format_timestamp, parse_timestamp};

/// Database model for merged symbols. Slots and the main record are stored as
/// JSON text; `merged_symbol_slots` indexes the populated slots.
#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::merged_symbols)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct MergedSymbolDB {
    pub id: String,
    pub main_source: String,
    pub main_record: String,
    pub slots: String,
    pub last_update_at: String,
    pub last_refetch_at: Option<String>,
    pub version: i64,
    pub schema_version: i32,
    pub created_at: String,
}

/// One populated slot of a merged symbol.
#[derive(Queryable, Insertable, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::merged_symbol_slots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MergedSymbolSlotDB {
    pub merged_id: String,
    pub provider: String,
    pub record_id: String,
    pub local_id: String,
    pub ticker: String,
    pub display_name: Option<String>,
    pub enabled: bool,
}

impl MergedSymbolDB {
    pub fn from_domain(symbol: &MergedSymbol) -> Result<Self> {
        Ok(Self {
            id: symbol.id.clone(),
            main_source: symbol.main_source.clone(),
            main_record: serde_json::to_string(&symbol.main_record)?,
            slots: serde_json::to_string(&symbol.slots)?,
            last_update_at: format_timestamp(symbol.last_update_at),
            last_refetch_at: symbol.last_refetch_at.map(format_timestamp),
            version: symbol.version,
            schema_version: symbol.schema_version,
            created_at: format_timestamp(symbol.created_at),
        })
    }

    pub fn into_domain(self) -> Result<MergedSymbol> {
        let slots: BTreeMap<String, Option<SourceRecord>> = serde_json::from_str(&self.slots)?;
        Ok(MergedSymbol {
            id: self.id,
            slots,
            main_source: self.main_source,
            main_record: serde_json::from_str(&self.main_record)?,
            last_update_at: parse_timestamp(&self.last_update_at)?,
            last_refetch_at: self
                .last_refetch_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            version: self.version,
            schema_version: self.schema_version,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl MergedSymbolSlotDB {
    /// Index rows for every populated slot of `symbol`.
    pub fn rows_for(symbol: &MergedSymbol) -> Vec<Self> {
        symbol
            .populated()
            .map(|(provider, record)| Self {
                merged_id: symbol.id.clone(),
                provider: provider.to_string(),
                record_id: record.id.clone(),
                local_id: record.local_id.clone(),
                ticker: record.ticker.clone(),
                display_name: record.display_name.clone(),
                enabled: record.is_enabled(),
            })
            .collect()
    }
}
