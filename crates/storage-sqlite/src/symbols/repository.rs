use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::debug;
use std::sync::Arc;

use securitymaster_core::errors::Result;
use securitymaster_core::symbols::{MergedSymbol, MergedSymbolRepositoryTrait, SlotLookup};

use super::model::{MergedSymbolDB, MergedSymbolSlotDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{is_unique_violation, IntoCore, StorageError};
use crate::schema::{merged_symbol_slots, merged_symbols};
use crate::utils::{chunk_for_sqlite, format_timestamp};

pub struct MergedSymbolRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl MergedSymbolRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    fn load_ids(&self, ids: &[String]) -> Result<Vec<MergedSymbol>> {
        let mut conn = get_connection(&self.pool)?;
        let mut symbols = Vec::with_capacity(ids.len());
        for chunk in chunk_for_sqlite(ids) {
            let rows = merged_symbols::table
                .filter(merged_symbols::id.eq_any(chunk))
                .select(MergedSymbolDB::as_select())
                .load::<MergedSymbolDB>(&mut conn)
                .into_core()?;
            for row in rows {
                symbols.push(row.into_domain()?);
            }
        }
        symbols.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(symbols)
    }
}

fn write_slot_index(
    conn: &mut SqliteConnection,
    symbol: &MergedSymbol,
) -> std::result::Result<(), StorageError> {
    diesel::delete(
        merged_symbol_slots::table.filter(merged_symbol_slots::merged_id.eq(&symbol.id)),
    )
    .execute(conn)?;
    let rows = MergedSymbolSlotDB::rows_for(symbol);
    if !rows.is_empty() {
        diesel::insert_into(merged_symbol_slots::table)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(())
}

#[async_trait]
impl MergedSymbolRepositoryTrait for MergedSymbolRepository {
    fn get_by_id(&self, symbol_id: &str) -> Result<Option<MergedSymbol>> {
        let mut conn = get_connection(&self.pool)?;
        merged_symbols::table
            .find(symbol_id)
            .select(MergedSymbolDB::as_select())
            .first::<MergedSymbolDB>(&mut conn)
            .optional()
            .into_core()?
            .map(MergedSymbolDB::into_domain)
            .transpose()
    }

    fn find_by_slot(&self, lookup: &SlotLookup) -> Result<Vec<MergedSymbol>> {
        let ids: Vec<String> = {
            let mut conn = get_connection(&self.pool)?;
            let query = merged_symbol_slots::table
                .select(merged_symbol_slots::merged_id)
                .distinct()
                .into_boxed();
            let query = match lookup {
                SlotLookup::RecordId(value) => {
                    query.filter(merged_symbol_slots::record_id.eq(value.clone()))
                }
                SlotLookup::Ticker(value) => {
                    query.filter(merged_symbol_slots::ticker.eq(value.clone()))
                }
                SlotLookup::DisplayName(value) => {
                    query.filter(merged_symbol_slots::display_name.eq(value.clone()))
                }
            };
            query.load::<String>(&mut conn).into_core()?
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.load_ids(&ids)
    }

    fn list(&self) -> Result<Vec<MergedSymbol>> {
        let mut conn = get_connection(&self.pool)?;
        merged_symbols::table
            .order((merged_symbols::created_at.asc(), merged_symbols::id.asc()))
            .select(MergedSymbolDB::as_select())
            .load::<MergedSymbolDB>(&mut conn)
            .into_core()?
            .into_iter()
            .map(MergedSymbolDB::into_domain)
            .collect()
    }

    fn list_refetched_since(&self, since: DateTime<Utc>) -> Result<Vec<MergedSymbol>> {
        let mut conn = get_connection(&self.pool)?;
        merged_symbols::table
            .filter(merged_symbols::last_refetch_at.ge(format_timestamp(since)))
            .order((merged_symbols::last_refetch_at.asc(), merged_symbols::id.asc()))
            .select(MergedSymbolDB::as_select())
            .load::<MergedSymbolDB>(&mut conn)
            .into_core()?
            .into_iter()
            .map(MergedSymbolDB::into_domain)
            .collect()
    }

    async fn insert(&self, symbol: &MergedSymbol) -> Result<bool> {
        let row = MergedSymbolDB::from_domain(symbol)?;
        let symbol = symbol.clone();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                match diesel::insert_into(merged_symbols::table)
                    .values(&row)
                    .execute(conn)
                {
                    Ok(_) => {}
                    Err(e) if is_unique_violation(&e) => {
                        debug!("Merged symbol id '{}' is already taken", row.id);
                        return Ok(false);
                    }
                    Err(e) => return Err(StorageError::from(e).into()),
                }
                write_slot_index(conn, &symbol)?;
                Ok(true)
            })
            .await
    }

    async fn update(&self, symbol: &MergedSymbol, expected_version: i64) -> Result<bool> {
        let mut row = MergedSymbolDB::from_domain(symbol)?;
        row.version = expected_version + 1;
        let symbol = symbol.clone();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let changed = diesel::update(
                    merged_symbols::table
                        .filter(merged_symbols::id.eq(&row.id))
                        .filter(merged_symbols::version.eq(expected_version)),
                )
                .set(&row)
                .execute(conn)
                .map_err(StorageError::from)?;
                if changed == 0 {
                    debug!(
                        "Version guard failed for '{}' at version {}",
                        row.id, expected_version
                    );
                    return Ok(false);
                }
                write_slot_index(conn, &symbol)?;
                Ok(true)
            })
            .await
    }
}
