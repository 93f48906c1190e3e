//! Facts module - prices, dividends and splits keyed by natural keys.

mod facts_model;
mod facts_service;

pub use facts_model::{
    Dividend, PriceBar, Split, DIVIDEND_KEY_FIELDS, PRICE_KEY_FIELDS, SPLIT_KEY_FIELDS,
};
pub use facts_service::FactSyncService;
