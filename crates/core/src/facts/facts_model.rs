//! Immutable per-symbol facts.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Natural key of a price bar.
pub const PRICE_KEY_FIELDS: [&str; 2] = ["symbolId", "date"];
/// Natural key of a dividend.
pub const DIVIDEND_KEY_FIELDS: [&str; 2] = ["symbolId", "exDate"];
/// Natural key of a split.
pub const SPLIT_KEY_FIELDS: [&str; 2] = ["symbolId", "date"];

/// End-of-day price bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBar {
    pub symbol_id: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dividend {
    pub symbol_id: String,
    pub ex_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_date: Option<NaiveDate>,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Stock split; `ratio` is new shares per old share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub symbol_id: String,
    pub date: NaiveDate,
    pub ratio: Decimal,
}

pub(crate) trait Fact: Serialize {
    fn symbol_id(&self) -> &str;
}

impl Fact for PriceBar {
    fn symbol_id(&self) -> &str {
        &self.symbol_id
    }
}

impl Fact for Dividend {
    fn symbol_id(&self) -> &str {
        &self.symbol_id
    }
}

impl Fact for Split {
    fn symbol_id(&self) -> &str {
        &self.symbol_id
    }
}
