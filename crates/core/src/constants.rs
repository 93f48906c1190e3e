/// Schema version stamped on stored source records and merged symbols.
pub const SCHEMA_VERSION: i32 = 1;

/// Above this many new records the sync engine scans the whole collection
/// instead of issuing a membership query for every identity value.
pub const SELF_FETCH_SCAN_THRESHOLD: usize = 1_000;

/// Default wall-clock budget for one sync run, in seconds.
pub const DEFAULT_RUN_BUDGET_SECS: u64 = 110;

/// How many times a merge step is retried after losing a version race.
pub const MERGE_CONFLICT_RETRIES: usize = 3;

/// Document field holding the stored document key.
pub const DOCUMENT_ID_FIELD: &str = "id";

/// Document field holding the enabled flag of a source record.
pub const ENABLED_FIELD: &str = "enabled";

/// Prefix of the per-provider symbol collections.
pub const SOURCE_COLLECTION_PREFIX: &str = "symbols_";

/// Collection holding run bookkeeping such as merge watermarks.
pub const SYNC_STATE_COLLECTION: &str = "sync_state";

/// Fact collections written with the upsert-only variant.
pub const PRICES_COLLECTION: &str = "prices";
pub const DIVIDENDS_COLLECTION: &str = "dividends";
pub const SPLITS_COLLECTION: &str = "splits";

/// Separator used when an id is derived from a composite key.
pub const KEY_SEPARATOR: &str = "|";
