/// Entity type tag shared by every record this service writes.
pub const RECORD_TYPE: &str = "pool_snapshot";

pub const DEFAULT_POOL_ADDRESS: &str = "0xd0b53D9277642d899DF5C87A3966A349A798F224";
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

/// Ranges kept on each side of the current tick.
pub const DEFAULT_WINDOW_RADIUS: usize = 50;

// Blocks a record lives before the store expires it.
pub const DEFAULT_BTL_BLOCKS: u64 = 1_296_000;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SMALL_CHUNK_SIZE: usize = 10;
pub const PURGE_BATCH_SIZE: usize = 100;
pub const METADATA_FETCH_CONCURRENCY: usize = 10;

pub const DEFAULT_QUERY_LIMIT: usize = 1_000;
pub const TIME_RANGE_QUERY_LIMIT: usize = 10_000;
pub const STATS_QUERY_LIMIT: usize = 10_000;
pub const LATEST_LOOKBACK_LIMIT: usize = 100;
pub const DEFAULT_STATS_HOURS: u32 = 24;

pub const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 3_600;

/// Tag keys, as written on every record.
pub mod tags {
    pub const TYPE: &str = "type";
    pub const POOL_ADDRESS: &str = "poolAddress";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TICK_IDX: &str = "tickIdx";
    pub const PRICE_LOWER: &str = "priceLower";
    pub const PRICE_UPPER: &str = "priceUpper";
    pub const TOTAL_AMOUNT: &str = "totalAmount";
    pub const TOKEN0_AMOUNT: &str = "token0Amount";
    pub const TOKEN1_AMOUNT: &str = "token1Amount";
    pub const TOKEN0_SYMBOL: &str = "token0Symbol";
    pub const TOKEN1_SYMBOL: &str = "token1Symbol";
    pub const SEQUENCE: &str = "sequence";
    pub const TIMESTAMP_UNIX: &str = "timestampUnix";
}
