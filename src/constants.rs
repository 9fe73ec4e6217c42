//! Default consensus constants

/// Maximum money supply: 21,000,000 coins in base units
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Base units per coin
pub const UNITS_PER_COIN: i64 = 100_000_000;

/// Maximum serialized block size: 1MB
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum nonce width in bytes
pub const MAX_NONCE_SIZE: usize = 16;

/// Blocks a coinbase output must be buried under before it can be spent
pub const COINBASE_MATURITY_DEPTH: u64 = 100;

/// Fixed block reward: 50 coins
pub const BLOCK_REWARD: i64 = 50 * UNITS_PER_COIN;

/// Minimum fee per transaction
pub const MINIMUM_TRANSACTION_FEE: i64 = 1_000;

/// Network identifier of the main network
pub const MAIN_NETWORK_ID: u32 = 0x4252_4142;

/// Orphan blocks held before the oldest are evicted
pub const MAX_ORPHAN_BLOCKS: usize = 100;

/// Fixed proof-of-work target
pub const TARGET_VALUE: [u8; 32] = [
    0x00, 0x00, 0x0f, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];
