pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_ACTOR: &str = "system";
pub const SNAPSHOT_VERSION: u32 = 1;
pub const DEFAULT_DIFFICULTY: usize = 2;
pub const DEFAULT_SEAL_THRESHOLD: usize = 10;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
pub const TRANSACTION_ID_BYTES: usize = 16;
