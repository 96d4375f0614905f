use std::time::Duration;

/// Rows queued per statement shape before a batch is flushed
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Minimum wall-clock gap between progress bar refreshes
pub const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// Bump when the staging snapshot layout changes
pub const STAGING_VERSION: u32 = 1;

/// Every Nth resolved author link is also recorded as an editor link
pub const DEFAULT_EDITOR_STRIDE: usize = 5;

/// Buffer size for reading the dump (dumps are multi-gigabyte)
pub const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Record type tags recognised in the dump
pub const AUTHOR_TAG: &str = "/type/author";
pub const EDITION_TAG: &str = "/type/edition";

/// Zero-based tab field positions in a dump line
pub const FIELD_TYPE: usize = 0;
pub const FIELD_KEY: usize = 1;
pub const FIELD_PAYLOAD: usize = 4;

pub const DEFAULT_AUDIENCES: &[&str] = &["children", "middle grade", "young adult", "adult", "general"];

pub const DEFAULT_USER_COUNT: u32 = 500;
pub const DEFAULT_MAX_NAME: usize = 25;
pub const DEFAULT_MAX_EMAIL: usize = 60;
pub const DEFAULT_MAX_PASSWORD: usize = 50;
pub const DEFAULT_MAX_RATINGS: u32 = 100;
pub const DEFAULT_MAX_COLLECTIONS: u32 = 10;
pub const DEFAULT_MAX_COLLECTION_SIZE: u32 = 50;
pub const DEFAULT_MAX_COLLECTION_NAME: usize = 50;
pub const DEFAULT_MAX_SESSIONS: u32 = 50;
pub const DEFAULT_MAX_SESSION_HOURS: u32 = 10;
pub const DEFAULT_MAX_FOLLOWING: u32 = 100;

pub const EMAIL_DOMAIN: &str = "gmail.com";

/// Markov chain orders used for names and for dictionary words
pub const NAME_CHAIN_ORDER: usize = 4;
pub const WORD_CHAIN_ORDER: usize = 2;
pub const MAX_GENERATED_WORD: usize = 24;

/// Users are created no later than this many seconds before "now"
pub const USER_CREATION_MARGIN_SECS: i64 = 100_000;
