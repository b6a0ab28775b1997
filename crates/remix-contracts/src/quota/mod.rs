mod limiter;
mod store;

pub use limiter::{
    QuotaCheck, QuotaSnapshot, RateLimiter, TokenUsage, DAILY_REQUEST_LIMIT, DAILY_TOKEN_LIMIT,
    TOKEN_KEY, USAGE_KEY, WINDOW_MS,
};
pub use store::{JsonFileStore, KvStore, MemoryStore};
