//! Rate limiting algorithms and state management.

mod memory;
mod redis;
mod shared;
mod sliding_window;
mod store;
mod token_bucket;

pub use self::redis::{RedisScripts, RedisStore, BUCKET_EXPIRY_SECS};
pub use memory::MemoryStore;
pub use shared::{AtomicScripts, BucketCall, SharedStore, WindowCall, DEFAULT_OPERATION_TIMEOUT};
pub use sliding_window::{SlidingWindowCounter, WindowParams};
pub use store::RateLimiterStore;
pub use token_bucket::{BucketParams, TokenBucket};
