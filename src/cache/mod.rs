//! Model response caching with TTL, optional LRU bound, and JSON persistence.

pub mod fingerprint;
pub mod response_cache;

pub use fingerprint::{canonical_json, fingerprint, fingerprint_of};
pub use response_cache::{CacheDocument, CacheEntry, CacheStats, ResponseCache};
