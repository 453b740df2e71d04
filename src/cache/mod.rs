//! Response cache.
//!
//! Keeps computed results keyed by the canonical form of the expression so
//! the proxy can answer repeated requests without contacting the
//! computation server. Entries past their freshness window are revalidated,
//! and served anyway if the server cannot be reached.

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, Freshness};
pub use key::CacheKey;
pub use store::{CacheStats, CacheStore, Lookup, LookupOptions};
