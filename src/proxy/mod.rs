//! Caching proxy.
//!
//! [`ConnectionDispatcher`] accepts client connections and runs one
//! [`Session`] task per connection. Each session answers requests through
//! the shared [`CacheStore`](crate::cache::CacheStore), forwarding misses
//! and stale entries to the computation server.
//!
//! ## Example
//!
//! ```ignore
//! use calcache::proxy::ConnectionDispatcher;
//! use calcache::Config;
//!
//! #[tokio::main]
//! async fn main() -> calcache::CalcacheResult<()> {
//!     let dispatcher = ConnectionDispatcher::bind(&Config::load_or_default()).await?;
//!     dispatcher.run().await
//! }
//! ```

mod dispatcher;
mod session;

pub use dispatcher::ConnectionDispatcher;
pub use session::{CloseReason, Session, SessionState};
