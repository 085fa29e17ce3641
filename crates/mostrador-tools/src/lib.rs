//! Mostrador Tools - typed, cache-aware tool invocation
//!
//! External resources (warehouse SQL, catalogue back-end, knowledge base,
//! messaging, blob storage) are exposed as operations with declared schemas.
//! The [`ToolRegistry`] validates arguments, serves repeated reads from a
//! TTL cache, retries transient failures and keeps an invocation log.

pub mod cache;
pub mod canonical;
pub mod descriptor;
pub mod error;
pub mod log;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod toolkits;

pub use cache::ToolCache;
pub use canonical::{arg_hash, cache_key, canonicalize};
pub use descriptor::{CachePolicy, OpRef, RetryPolicy, ToolDescriptor};
pub use error::ToolError;
pub use registry::{render_value, InvocationCtx, InvocationOutcome, InvocationState, ToolHandler, ToolRegistry, Toolkit};
pub use toolkits::build_registry;
