//! Query cache.
//!
//! Server data is cached per [`QueryKey`] with a staleness window, a
//! retention window and a retry policy. [`QueryClient`] is the shared store;
//! the key registry in [`keys`] is the only place keys are built.

pub mod client;
pub mod config;
pub mod keys;
pub(crate) mod retry;
pub mod state;

pub use client::QueryClient;
pub use config::{MutationOptions, QueryConfig, QueryOptions, QuerySettings};
pub use keys::{AuthKeys, QueryKey, UserKeys};
pub use state::{QueryError, QueryState, QueryStatus};
