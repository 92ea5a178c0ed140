//! Data hooks.
//!
//! Each hook pairs a service call with a cache key and a policy. Queries
//! read through the [`QueryClient`](crate::cache::QueryClient); mutations
//! record their outcome in a [`Mutation`] and invalidate the key families
//! their writes affect.

pub mod auth;
pub mod mutation;
pub mod users;

pub use auth::AuthHooks;
pub use mutation::{Mutation, MutationState, MutationStatus};
pub use users::UserHooks;
