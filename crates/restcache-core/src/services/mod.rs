//! Entity services mapping domain operations onto REST calls.
//!
//! Services return the decoded envelope and never touch the query cache;
//! deciding what to invalidate is the job of the hooks layer.

pub mod auth;
pub mod user;

pub use auth::AuthService;
pub use user::UserService;
