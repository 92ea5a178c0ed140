//! restcache core library.
//!
//! A typed client for a REST backend that wraps every response in a
//! `{success, data, message?}` envelope, with a cached data layer on top:
//!
//! - `api`: HTTP transport, envelope types, upload progress
//! - `auth`: session token storage backends
//! - `models`: wire records
//! - `services`: one service per entity, mapping operations onto endpoints
//! - `cache`: query keys and the query cache (staleness, retention, retry, dedup)
//! - `hooks`: queries and mutations that keep the cache consistent with writes
//! - `config`: on-disk configuration and environment overrides
//! - `app`: wiring of all the above around one session and one cache

pub mod api;
pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod hooks;
pub mod models;
pub mod services;
pub mod utils;

pub use app::App;
pub use config::{Config, SessionBackend};
