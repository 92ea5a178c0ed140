//! REST transport layer.
//!
//! This module provides the `ApiClient` for talking to the backend REST API.
//! Every response body is wrapped in the uniform `{success, data, message?}`
//! envelope, which is decoded into `ApiResponse<T>`.
//!
//! The session token is read from a `SessionStore` on every request and sent
//! as a bearer token.

pub mod client;
pub mod envelope;
pub mod error;
pub mod upload;

pub use client::{resource_path, ApiClient};
pub use envelope::{ApiResponse, Page, PaginatedResponse, Pagination};
pub use error::ApiError;
pub use upload::{high_water_mark, ProgressFn, ProgressTracker, UploadFile};
