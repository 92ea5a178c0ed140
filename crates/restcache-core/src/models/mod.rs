//! Wire records exchanged with the REST API.
//!
//! - `User`, `Role`: the user entity
//! - User requests: `CreateUserRequest`, `UpdateUserRequest`, `ChangePasswordRequest`
//! - `PaginationParams`, `SortOrder`: list query parameters
//! - Auth payloads: `LoginRequest`, `LoginResponse`, `AuthResponse`, `TokenResponse`

pub mod auth;
pub mod user;

pub use auth::{AuthResponse, LoginRequest, LoginResponse, TokenResponse};
pub use user::{
    AvatarResponse, ChangePasswordRequest, CreateUserRequest, PaginationParams, Role, SortOrder,
    UpdateUserRequest, User, UserPage,
};
