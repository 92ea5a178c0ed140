use tracing::debug;

use crate::api::{
    resource_path, ApiClient, ApiError, ApiResponse, PaginatedResponse, ProgressFn, UploadFile,
};
use crate::models::{
    AvatarResponse, ChangePasswordRequest, CreateUserRequest, PaginationParams, UpdateUserRequest,
    User,
};

/// CRUD over `/users`.
#[derive(Debug, Clone)]
pub struct UserService {
    api: ApiClient,
}

impl UserService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self, params: &PaginationParams) -> Result<PaginatedResponse<User>, ApiError> {
        debug!(?params, "Listing users");
        self.api.get_paginated("/users", params).await
    }

    pub async fn get(&self, id: &str) -> Result<ApiResponse<User>, ApiError> {
        self.api.get(&resource_path(&["users", id])?).await
    }

    pub async fn create(&self, user: &CreateUserRequest) -> Result<ApiResponse<User>, ApiError> {
        self.api.post("/users", user).await
    }

    pub async fn update(&self, id: &str, changes: &UpdateUserRequest) -> Result<ApiResponse<User>, ApiError> {
        self.api.put(&resource_path(&["users", id])?, changes).await
    }

    pub async fn delete(&self, id: &str) -> Result<ApiResponse<()>, ApiError> {
        self.api.delete(&resource_path(&["users", id])?).await
    }

    pub async fn upload_avatar(
        &self,
        id: &str,
        file: UploadFile,
        on_progress: Option<ProgressFn>,
    ) -> Result<ApiResponse<AvatarResponse>, ApiError> {
        let path = resource_path(&["users", id, "avatar"])?;
        self.api.upload(&path, file, on_progress).await
    }

    pub async fn change_password(
        &self,
        id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<ApiResponse<()>, ApiError> {
        let body = ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        let path = resource_path(&["users", id, "change-password"])?;
        self.api.post(&path, &body).await
    }
}
