use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::mutation::{Mutation, MutationState};
use crate::api::{high_water_mark, ApiError, ProgressFn, UploadFile};
use crate::cache::{QueryClient, QueryError, QueryState, UserKeys};
use crate::models::{
    AvatarResponse, CreateUserRequest, PaginationParams, UpdateUserRequest, User, UserPage,
};
use crate::services::UserService;

/// User collection queries and mutations, wired to the shared query cache.
#[derive(Debug, Clone)]
pub struct UserHooks {
    users: UserService,
    cache: QueryClient,
    create: Mutation<User>,
    update: Mutation<User>,
    delete: Mutation<()>,
    avatar: Mutation<AvatarResponse>,
    password: Mutation<()>,
}

impl UserHooks {
    pub fn new(users: UserService, cache: QueryClient) -> Self {
        let options = cache.config().mutations;
        Self {
            users,
            create: Mutation::new("create_user", options),
            update: Mutation::new("update_user", options),
            delete: Mutation::new("delete_user", options),
            avatar: Mutation::new("upload_avatar", options),
            password: Mutation::new("change_password", options),
            cache,
        }
    }

    /// One page of users. Lists go stale sooner than single records.
    pub async fn users(&self, params: Option<PaginationParams>) -> Result<UserPage, QueryError> {
        let key = UserKeys::list(params.as_ref());
        let service = self.users.clone();
        let params = params.unwrap_or_default();
        self.cache
            .fetch_query(key, self.cache.config().collection(), move || {
                let service = service.clone();
                let params = params.clone();
                async move { service.list(&params).await?.into_page() }
            })
            .await
    }

    pub fn users_state(&self, params: Option<&PaginationParams>) -> QueryState<UserPage> {
        self.cache.query_state(&UserKeys::list(params))
    }

    /// One user by id. An empty id is a disabled query: `None`, no request.
    pub async fn user(&self, id: &str) -> Result<Option<User>, QueryError> {
        if id.is_empty() {
            debug!("Skipping user query without an id");
            return Ok(None);
        }
        let service = self.users.clone();
        let owned_id = id.to_string();
        self.cache
            .fetch_query(UserKeys::detail(id), self.cache.config().detail(), move || {
                let service = service.clone();
                let id = owned_id.clone();
                async move { service.get(&id).await?.into_result() }
            })
            .await
            .map(Some)
    }

    pub fn user_state(&self, id: &str) -> QueryState<User> {
        self.cache.query_state(&UserKeys::detail(id))
    }

    pub async fn create_user_async(&self, user: CreateUserRequest) -> Result<User, QueryError> {
        self.create
            .run(
                || self.users.create(&user),
                |_| {
                    self.cache.invalidate_queries(&UserKeys::lists());
                },
            )
            .await
    }

    pub fn create_user(&self, user: CreateUserRequest) -> JoinHandle<()> {
        let hooks = self.clone();
        tokio::spawn(async move {
            if let Err(e) = hooks.create_user_async(user).await {
                error!(error = %e, "Creating user failed");
            }
        })
    }

    pub async fn update_user_async(&self, id: &str, changes: UpdateUserRequest) -> Result<User, QueryError> {
        self.update
            .run(
                || self.users.update(id, &changes),
                |_| {
                    self.cache.invalidate_queries(&UserKeys::detail(id));
                    self.cache.invalidate_queries(&UserKeys::lists());
                },
            )
            .await
    }

    pub fn update_user(&self, id: impl Into<String>, changes: UpdateUserRequest) -> JoinHandle<()> {
        let hooks = self.clone();
        let id = id.into();
        tokio::spawn(async move {
            if let Err(e) = hooks.update_user_async(&id, changes).await {
                error!(user = %id, error = %e, "Updating user failed");
            }
        })
    }

    pub async fn delete_user_async(&self, id: &str) -> Result<(), QueryError> {
        self.delete
            .run(
                || self.users.delete(id),
                |_| {
                    self.cache.invalidate_queries(&UserKeys::lists());
                },
            )
            .await
    }

    pub fn delete_user(&self, id: impl Into<String>) -> JoinHandle<()> {
        let hooks = self.clone();
        let id = id.into();
        tokio::spawn(async move {
            if let Err(e) = hooks.delete_user_async(&id).await {
                error!(user = %id, error = %e, "Deleting user failed");
            }
        })
    }

    /// Upload a new avatar. In-memory files are resent on retry; a streamed
    /// file is sent once. Progress never goes backwards across attempts.
    pub async fn upload_avatar_async(
        &self,
        id: &str,
        file: UploadFile,
        on_progress: Option<ProgressFn>,
    ) -> Result<AvatarResponse, QueryError> {
        let retry = if file.try_clone().is_some() {
            self.cache.config().mutations.retry
        } else {
            0
        };
        let on_progress = on_progress.map(high_water_mark);
        let mut source = Some(file);
        self.avatar
            .run_with_retry(
                retry,
                || {
                    let attempt = source
                        .as_ref()
                        .and_then(UploadFile::try_clone)
                        .or_else(|| source.take());
                    let on_progress = on_progress.clone();
                    async move {
                        let file = attempt.ok_or_else(|| {
                            ApiError::Aborted("upload body was already sent".to_string())
                        })?;
                        self.users.upload_avatar(id, file, on_progress).await
                    }
                },
                |_| {
                    self.cache.invalidate_queries(&UserKeys::detail(id));
                },
            )
            .await
    }

    pub fn upload_avatar(
        &self,
        id: impl Into<String>,
        file: UploadFile,
        on_progress: Option<ProgressFn>,
    ) -> JoinHandle<()> {
        let hooks = self.clone();
        let id = id.into();
        tokio::spawn(async move {
            if let Err(e) = hooks.upload_avatar_async(&id, file, on_progress).await {
                error!(user = %id, error = %e, "Avatar upload failed");
            }
        })
    }

    /// Change a password. Nothing cached depends on it.
    pub async fn change_password_async(
        &self,
        id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), QueryError> {
        self.password
            .run(
                || self.users.change_password(id, current_password, new_password),
                |_| {},
            )
            .await
    }

    pub fn change_password(
        &self,
        id: impl Into<String>,
        current_password: String,
        new_password: String,
    ) -> JoinHandle<()> {
        let hooks = self.clone();
        let id = id.into();
        tokio::spawn(async move {
            if let Err(e) = hooks
                .change_password_async(&id, &current_password, &new_password)
                .await
            {
                error!(user = %id, error = %e, "Changing password failed");
            }
        })
    }

    pub fn create_state(&self) -> MutationState<User> {
        self.create.state()
    }

    pub fn update_state(&self) -> MutationState<User> {
        self.update.state()
    }

    pub fn delete_state(&self) -> MutationState<()> {
        self.delete.state()
    }

    pub fn avatar_state(&self) -> MutationState<AvatarResponse> {
        self.avatar.state()
    }

    pub fn password_state(&self) -> MutationState<()> {
        self.password.state()
    }
}
