use tokio::task::JoinHandle;
use tracing::{error, info};

use super::mutation::{Mutation, MutationState};
use crate::api::{ApiError, ApiResponse};
use crate::cache::{AuthKeys, QueryClient, QueryError, QueryState};
use crate::models::{AuthResponse, CreateUserRequest, LoginRequest, LoginResponse, TokenResponse, User};
use crate::services::AuthService;

/// Session queries and mutations, wired to the shared query cache.
#[derive(Clone)]
pub struct AuthHooks {
    auth: AuthService,
    cache: QueryClient,
    login: Mutation<LoginResponse>,
    register: Mutation<LoginResponse>,
    logout: Mutation<()>,
    refresh: Mutation<TokenResponse>,
}

impl AuthHooks {
    pub fn new(auth: AuthService, cache: QueryClient) -> Self {
        let options = cache.config().mutations;
        Self {
            auth,
            login: Mutation::new("login", options),
            register: Mutation::new("register", options),
            logout: Mutation::new("logout", options),
            refresh: Mutation::new("refresh_token", options),
            cache,
        }
    }

    /// The signed-in user. Never retried: an invalid session fails at once.
    pub async fn current_user(&self) -> Result<User, QueryError> {
        let auth = self.auth.clone();
        self.cache
            .fetch_query(AuthKeys::current_user(), self.cache.config().session(), move || {
                let auth = auth.clone();
                async move { current_user_from(auth.current_user().await?) }
            })
            .await
    }

    pub fn current_user_state(&self) -> QueryState<User> {
        self.cache.query_state(&AuthKeys::current_user())
    }

    /// Ask the server whether the stored token is still accepted. Not cached.
    pub async fn validate_token(&self) -> bool {
        self.auth.validate_token().await
    }

    /// True once the current-user query holds a user.
    pub fn is_authenticated(&self) -> bool {
        self.current_user_state().data.is_some()
    }

    pub async fn login_async(&self, credentials: LoginRequest) -> Result<LoginResponse, QueryError> {
        let response = self
            .login
            .run(|| self.auth.login(&credentials), |_| self.invalidate_session())
            .await?;
        info!(user = %response.user.id, "Session started");
        Ok(response)
    }

    pub fn login(&self, credentials: LoginRequest) -> JoinHandle<()> {
        let hooks = self.clone();
        tokio::spawn(async move {
            if let Err(e) = hooks.login_async(credentials).await {
                error!(error = %e, "Login failed");
            }
        })
    }

    pub async fn register_async(&self, user: CreateUserRequest) -> Result<LoginResponse, QueryError> {
        self.register
            .run(|| self.auth.register(&user), |_| self.invalidate_session())
            .await
    }

    pub fn register(&self, user: CreateUserRequest) -> JoinHandle<()> {
        let hooks = self.clone();
        tokio::spawn(async move {
            if let Err(e) = hooks.register_async(user).await {
                error!(error = %e, "Registration failed");
            }
        })
    }

    /// Sign out and drop every cached query, whatever the server said.
    pub async fn logout_async(&self) -> Result<(), QueryError> {
        self.logout
            .run(
                || async move {
                    let response = self.auth.logout().await;
                    self.cache.clear();
                    Ok::<_, ApiError>(response)
                },
                |_| {},
            )
            .await
    }

    pub fn logout(&self) -> JoinHandle<()> {
        let hooks = self.clone();
        tokio::spawn(async move {
            if let Err(e) = hooks.logout_async().await {
                error!(error = %e, "Logout failed");
            }
        })
    }

    pub async fn refresh_token_async(&self) -> Result<TokenResponse, QueryError> {
        self.refresh
            .run(|| self.auth.refresh_token(), |_| self.invalidate_session())
            .await
    }

    pub fn refresh_token(&self) -> JoinHandle<()> {
        let hooks = self.clone();
        tokio::spawn(async move {
            if let Err(e) = hooks.refresh_token_async().await {
                error!(error = %e, "Token refresh failed");
            }
        })
    }

    pub fn login_state(&self) -> MutationState<LoginResponse> {
        self.login.state()
    }

    pub fn register_state(&self) -> MutationState<LoginResponse> {
        self.register.state()
    }

    pub fn logout_state(&self) -> MutationState<()> {
        self.logout.state()
    }

    pub fn refresh_state(&self) -> MutationState<TokenResponse> {
        self.refresh.state()
    }

    fn invalidate_session(&self) {
        self.cache.invalidate_queries(&AuthKeys::current_user());
    }
}

fn current_user_from(response: ApiResponse<AuthResponse>) -> Result<User, ApiError> {
    if !response.success {
        return Err(ApiError::Rejected(
            response
                .message
                .unwrap_or_else(|| "Failed to get current user".to_string()),
        ));
    }
    response.into_result().map(|r| r.user)
}
