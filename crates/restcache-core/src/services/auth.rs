use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, ApiResponse};
use crate::auth::SessionStore;
use crate::models::{AuthResponse, CreateUserRequest, LoginRequest, LoginResponse, TokenResponse};

/// Authentication endpoints plus the session-token side effects that go with them.
#[derive(Clone)]
pub struct AuthService {
    api: ApiClient,
    session: Arc<dyn SessionStore>,
}

impl AuthService {
    pub fn new(api: ApiClient, session: Arc<dyn SessionStore>) -> Self {
        Self { api, session }
    }

    /// Store the token if the envelope succeeded and carried a non-empty one.
    /// A failed envelope leaves any existing token alone.
    fn persist_token(&self, success: bool, token: Option<&str>) {
        let Some(token) = token.filter(|t| success && !t.is_empty()) else {
            return;
        };
        if let Err(e) = self.session.set_token(token) {
            warn!(error = %e, "Failed to store session token");
        }
    }

    pub async fn login(&self, credentials: &LoginRequest) -> Result<ApiResponse<LoginResponse>, ApiError> {
        let response: ApiResponse<LoginResponse> = self.api.post("/auth/login", credentials).await?;
        self.persist_token(response.success, response.data.as_ref().map(|d| d.token.as_str()));
        if response.success {
            info!(email = %credentials.email, "Logged in");
        }
        Ok(response)
    }

    pub async fn register(&self, user: &CreateUserRequest) -> Result<ApiResponse<LoginResponse>, ApiError> {
        let response: ApiResponse<LoginResponse> = self.api.post("/auth/register", user).await?;
        self.persist_token(response.success, response.data.as_ref().map(|d| d.token.as_str()));
        if response.success {
            info!(email = %user.email, "Registered");
        }
        Ok(response)
    }

    /// Sign out. Always succeeds: the remote call is best-effort, the local
    /// token is removed no matter what it returned.
    pub async fn logout(&self) -> ApiResponse<()> {
        if let Err(e) = self.api.post_empty::<serde_json::Value>("/auth/logout").await {
            debug!(error = %e, "Ignoring logout failure");
        }
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "Failed to clear session token");
        }
        info!("Logged out");
        ApiResponse::ok(())
    }

    pub async fn current_user(&self) -> Result<ApiResponse<AuthResponse>, ApiError> {
        self.api.get("/auth/me").await
    }

    pub async fn refresh_token(&self) -> Result<ApiResponse<TokenResponse>, ApiError> {
        let response: ApiResponse<TokenResponse> = self.api.post_empty("/auth/refresh").await?;
        self.persist_token(response.success, response.data.as_ref().map(|d| d.token.as_str()));
        Ok(response)
    }

    /// Whether the current session is usable. Transport failures count as `false`.
    pub async fn validate_token(&self) -> bool {
        match self.api.get::<serde_json::Value>("/auth/validate").await {
            Ok(response) => response.success,
            Err(e) => {
                debug!(error = %e, "Token validation failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionStore;
    use httpmock::MockServer;
    use serde_json::json;
    use std::time::Duration;

    fn user_json() -> serde_json::Value {
        json!({
            "id": "u1",
            "email": "ada@example.com",
            "name": "Ada",
            "role": "user",
            "createdAt": "2024-01-02T03:04:05Z",
            "updatedAt": "2024-01-02T03:04:05Z"
        })
    }

    fn service(server: &MockServer) -> (AuthService, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let api = ApiClient::new(&server.base_url(), Duration::from_secs(5), store.clone()).unwrap();
        (AuthService::new(api, store.clone()), store)
    }

    fn credentials() -> LoginRequest {
        LoginRequest {
            email: "ada@example.com".into(),
            password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/auth/login")
                .json_body(json!({"email": "ada@example.com", "password": "pw"}));
            then.status(200)
                .json_body(json!({"success": true, "data": {"user": user_json(), "token": "tok-1"}}));
        });

        let (auth, store) = service(&server);
        let response = auth.login(&credentials()).await.unwrap();
        mock.assert();
        assert!(response.success);
        assert_eq!(store.token().as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/auth/login");
            then.status(200).json_body(json!({
                "success": false,
                "data": {"user": user_json(), "token": "should-not-stick"},
                "message": "Invalid credentials"
            }));
        });

        let (auth, store) = service(&server);
        store.set_token("old").unwrap();
        let response = auth.login(&credentials()).await.unwrap();
        assert!(!response.success);
        assert_eq!(store.token().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_transport_failure_on_login_propagates() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/auth/login");
            then.status(503);
        });

        let (auth, store) = service(&server);
        let err = auth.login(&credentials()).await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));
        assert_eq!(store.token(), None);
    }

    #[tokio::test]
    async fn test_register_and_refresh_store_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/auth/register");
            then.status(200)
                .json_body(json!({"success": true, "data": {"user": user_json(), "token": "reg"}}));
        });
        server.mock(|when, then| {
            when.method("POST").path("/auth/refresh").header("authorization", "Bearer reg");
            then.status(200).json_body(json!({"success": true, "data": {"token": "fresh"}}));
        });

        let (auth, store) = service(&server);
        let req = CreateUserRequest {
            email: "ada@example.com".into(),
            name: "Ada".into(),
            password: "pw".into(),
        };
        auth.register(&req).await.unwrap();
        assert_eq!(store.token().as_deref(), Some("reg"));

        auth.refresh_token().await.unwrap();
        assert_eq!(store.token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_logout_clears_token_even_when_server_fails() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST").path("/auth/logout");
            then.status(500);
        });

        let (auth, store) = service(&server);
        store.set_token("tok").unwrap();
        let response = auth.logout().await;
        mock.assert();
        assert!(response.success);
        assert_eq!(store.token(), None);
    }

    #[tokio::test]
    async fn test_logout_clears_token_when_unreachable() {
        let store = Arc::new(MemorySessionStore::new());
        store.set_token("tok").unwrap();
        // Port 9 (discard) is not listening on test machines
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1), store.clone()).unwrap();
        let auth = AuthService::new(api, store.clone());

        assert!(auth.logout().await.success);
        assert_eq!(store.token(), None);
    }

    #[tokio::test]
    async fn test_validate_token_collapses_failures_to_false() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/auth/validate");
            then.status(500);
        });
        let (auth, _) = service(&server);
        assert!(!auth.validate_token().await);
    }

    #[tokio::test]
    async fn test_validate_token_reports_envelope_success() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/auth/validate");
            then.status(200).json_body(json!({"success": true, "data": null}));
        });
        let (auth, _) = service(&server);
        assert!(auth.validate_token().await);
    }

    #[tokio::test]
    async fn test_current_user() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/auth/me");
            then.status(200).json_body(json!({"success": true, "data": {"user": user_json()}}));
        });
        let (auth, _) = service(&server);
        let me = auth.current_user().await.unwrap().into_result().unwrap();
        assert_eq!(me.user.id, "u1");
    }
}
