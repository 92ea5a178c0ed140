//! Wiring of the transport, services, query cache and hooks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::api::ApiClient;
use crate::auth::SessionStore;
use crate::cache::{QueryClient, QueryConfig};
use crate::config::Config;
use crate::hooks::{AuthHooks, UserHooks};
use crate::services::{AuthService, UserService};

/// Everything a front end needs, sharing one transport, session store and
/// query cache.
#[derive(Clone)]
pub struct App {
    pub api: ApiClient,
    pub cache: QueryClient,
    pub auth: AuthHooks,
    pub users: UserHooks,
}

impl App {
    /// Build from configuration, opening the configured session backend.
    pub fn from_config(config: &Config) -> Result<Self> {
        let session = config.session_store()?;
        Self::new(&config.api_url, config.timeout(), config.query_config(), session)
    }

    pub fn new(
        api_url: &str,
        timeout: Duration,
        query_config: QueryConfig,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let api = ApiClient::new(api_url, timeout, Arc::clone(&session))
            .with_context(|| format!("Invalid API URL: {}", api_url))?;
        let cache = QueryClient::new(query_config);
        let auth = AuthHooks::new(AuthService::new(api.clone(), session), cache.clone());
        let users = UserHooks::new(UserService::new(api.clone()), cache.clone());
        Ok(Self {
            api,
            cache,
            auth,
            users,
        })
    }
}
