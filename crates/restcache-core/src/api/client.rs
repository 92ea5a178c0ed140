//! API client for the backend REST API.
//!
//! `ApiClient` is the only place that touches HTTP. It attaches the session
//! token, maps failure statuses to `ApiError`, and decodes the response
//! envelope. Retries belong to the query cache, not here.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::SessionStore;

use super::{ApiError, ApiResponse, PaginatedResponse, ProgressFn, UploadFile};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Multipart field name the upload endpoints expect.
const UPLOAD_FIELD: &str = "file";

/// Base whose path encoder is borrowed by [`resource_path`].
const PATH_ENCODING_BASE: &str = "http://localhost/";

/// Join path segments into an API path, percent-encoding each one.
///
/// Segments may carry caller-supplied ids, so `/`, `\`, `?` and `#` are
/// escaped and a segment that is empty, `.` or `..` is refused.
pub fn resource_path(segments: &[&str]) -> Result<String, ApiError> {
    let mut url = Url::parse(PATH_ENCODING_BASE)?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| ApiError::InvalidPath(PATH_ENCODING_BASE.to_string()))?;
        for segment in segments {
            if matches!(*segment, "" | "." | "..") {
                return Err(ApiError::InvalidPath(segment.to_string()));
            }
            path.push(segment);
        }
    }
    Ok(url.path().to_string())
}

/// REST client bound to one API base URL and one session store.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a new API client
    pub fn new(
        base_url: &str,
        timeout: Duration,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("restcache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Session store the token is read from.
    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(path)?;
        debug!(%method, %url, "Sending request");
        let builder = self.client.request(method, url);
        Ok(match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let url = response.url().clone();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %url, "Request failed");
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let url = response.url().clone();
        let response = Self::check_response(response).await?;

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(%url, error = %e, "Failed to parse response envelope");
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    // ===== Verbs =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.send(self.request(Method::GET, path)?.query(query)).await
    }

    /// GET a collection endpoint whose envelope carries a pagination block.
    pub async fn get_paginated<T, Q>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<PaginatedResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.send(self.request(Method::GET, path)?.query(query)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    /// POST without a request body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.send(self.request(Method::POST, path)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(self.request(Method::PUT, path)?.json(body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(self.request(Method::PATCH, path)?.json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    /// POST a file as `multipart/form-data`, reporting progress as a percentage.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        file: UploadFile,
        on_progress: Option<ProgressFn>,
    ) -> Result<ApiResponse<T>, ApiError> {
        debug!(path, file = file.file_name(), size = ?file.len(), "Uploading file");
        let part = file.into_part(on_progress)?;
        let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);
        self.send(self.request(Method::POST, path)?.multipart(form)).await
    }
}
