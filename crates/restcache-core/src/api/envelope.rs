//! Response envelope types shared by every endpoint.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::ApiError;

/// The `{success, data, message?}` wrapper around every response body.
///
/// `data` is only decoded as `T` when `success` is true, so a failed envelope
/// carrying a placeholder `data` still surfaces its message. Use
/// [`ApiResponse::into_result`] to turn an application-level failure into an
/// `ApiError::Rejected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", bound(deserialize = "T: DeserializeOwned"))]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Wire form of both envelopes before the payload type is applied.
#[derive(Deserialize)]
struct RawEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

impl RawEnvelope {
    fn payload<T: DeserializeOwned>(&mut self) -> Result<Option<T>, serde_json::Error> {
        match self.data.take() {
            Some(data) if self.success => serde_json::from_value(data).map(Some),
            _ => Ok(None),
        }
    }
}

impl<T: DeserializeOwned> TryFrom<RawEnvelope> for ApiResponse<T> {
    type Error = serde_json::Error;

    fn try_from(mut raw: RawEnvelope) -> Result<Self, Self::Error> {
        let data = raw.payload()?;
        Ok(Self {
            success: raw.success,
            data,
            message: raw.message,
        })
    }
}

impl<T: DeserializeOwned> TryFrom<RawEnvelope> for PaginatedResponse<T> {
    type Error = serde_json::Error;

    fn try_from(mut raw: RawEnvelope) -> Result<Self, Self::Error> {
        let data = raw.payload()?;
        Ok(Self {
            success: raw.success,
            data,
            message: raw.message,
            pagination: raw.pagination,
        })
    }
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Payload of a successful envelope. Always `None` when `success` is false.
    pub fn data(&self) -> Option<&T> {
        if self.success {
            self.data.as_ref()
        } else {
            None
        }
    }

    fn rejection(message: Option<String>) -> ApiError {
        ApiError::Rejected(message.unwrap_or_else(|| "request was not successful".to_string()))
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Unwrap the payload, treating `success: false` as authoritative.
    ///
    /// A `null` or missing payload is accepted when `T` itself can be decoded
    /// from `null` (for example `()`).
    pub fn into_result(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(Self::rejection(self.message));
        }
        match self.data {
            Some(data) => Ok(data),
            None => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| ApiError::InvalidResponse("envelope has no data".to_string())),
        }
    }
}

/// Pagination block attached to collection responses.
///
/// `total_pages` is derived from `total` and `limit` whenever `limit > 0`,
/// regardless of what the server sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPagination")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
}

#[derive(Deserialize)]
struct RawPagination {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    limit: u32,
    #[serde(default)]
    total: u64,
    #[serde(rename = "totalPages", default)]
    total_pages: u64,
}

impl From<RawPagination> for Pagination {
    fn from(raw: RawPagination) -> Self {
        let mut pagination = Pagination::new(raw.page, raw.limit, raw.total);
        if raw.limit == 0 {
            pagination.total_pages = raw.total_pages;
        }
        pagination
    }
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let total_pages = if limit > 0 {
            total.div_ceil(u64::from(limit))
        } else {
            0
        };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages
    }
}

/// Envelope of a collection endpoint: a list plus its pagination block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", bound(deserialize = "T: DeserializeOwned"))]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub data: Option<Vec<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// One page of a collection, as handed to callers once the envelope is checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Option<Pagination>,
}

impl<T> PaginatedResponse<T> {
    pub fn into_page(self) -> Result<Page<T>, ApiError> {
        if !self.success {
            return Err(ApiResponse::<T>::rejection(self.message));
        }
        Ok(Page {
            items: self.data.unwrap_or_default(),
            pagination: self.pagination,
        })
    }
}
