use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::ApiError;

/// Error shared by every caller waiting on the same fetch.
pub type QueryError = Arc<ApiError>;

/// Lifecycle of a cache entry.
///
/// `Empty -> Loading -> Fresh | Error`, `Fresh -> Stale` once the staleness
/// window passes, `Stale -> Loading` on the next read, and any state back to
/// `Empty` on invalidation or eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Empty,
    Loading,
    Fresh,
    Stale,
    Error,
}

/// Snapshot of one query as seen by a consumer.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<QueryError>,
    /// A request for this key is running, possibly behind cached data.
    pub is_fetching: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Empty,
            data: None,
            error: None,
            is_fetching: false,
            updated_at: None,
        }
    }
}

impl<T> QueryState<T> {
    /// Nothing to show yet and a request is on its way.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading && self.data.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.updated_at.map(|at| (Utc::now() - at).num_minutes())
    }

    pub fn age_display(&self) -> String {
        let Some(minutes) = self.age_minutes() else {
            return "never".to_string();
        };
        if minutes < 1 {
            // Covers clock skew as well
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_age_display() {
        let mut state: QueryState<u8> = QueryState::default();
        assert_eq!(state.age_display(), "never");

        state.updated_at = Some(Utc::now());
        assert_eq!(state.age_display(), "just now");

        state.updated_at = Some(Utc::now() - Duration::minutes(5));
        assert_eq!(state.age_display(), "5m ago");

        state.updated_at = Some(Utc::now() - Duration::minutes(150));
        assert_eq!(state.age_display(), "2h ago");

        state.updated_at = Some(Utc::now() + Duration::minutes(10));
        assert_eq!(state.age_display(), "just now");
    }

    #[test]
    fn test_is_loading_only_without_data() {
        let mut state = QueryState {
            status: QueryStatus::Loading,
            data: None,
            error: None,
            is_fetching: true,
            updated_at: None,
        };
        assert!(state.is_loading());
        state.data = Some(1);
        assert!(!state.is_loading());
    }
}
