//! Query cache configuration.
//!
//! Staleness, retention and retry policy are plain values here rather than
//! hidden defaults, so each query states its own contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// Default values for cache configuration
const DEFAULT_STALE_TIME_SECS: u64 = 5 * 60;
const DEFAULT_LIST_STALE_TIME_SECS: u64 = 2 * 60;
const DEFAULT_GC_TIME_SECS: u64 = 10 * 60;
const DEFAULT_QUERY_RETRY: u32 = 1;
const DEFAULT_MUTATION_RETRY: u32 = 1;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Policy for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Age after which cached data is served but refreshed in the background.
    pub stale_time: Duration,
    /// Time without access after which the entry is dropped.
    pub gc_time: Duration,
    /// Automatic retries after the first failed attempt.
    pub retry: u32,
    /// Pause before each retry.
    pub retry_delay: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(DEFAULT_STALE_TIME_SECS),
            gc_time: Duration::from_secs(DEFAULT_GC_TIME_SECS),
            retry: DEFAULT_QUERY_RETRY,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOptions {
    pub retry: u32,
    pub retry_delay: Duration,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            retry: DEFAULT_MUTATION_RETRY,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Cache-wide configuration with per-kind presets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Baseline for single-entity and session queries.
    pub queries: QueryOptions,
    /// Staleness window for collection queries.
    pub list_stale_time: Duration,
    pub mutations: MutationOptions,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            queries: QueryOptions::default(),
            list_stale_time: Duration::from_secs(DEFAULT_LIST_STALE_TIME_SECS),
            mutations: MutationOptions::default(),
        }
    }
}

impl QueryConfig {
    /// Single-entity queries such as a user's detail view.
    pub fn detail(&self) -> QueryOptions {
        self.queries
    }

    /// Collection queries, which go stale sooner.
    pub fn collection(&self) -> QueryOptions {
        self.queries.with_stale_time(self.list_stale_time)
    }

    /// The current-user query never retries: an expired session should
    /// surface at once.
    pub fn session(&self) -> QueryOptions {
        self.queries.with_retry(0)
    }
}

/// Serializable form of `QueryConfig`, as stored in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub stale_time_secs: u64,
    pub list_stale_time_secs: u64,
    pub gc_time_secs: u64,
    pub query_retry: u32,
    pub mutation_retry: u32,
    pub retry_delay_ms: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            stale_time_secs: DEFAULT_STALE_TIME_SECS,
            list_stale_time_secs: DEFAULT_LIST_STALE_TIME_SECS,
            gc_time_secs: DEFAULT_GC_TIME_SECS,
            query_retry: DEFAULT_QUERY_RETRY,
            mutation_retry: DEFAULT_MUTATION_RETRY,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl From<&QuerySettings> for QueryConfig {
    fn from(settings: &QuerySettings) -> Self {
        let retry_delay = Duration::from_millis(settings.retry_delay_ms);
        Self {
            queries: QueryOptions {
                stale_time: Duration::from_secs(settings.stale_time_secs),
                gc_time: Duration::from_secs(settings.gc_time_secs),
                retry: settings.query_retry,
                retry_delay,
            },
            list_stale_time: Duration::from_secs(settings.list_stale_time_secs),
            mutations: MutationOptions {
                retry: settings.mutation_retry,
                retry_delay,
            },
        }
    }
}
