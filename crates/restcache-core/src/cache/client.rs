//! In-process query cache.
//!
//! `QueryClient` owns one map from `QueryKey` to cached JSON values. Reads go
//! through [`QueryClient::fetch_query`], which serves fresh data directly,
//! serves stale data while refreshing it in the background, and coalesces
//! concurrent misses for the same key into one request.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::{QueryConfig, QueryOptions};
use super::keys::QueryKey;
use super::retry::with_retry;
use super::state::{QueryError, QueryState, QueryStatus};
use crate::api::ApiError;
use crate::utils::recover;

const SOURCE: &str = "cache::client";

type SharedFetch = Shared<BoxFuture<'static, Result<Value, QueryError>>>;

struct Entry {
    data: Option<Value>,
    data_updated_at: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    error: Option<QueryError>,
    in_flight: Option<SharedFetch>,
    /// Bumped on invalidation; results of older fetches are dropped.
    generation: u64,
    last_accessed: Instant,
    options: QueryOptions,
    notify: watch::Sender<u64>,
}

impl Entry {
    fn new(options: QueryOptions, now: Instant) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            data: None,
            data_updated_at: None,
            updated_at: None,
            error: None,
            in_flight: None,
            generation: 0,
            last_accessed: now,
            options,
            notify,
        }
    }

    fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.data_updated_at
            .map_or(true, |at| now.duration_since(at) >= self.options.stale_time)
    }

    fn is_expired(&self, now: Instant) -> bool {
        !self.is_fetching() && now.duration_since(self.last_accessed) >= self.options.gc_time
    }

    fn status(&self, now: Instant) -> QueryStatus {
        match (&self.data, &self.error) {
            (None, _) if self.is_fetching() => QueryStatus::Loading,
            (None, Some(_)) => QueryStatus::Error,
            (None, None) => QueryStatus::Empty,
            (Some(_), Some(_)) => QueryStatus::Error,
            (Some(_), None) if self.is_fetching() => QueryStatus::Loading,
            (Some(_), None) if self.is_stale(now) => QueryStatus::Stale,
            (Some(_), None) => QueryStatus::Fresh,
        }
    }

    fn reset(&mut self) {
        self.data = None;
        self.data_updated_at = None;
        self.updated_at = None;
        self.error = None;
        self.in_flight = None;
        self.generation += 1;
        self.touch_watchers();
    }

    fn touch_watchers(&self) {
        self.notify.send_modify(|version| *version += 1);
    }
}

struct Inner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    config: QueryConfig,
}

impl Inner {
    fn entries(&self, op: &'static str) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        recover(self.entries.lock(), SOURCE, op)
    }

    /// Record the outcome of a fetch, unless the entry moved on since it started.
    fn settle(&self, key: &QueryKey, generation: u64, result: &Result<Value, QueryError>) {
        let mut entries = self.entries("settle");
        let Some(entry) = entries.get_mut(key) else {
            debug!(%key, "Fetched entry was removed, dropping result");
            return;
        };
        if entry.generation != generation {
            debug!(%key, "Entry was invalidated during fetch, dropping result");
            return;
        }

        entry.in_flight = None;
        match result {
            Ok(value) => {
                entry.data = Some(value.clone());
                entry.data_updated_at = Some(Instant::now());
                entry.updated_at = Some(Utc::now());
                entry.error = None;
            }
            Err(e) => {
                entry.error = Some(Arc::clone(e));
            }
        }
        entry.touch_watchers();
    }
}

enum Plan {
    Cached(Value),
    Wait(SharedFetch),
}

/// Process-wide query cache. Clone is cheap and shares the same store.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl QueryClient {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// Read `key`, fetching it with `fetcher` when there is nothing usable cached.
    ///
    /// - fresh data is returned as is
    /// - stale data is returned at once and refreshed in the background
    /// - on a miss the caller waits; concurrent misses share one fetch
    ///
    /// The fetch runs on its own task, so dropping the returned future does
    /// not cancel it and its result still lands in the cache.
    pub async fn fetch_query<T, F, Fut>(
        &self,
        key: QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let plan = {
            let mut entries = self.inner.entries("fetch_query");
            let now = Instant::now();

            if entries.get(&key).is_some_and(|e| e.is_expired(now)) {
                debug!(%key, "Evicting unused entry");
                entries.remove(&key);
            }

            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(options, now));
            entry.last_accessed = now;
            entry.options = options;

            match entry.data.clone() {
                Some(data) if !entry.is_stale(now) => Plan::Cached(data),
                Some(data) => {
                    if !entry.is_fetching() {
                        debug!(%key, "Serving stale data, refreshing in background");
                        let _refresh = self.start_fetch(entry, &key, fetcher);
                    }
                    Plan::Cached(data)
                }
                None => match &entry.in_flight {
                    Some(shared) => {
                        debug!(%key, "Joining in-flight fetch");
                        Plan::Wait(shared.clone())
                    }
                    None => Plan::Wait(self.start_fetch(entry, &key, fetcher)),
                },
            }
        };

        let value = match plan {
            Plan::Cached(value) => value,
            Plan::Wait(shared) => shared.await?,
        };
        decode(&key, value)
    }

    fn start_fetch<T, F, Fut>(&self, entry: &mut Entry, key: &QueryKey, fetcher: F) -> SharedFetch
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let generation = entry.generation;
        let options = entry.options;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let label = task_key.to_string();
            let attempt = with_retry(&label, options.retry, options.retry_delay, fetcher)
                .map(|result| {
                    result.and_then(|data| {
                        serde_json::to_value(data).map_err(|e| {
                            ApiError::InvalidResponse(format!("cannot cache value: {}", e))
                        })
                    })
                });
            let result = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(result) => result.map_err(Arc::new),
                Err(_) => Err(Arc::new(ApiError::Aborted(format!("fetch for {} panicked", label)))),
            };
            if let Err(e) = &result {
                warn!(key = %label, error = %e, "Query failed");
            }
            if let Some(inner) = inner.upgrade() {
                inner.settle(&task_key, generation, &result);
            }
            result
        });

        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(ApiError::Aborted(e.to_string()))),
            }
        }
        .boxed()
        .shared();

        entry.in_flight = Some(shared.clone());
        entry.touch_watchers();
        shared
    }

    /// Cached value for `key`, without fetching.
    pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let value = self.inner.entries("get_query_data").get(key)?.data.clone()?;
        decode(key, value).ok()
    }

    /// Snapshot of `key` for display.
    pub fn query_state<T: DeserializeOwned>(&self, key: &QueryKey) -> QueryState<T> {
        let entries = self.inner.entries("query_state");
        let Some(entry) = entries.get(key) else {
            return QueryState::default();
        };
        QueryState {
            status: entry.status(Instant::now()),
            data: entry.data.clone().and_then(|v| decode(key, v).ok()),
            error: entry.error.clone(),
            is_fetching: entry.is_fetching(),
            updated_at: entry.updated_at,
        }
    }

    /// Watch `key`; the value bumps on every state change of the entry.
    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<u64> {
        let mut entries = self.inner.entries("subscribe");
        let options = self.inner.config.queries;
        entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(options, Instant::now()))
            .notify
            .subscribe()
    }

    /// Empty every entry in the family named by `prefix`.
    ///
    /// Returns once the entries are reset, so a following read always goes
    /// to the network. Fetches already running for those keys finish, but
    /// their results are discarded.
    pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.entries("invalidate_queries");
        let mut count = 0;
        for (_, entry) in entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
            entry.reset();
            count += 1;
        }
        debug!(%prefix, count, "Invalidated queries");
        count
    }

    /// Drop every entry in the family named by `prefix`.
    pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.entries("remove_queries");
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut entries = self.inner.entries("clear");
        debug!(count = entries.len(), "Clearing query cache");
        entries.clear();
    }

    /// Evict entries nobody has read for longer than their retention window.
    pub fn collect_garbage(&self) -> usize {
        let mut entries = self.inner.entries("collect_garbage");
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted unused queries");
        }
        evicted
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `interval` until
    /// the client is dropped.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                QueryClient { inner }.collect_garbage();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode<T: DeserializeOwned>(key: &QueryKey, value: Value) -> Result<T, QueryError> {
    serde_json::from_value(value).map_err(|e| {
        warn!(%key, error = %e, "Cached value has unexpected shape");
        Arc::new(ApiError::InvalidResponse(format!("cached value for {}: {}", key, e)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::UserKeys;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> QueryOptions {
        QueryOptions {
            stale_time: Duration::from_secs(120),
            gc_time: Duration::from_secs(600),
            retry: 1,
            retry_delay: Duration::from_millis(10),
        }
    }

    type Fetcher = Box<dyn Fn() -> BoxFuture<'static, Result<String, ApiError>> + Send>;

    /// Fetcher returning "v<n>" for the n-th call, optionally after a delay.
    fn counting(calls: &Arc<AtomicUsize>, delay: Duration) -> Fetcher {
        let calls = Arc::clone(calls);
        Box::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(format!("v{}", n))
            }
            .boxed()
        })
    }

    fn failing(calls: &Arc<AtomicUsize>) -> Fetcher {
        let calls = Arc::clone(calls);
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::ServerError("down".into())) }.boxed()
        })
    }

    async fn settle_tasks() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_data_is_served_from_cache() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::detail("u1");

        let first: String = cache.fetch_query(key.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        let second: String = cache.fetch_query(key.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(first, "v1");
        assert_eq!(second, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.query_state::<String>(&key).status, QueryStatus::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_fetch() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::list(None);

        let (a, b) = tokio::join!(
            cache.fetch_query::<String, _, _>(key.clone(), options(), counting(&calls, Duration::from_millis(50))),
            cache.fetch_query::<String, _, _>(key.clone(), options(), counting(&calls, Duration::from_millis(50))),
        );
        assert_eq!(a.unwrap(), "v1");
        assert_eq!(b.unwrap(), "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_data_served_while_refreshing() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::list(None);

        let _: String = cache.fetch_query(key.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(cache.query_state::<String>(&key).status, QueryStatus::Stale);

        let served: String = cache.fetch_query(key.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(served, "v1");

        settle_tasks().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_query_data::<String>(&key).as_deref(), Some("v2"));
        assert_eq!(cache.query_state::<String>(&key).status, QueryStatus::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_forces_refetch_for_whole_family() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let page1 = UserKeys::list(Some(&crate::models::PaginationParams::page(1, 10)));
        let page2 = UserKeys::list(Some(&crate::models::PaginationParams::page(2, 10)));
        let detail = UserKeys::detail("u1");

        for key in [&page1, &page2, &detail] {
            let _: String = cache.fetch_query(key.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert_eq!(cache.invalidate_queries(&UserKeys::lists()), 2);
        assert_eq!(cache.query_state::<String>(&page1).status, QueryStatus::Empty);
        assert_eq!(cache.query_state::<String>(&detail).status, QueryStatus::Fresh);

        let again: String = cache.fetch_query(page1.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(again, "v4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_started_before_invalidation_does_not_repopulate() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::detail("u1");

        let pending = {
            let cache = cache.clone();
            let key = key.clone();
            let fetcher = counting(&calls, Duration::from_millis(100));
            tokio::spawn(async move { cache.fetch_query::<String, _, _>(key, options(), fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.query_state::<String>(&key).is_loading());

        cache.invalidate_queries(&UserKeys::all());
        assert_eq!(pending.await.unwrap().unwrap(), "v1");
        assert_eq!(cache.get_query_data::<String>(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = cache.fetch_query::<String, _, _>(UserKeys::list(None), options(), failing(&calls)).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::detail("u1");
        let result = cache
            .fetch_query::<String, _, _>(key.clone(), options().with_retry(0), failing(&calls))
            .await;
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let state = cache.query_state::<String>(&key);
        assert_eq!(state.status, QueryStatus::Error);
        assert!(matches!(state.error.as_deref(), Some(ApiError::ServerError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_entry_refetches_on_next_read() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::detail("u1");

        let _ = cache.fetch_query::<String, _, _>(key.clone(), options().with_retry(0), failing(&calls)).await;
        let ok: String = cache.fetch_query(key.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(ok, "v2");
        assert_eq!(cache.query_state::<String>(&key).status, QueryStatus::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unused_entries_are_evicted() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let long_lived = options().with_stale_time(Duration::from_secs(3600));
        let key = UserKeys::detail("u1");

        let _: String = cache.fetch_query(key.clone(), long_lived, counting(&calls, Duration::ZERO)).await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;

        // Still fresh by staleness, but past retention: evicted, not served
        let refetched: String = cache.fetch_query(key.clone(), long_lived, counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(refetched, "v2");

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_gc_task() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let _: String = cache
            .fetch_query(UserKeys::detail("u1"), options(), counting(&calls, Duration::ZERO))
            .await
            .unwrap();

        let gc = cache.spawn_gc(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert!(cache.is_empty());
        gc.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_does_not_cancel_fetch() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::detail("u1");

        let caller = {
            let cache = cache.clone();
            let key = key.clone();
            let fetcher = counting(&calls, Duration::from_millis(100));
            tokio::spawn(async move { cache.fetch_query::<String, _, _>(key, options(), fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get_query_data::<String>(&key).as_deref(), Some("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_changes() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = UserKeys::detail("u1");
        let mut rx = cache.subscribe(&key);

        let _: String = cache.fetch_query(key.clone(), options(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        cache.invalidate_queries(&key);
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        cache.clear();
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_queries() {
        let cache = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        for key in [UserKeys::detail("u1"), UserKeys::list(None)] {
            let _: String = cache.fetch_query(key, options(), counting(&calls, Duration::ZERO)).await.unwrap();
        }
        assert_eq!(cache.remove_queries(&UserKeys::details()), 1);
        assert_eq!(cache.len(), 1);
    }
}
