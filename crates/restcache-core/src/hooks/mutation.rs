use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::{ApiError, ApiResponse};
use crate::cache::retry::with_retry;
use crate::cache::{MutationOptions, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

/// Outcome of the most recent run of a mutation.
#[derive(Debug, Clone)]
pub struct MutationState<T> {
    pub status: MutationStatus,
    pub data: Option<T>,
    pub error: Option<QueryError>,
}

impl<T> Default for MutationState<T> {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

impl<T> MutationState<T> {
    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == MutationStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == MutationStatus::Error
    }
}

/// A write operation with observable state.
///
/// Clones share state, so a view can hold one clone and watch it while
/// another clone runs the operation.
pub struct Mutation<T> {
    name: &'static str,
    options: MutationOptions,
    state: Arc<watch::Sender<MutationState<T>>>,
}

impl<T> Clone for Mutation<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            options: self.options,
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.name)
            .field("status", &self.state.borrow().status)
            .finish()
    }
}

impl<T> Mutation<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: &'static str, options: MutationOptions) -> Self {
        let (state, _) = watch::channel(MutationState::default());
        Self {
            name,
            options,
            state: Arc::new(state),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> MutationState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    /// Back to `Idle`, forgetting the last result.
    pub fn reset(&self) {
        self.state.send_replace(MutationState::default());
    }

    /// Run `op` with the configured retry policy.
    ///
    /// A `success: false` envelope is an error. `on_success` runs before the
    /// state flips to `Success`, so anything it invalidates is already gone
    /// when observers wake up.
    pub(crate) async fn run<F, Fut, S>(&self, op: F, on_success: S) -> Result<T, QueryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ApiResponse<T>, ApiError>>,
        S: FnOnce(&T),
    {
        self.run_with_retry(self.options.retry, op, on_success).await
    }

    pub(crate) async fn run_with_retry<F, Fut, S>(
        &self,
        retry: u32,
        op: F,
        on_success: S,
    ) -> Result<T, QueryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ApiResponse<T>, ApiError>>,
        S: FnOnce(&T),
    {
        self.state.send_modify(|state| {
            state.status = MutationStatus::Pending;
            state.error = None;
        });

        let result = with_retry(self.name, retry, self.options.retry_delay, op)
            .await
            .and_then(ApiResponse::into_result);

        match result {
            Ok(data) => {
                on_success(&data);
                debug!(mutation = self.name, "Mutation succeeded");
                self.state.send_replace(MutationState {
                    status: MutationStatus::Success,
                    data: Some(data.clone()),
                    error: None,
                });
                Ok(data)
            }
            Err(e) => {
                warn!(mutation = self.name, error = %e, "Mutation failed");
                let error = Arc::new(e);
                self.state.send_modify(|state| {
                    state.status = MutationStatus::Error;
                    state.error = Some(Arc::clone(&error));
                });
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn options(retry: u32) -> MutationOptions {
        MutationOptions {
            retry,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_runs_side_effect_before_status_changes() {
        let mutation: Mutation<u32> = Mutation::new("save", options(1));
        let mut rx = mutation.subscribe();
        let seen_during_effect = Mutex::new(None);

        let result = mutation
            .run(
                || async { Ok(ApiResponse::ok(7)) },
                |data| {
                    *seen_during_effect.lock().unwrap() = Some((*data, rx.borrow().status));
                },
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(*seen_during_effect.lock().unwrap(), Some((7, MutationStatus::Pending)));
        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert!(state.is_success());
        assert_eq!(state.data, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_envelope_is_an_error_and_not_retried() {
        let mutation: Mutation<u32> = Mutation::new("save", options(3));
        let calls = AtomicU32::new(0);

        let result = mutation
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Ok(ApiResponse {
                            success: false,
                            data: None,
                            message: Some("email taken".to_string()),
                        })
                    }
                },
                |_| panic!("side effect must not run"),
            )
            .await;

        let error = result.unwrap_err();
        assert!(matches!(error.as_ref(), ApiError::Rejected(m) if m == "email taken"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let state = mutation.state();
        assert!(state.is_error());
        assert!(state.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_retry_once() {
        let mutation: Mutation<()> = Mutation::new("delete", options(1));
        let calls = AtomicU32::new(0);

        let result = mutation
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ApiError::ServerError("boom".to_string())) }
                },
                |_| {},
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_shared_state() {
        let mutation: Mutation<u32> = Mutation::new("save", options(0));
        let observer = mutation.clone();
        mutation
            .run(|| async { Ok(ApiResponse::ok(1)) }, |_| {})
            .await
            .unwrap();
        assert!(observer.state().is_success());

        observer.reset();
        assert_eq!(mutation.state().status, MutationStatus::Idle);
    }
}
