use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::api::ApiError;

/// Run `op`, retrying up to `retry` more times on retryable errors.
pub(crate) async fn with_retry<T, F, Fut>(
    label: &str,
    retry: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retry && e.is_retryable() => {
                attempt += 1;
                warn!(label, attempt, error = %e, "Request failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
