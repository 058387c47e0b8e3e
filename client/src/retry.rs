//! Retry Policy (C2): a retry schedule guarded by a recoverability
//! predicate, grounded on the status-code-gated `ExponentialBackoff` +
//! `RequestRetryPolicy` pairing used for request retries, generalised from
//! `StatusCode` to any error type so it can drive both connect attempts and
//! individual requests.
//!
//! The fluent `in_session(id)` / `with_executors(...)` chain is flattened
//! away: the session id is implicit in the call site and the executor is
//! whatever runtime `retry_to` is awaited on, per the flattened-builder
//! design note.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use twinlink_core::backoff::Backoff;

/// A reusable retry policy: which errors are worth retrying, and who to
/// notify when an attempt fails.
pub struct RetryPolicy<E> {
    is_recoverable: Box<dyn Fn(&E) -> bool + Send + Sync>,
    notify_on_error: Option<Arc<dyn Fn(&E) + Send + Sync>>,
}

impl<E> RetryPolicy<E> {
    /// Build a policy with the given recoverability predicate.
    pub fn new(is_recoverable: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            is_recoverable: Box::new(is_recoverable),
            notify_on_error: None,
        }
    }

    /// A policy for which every error is recoverable. This is the default
    /// behaviour preserved for reconnects: every error, including
    /// authentication failures, is treated as worth retrying forever.
    pub fn always_recoverable() -> Self {
        Self::new(|_| true)
    }

    /// A policy that never retries: the first failure is final.
    pub fn never_recoverable() -> Self {
        Self::new(|_| false)
    }

    /// Register a sink invoked with every failed attempt, recoverable or
    /// not. Used to wire the user-supplied connection-error consumer.
    pub fn notify_on_error(mut self, sink: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.notify_on_error = Some(Arc::new(sink));
        self
    }

    /// Drive `attempt_fn` to completion, retrying on recoverable failures
    /// using delays from `backoff` until it is exhausted or the error is
    /// classified unrecoverable.
    pub async fn retry_to<T, Fut>(
        &self,
        name: &str,
        mut backoff: impl Backoff,
        mut attempt_fn: impl FnMut() -> Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(sink) = &self.notify_on_error {
                        sink(&err);
                    }
                    if (self.is_recoverable)(&err) {
                        if let Some(delay) = backoff.next() {
                            debug!("{name} failed, retrying after {delay:?}: {err}", err = DisplayOrDebug(&err));
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Default fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct DisplayOrDebug<'a, E>(&'a E);

impl<E: std::fmt::Debug> std::fmt::Display for DisplayOrDebug<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
