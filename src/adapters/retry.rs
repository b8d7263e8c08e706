use crate::domain::model::{ServiceInstanceState, ServiceSpec};
use crate::domain::ports::{AdapterResult, LifecycleAdapter};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retries retryable adapter failures a fixed number of times.
///
/// Crash signals (`UnknownService`) pass straight through.
pub struct RetryingAdapter {
    inner: Arc<dyn LifecycleAdapter>,
    attempts: u32,
    delay: Duration,
}

impl RetryingAdapter {
    pub fn new(inner: Arc<dyn LifecycleAdapter>, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        service: &str,
        operation: &str,
        mut call: F,
    ) -> AdapterResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    tracing::warn!(
                        "🔄 {} of {} failed (attempt {}/{}): {}",
                        operation,
                        service,
                        attempt,
                        self.attempts,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl LifecycleAdapter for RetryingAdapter {
    async fn ensure_removed(&self, name: &str) -> AdapterResult<()> {
        self.with_retry(name, "remove", || self.inner.ensure_removed(name))
            .await
    }

    async fn create(&self, spec: &ServiceSpec) -> AdapterResult<()> {
        self.with_retry(&spec.name, "create", || self.inner.create(spec))
            .await
    }

    async fn query_health(&self, name: &str) -> AdapterResult<ServiceInstanceState> {
        self.with_retry(name, "inspect", || self.inner.query_health(name))
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
