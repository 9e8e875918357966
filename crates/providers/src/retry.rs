//! Provider retry: bounded attempts with exponential backoff.
//!
//! Transport and backend failures are retried at the provider boundary so the
//! orchestrator only ever sees a provider error once retries are exhausted.
//! Only errors that [`ProviderError::is_retryable`] classifies as transient are
//! retried; authentication and configuration failures surface immediately.

use async_trait::async_trait;
use relaymind_core::error::ProviderError;
use relaymind_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Wraps a provider and retries transient failures.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self {
            inner,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Delay before retry number `attempt` (0-based).
    fn backoff(&self, attempt: u32, error: &ProviderError) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff);
        match error {
            ProviderError::RateLimited { retry_after_secs } => exp
                .max(Duration::from_secs(*retry_after_secs))
                .min(self.max_backoff),
            _ => exp,
        }
    }

    /// Decide whether `error` on `attempt` deserves another try, sleeping first.
    async fn should_retry(&self, attempt: u32, error: &ProviderError, op: &str) -> bool {
        if attempt >= self.max_retries || !error.is_retryable() {
            return false;
        }
        let delay = self.backoff(attempt, error);
        warn!(
            provider = %self.inner.name(),
            op,
            attempt = attempt + 1,
            max_retries = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Provider call failed, retrying"
        );
        tokio::time::sleep(delay).await;
        true
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !self.should_retry(attempt, &e, "complete").await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Retries establishing the stream, and also a stream whose very first
    /// item is a transient error (nothing has reached the caller yet). Once a
    /// delta has been forwarded, later errors pass through untouched.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<TokenStream, ProviderError> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.stream(request.clone()).await {
                Ok(mut rx) => match rx.recv().await {
                    Some(Err(e)) => e,
                    first => {
                        debug!(provider = %self.inner.name(), attempt, "Stream established");
                        return Ok(forward(first, rx));
                    }
                },
                Err(e) => e,
            };
            if !self.should_retry(attempt, &error, "stream").await {
                return Err(error);
            }
            attempt += 1;
        }
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

/// Re-prepend an already received item to the rest of a token stream.
fn forward(
    first: Option<std::result::Result<StreamChunk, ProviderError>>,
    mut rest: TokenStream,
) -> TokenStream {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let Some(first) = first else { return };
        if tx.send(first).await.is_err() {
            return;
        }
        while let Some(item) = rest.recv().await {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    });
    rx
}
