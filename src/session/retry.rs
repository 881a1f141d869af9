//! Transport-level retry for requests that never got a response.
//!
//! Status codes are never retried here; only connection and timeout
//! failures are, and only for requests whose body can be replayed.

use log::{debug, warn};
use reqwest::{Client, Request, Response};
use std::time::Duration;

use crate::config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};

/// Retry policy mounted on a [`Session`](super::Session) for a URL prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdapter {
    max_retries: usize,
    delay: Duration,
}

impl Default for RetryAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryAdapter {
    /// `max_retries` further attempts are made after the first one fails.
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sends `request`, retrying transient transport failures.
    pub async fn execute(&self, client: &Client, request: Request) -> Result<Response, reqwest::Error> {
        let mut request = request;
        let mut attempt = 0;

        loop {
            let replay = if attempt < self.max_retries {
                request.try_clone()
            } else {
                None
            };

            let error = match client.execute(request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let Some(next) = replay else {
                debug!("Not retrying request: {}", error);
                return Err(error);
            };
            if !is_transient(&error) {
                debug!("Non-transient transport error: {}", error);
                return Err(error);
            }

            attempt += 1;
            warn!(
                "Request attempt {}/{} failed ({}), retrying in {}ms...",
                attempt,
                self.max_retries + 1,
                error,
                self.delay.as_millis()
            );
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            request = next;
        }
    }
}

/// Connection and timeout failures may succeed on another attempt.
pub fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}
