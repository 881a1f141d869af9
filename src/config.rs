//! Per-client settings for the call dispatcher.

use std::time::Duration;

use crate::session::RetryAdapter;

/// Transport retries mounted on `https://` sessions.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Pause between transport retries in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Block size for streaming downloads in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

pub const DEFAULT_USER_AGENT: &str = concat!("batchapps-rust/", env!("CARGO_PKG_VERSION"));

/// Settings scoped to one [`RestClient`](crate::rest::RestClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sets the download block size. Zero is raised to one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The adapter the dispatcher mounts for `https://` on every session.
    pub fn retry_adapter(&self) -> RetryAdapter {
        RetryAdapter::new(self.max_retries).with_delay(self.retry_delay)
    }
}
