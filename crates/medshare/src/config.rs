//! Coordinator configuration.

use std::time::Duration;

/// Configuration for the [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for a single blob store call.
    pub storage_timeout: Duration,
    /// Extra attempts after a transient blob store failure.
    ///
    /// Only blob calls are retried: they are content-addressed and therefore
    /// idempotent. Ledger mutations are never retried.
    pub storage_retries: u32,
    /// Check that fetched bytes hash to the locator they were fetched by.
    pub verify_digests: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(10),
            storage_retries: 2,
            verify_digests: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_storage_retries(mut self, retries: u32) -> Self {
        self.storage_retries = retries;
        self
    }

    pub fn with_verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }
}
