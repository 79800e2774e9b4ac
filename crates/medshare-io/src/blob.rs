//! Content-addressed blob storage.
//!
//! Ciphertexts and capsules live outside the ledger, addressed by the
//! BLAKE3 digest of their bytes. Because locators are content digests,
//! `put` is idempotent and safe to retry.

use async_trait::async_trait;
use bytes::Bytes;

use medshare_core::Locator;

use crate::error::Result;

/// Trait for blob stores.
///
/// Implementations must be thread-safe (Send + Sync). Either call may fail
/// with [`StorageError::Unavailable`](crate::StorageError::Unavailable).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their locator.
    async fn put(&self, bytes: Bytes) -> Result<Locator>;

    /// Fetch the bytes stored under a locator.
    async fn get(&self, locator: &Locator) -> Result<Bytes>;
}

/// An in-memory blob store with fault injection, for tests and simulations.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::RwLock;
    use tracing::debug;

    use crate::error::StorageError;

    /// In-memory blob store.
    pub struct MemoryBlobStore {
        blobs: RwLock<HashMap<Locator, Bytes>>,
        online: AtomicBool,
        fail_next: AtomicUsize,
        latency: Option<Duration>,
        puts: AtomicU64,
        gets: AtomicU64,
    }

    impl MemoryBlobStore {
        /// Create an empty, online store.
        pub fn new() -> Self {
            Self {
                blobs: RwLock::new(HashMap::new()),
                online: AtomicBool::new(true),
                fail_next: AtomicUsize::new(0),
                latency: None,
                puts: AtomicU64::new(0),
                gets: AtomicU64::new(0),
            }
        }

        /// Delay every call by `latency`.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        /// Take the store offline (every call fails) or bring it back.
        pub fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        /// Make the next `n` calls fail with `Unavailable`.
        pub fn fail_next(&self, n: usize) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        /// Overwrite a stored blob with different bytes under the same
        /// locator. Returns false if nothing is stored there.
        pub async fn corrupt(&self, locator: &Locator) -> bool {
            let mut blobs = self.blobs.write().await;
            match blobs.get_mut(locator) {
                Some(bytes) => {
                    let mut tampered = bytes.to_vec();
                    match tampered.first_mut() {
                        Some(b) => *b ^= 0xff,
                        None => tampered.push(0),
                    }
                    *bytes = Bytes::from(tampered);
                    true
                }
                None => false,
            }
        }

        /// Number of successful and failed `put` calls so far.
        pub fn put_calls(&self) -> u64 {
            self.puts.load(Ordering::SeqCst)
        }

        /// Number of successful and failed `get` calls so far.
        pub fn get_calls(&self) -> u64 {
            self.gets.load(Ordering::SeqCst)
        }

        /// Number of stored blobs.
        pub async fn len(&self) -> usize {
            self.blobs.read().await.len()
        }

        /// Whether the store is empty.
        pub async fn is_empty(&self) -> bool {
            self.blobs.read().await.is_empty()
        }

        async fn admit(&self, op: &'static str) -> Result<()> {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if !self.online.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("store is offline".into()));
            }
            let injected = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                debug!(op, "injected storage failure");
                return Err(StorageError::Unavailable(format!("injected {} failure", op)));
            }
            Ok(())
        }
    }

    impl Default for MemoryBlobStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn put(&self, bytes: Bytes) -> Result<Locator> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.admit("put").await?;

            let locator = Locator::for_bytes(&bytes);
            self.blobs.write().await.entry(locator).or_insert(bytes);
            Ok(locator)
        }

        async fn get(&self, locator: &Locator) -> Result<Bytes> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.admit("get").await?;

            self.blobs
                .read()
                .await
                .get(locator)
                .cloned()
                .ok_or(StorageError::NotFound(*locator))
        }
    }
}
