//! Object-store abstraction for step logs (spec.md §6): `Upload(key, bytes)`
//! and `SignedURL(key, ttl)`. The production backend signs requests against
//! an S3-compatible endpoint by hand; an in-memory double is provided for
//! the controller's own tests.

pub mod s3;

use async_trait::async_trait;
use c8s_core::Result;

/// Storage key for a step's log object: `{namespace}/{run}/{step}.log`.
pub fn log_key(namespace: &str, run_name: &str, step_name: &str) -> String {
    format!("{namespace}/{run_name}/{step_name}.log")
}

/// Backend-agnostic object storage contract the log collector uploads
/// through. Implementors must be cheap to clone/share across reconciles.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` under `key`, overwriting any existing object.
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Produce a retrieval URL for `key` valid for `ttl_seconds` from now,
    /// without requiring the caller to hold storage credentials.
    async fn signed_url(&self, key: &str, ttl_seconds: u64) -> Result<String>;
}

pub use s3::S3ObjectStore;

/// In-memory double: stores objects in a `Mutex<HashMap>`, "signs" a URL by
/// embedding the key and expiry in a fragment with no real cryptography.
/// Exists purely so crates downstream of `c8s-storage` can test against the
/// trait without a network dependency.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryObjectStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl ObjectStore for InMemoryObjectStore {
        async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
            self.objects.lock().unwrap().insert(key.to_string(), bytes);
            Ok(())
        }

        async fn signed_url(&self, key: &str, ttl_seconds: u64) -> Result<String> {
            Ok(format!("memory://{key}?ttl={ttl_seconds}"))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn round_trips_an_upload() {
            let store = InMemoryObjectStore::new();
            store.upload("ci/run-1/build.log", b"hello".to_vec()).await.unwrap();
            assert_eq!(store.get("ci/run-1/build.log"), Some(b"hello".to_vec()));
        }

        #[tokio::test]
        async fn signed_url_carries_the_key_and_ttl() {
            let store = InMemoryObjectStore::new();
            let url = store.signed_url("ci/run-1/build.log", 604800).await.unwrap();
            assert!(url.contains("ci/run-1/build.log"));
            assert!(url.contains("604800"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_key_matches_the_contract_format() {
        assert_eq!(log_key("ci", "run-1", "build"), "ci/run-1/build.log");
    }
}
