//! S3-compatible `ObjectStore` backend. Requests are signed by hand with
//! HMAC-SHA256 rather than pulling in an AWS SDK — the same primitive the
//! platform already uses to verify inbound webhook signatures, pointed the
//! other way to produce outbound ones.

use async_trait::async_trait;
use c8s_core::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

use crate::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

/// An S3-compatible object store reachable over a plain HTTPS endpoint,
/// authenticated with an access key pair.
pub struct S3ObjectStore {
    client: reqwest::Client,
    endpoint: url::Url,
    bucket: String,
    access_key: String,
    secret_key: String,
}

impl S3ObjectStore {
    pub fn new(endpoint: url::Url, bucket: String, access_key: String, secret_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            bucket,
            access_key,
            secret_key,
        }
    }

    fn object_url(&self, key: &str) -> url::Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!("/{}/{}", self.bucket, key));
        url
    }

    /// Canonical string for a request: `METHOD\n<bucket>/<key>\n<expiry>`.
    fn string_to_sign(&self, method: &str, key: &str, expires_at: u64) -> String {
        format!("{method}\n{}/{key}\n{expires_at}", self.bucket)
    }

    fn sign(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| Error::Internal(format!("invalid signing key: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let expires_at = now_unix() + 60;
        let signature = self.sign(&self.string_to_sign("PUT", key, expires_at))?;

        let response = self
            .client
            .put(self.object_url(key))
            .query(&[
                ("AccessKey", self.access_key.as_str()),
                ("Expires", &expires_at.to_string()),
                ("Signature", &signature),
            ])
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::StorageUpload(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(%key, %status, "object store rejected upload");
            return Err(Error::StorageUpload(format!("upload to {key} failed: {status}")));
        }

        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl_seconds: u64) -> Result<String> {
        let expires_at = now_unix() + ttl_seconds;
        let signature = self
            .sign(&self.string_to_sign("GET", key, expires_at))
            .map_err(|e| {
                error!(%key, %e, "failed to sign URL");
                e
            })?;

        let mut url = self.object_url(key);
        url.query_pairs_mut()
            .append_pair("AccessKey", &self.access_key)
            .append_pair("Expires", &expires_at.to_string())
            .append_pair("Signature", &signature);

        Ok(url.to_string())
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3ObjectStore {
        S3ObjectStore::new(
            url::Url::parse("https://objects.example.com").unwrap(),
            "c8s-logs".to_string(),
            "AKIDEXAMPLE".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn same_key_and_expiry_produce_the_same_signature() {
        let store = store();
        let a = store.sign(&store.string_to_sign("GET", "ci/run-1/build.log", 1000)).unwrap();
        let b = store.sign(&store.string_to_sign("GET", "ci/run-1/build.log", 1000)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_produce_different_signatures() {
        let store = store();
        let a = store.sign(&store.string_to_sign("GET", "ci/run-1/build.log", 1000)).unwrap();
        let b = store.sign(&store.string_to_sign("GET", "ci/run-2/build.log", 1000)).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn signed_url_carries_the_bucket_key_and_query_params() {
        let store = store();
        let url = store.signed_url("ci/run-1/build.log", 604800).await.unwrap();
        assert!(url.contains("/c8s-logs/ci/run-1/build.log"));
        assert!(url.contains("AccessKey=AKIDEXAMPLE"));
        assert!(url.contains("Signature="));
    }
}
