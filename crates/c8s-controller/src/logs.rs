//! Log Collector (spec.md §4.C): stream a step's pod output into the
//! shared ring buffer, mask secrets, upload to object storage, return a
//! signed URL.

use std::collections::BTreeMap;

use c8s_core::labels::LABEL_JOB_NAME;
use c8s_core::mask::mask_secrets;
use c8s_core::pipeline::SecretRef;
use c8s_core::{Error, Result};
use c8s_storage::{log_key, ObjectStore};
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, LogParams};
use kube::Client;
use tracing::warn;

use crate::buffer::LogBufferManager;

/// Byte cap pod output is truncated to before masking and upload. Matches
/// the ring buffer's own cap so a single copy satisfies both.
const LOG_BYTE_LIMIT: usize = 10 * 1024 * 1024;

/// Signed URL lifetime handed back to callers.
const LOG_URL_TTL_SECONDS: u64 = 7 * 24 * 3600;

pub struct LogCollector {
    client: Client,
    namespace: String,
    store: std::sync::Arc<dyn ObjectStore>,
    buffers: LogBufferManager,
}

impl LogCollector {
    pub fn new(
        client: Client,
        namespace: String,
        store: std::sync::Arc<dyn ObjectStore>,
        buffers: LogBufferManager,
    ) -> Self {
        Self {
            client,
            namespace,
            store,
            buffers,
        }
    }

    /// Runs the full collection pipeline for `run_name`/`step_name` and
    /// returns the signed URL to record on the step's status.
    pub async fn collect(
        &self,
        run_name: &str,
        step_name: &str,
        job_name: &str,
        secrets: &[SecretRef],
    ) -> Result<String> {
        let pod_name = self.find_pod(job_name).await?;
        let raw = self.stream_container_log(&pod_name).await?;

        let secret_values = self.fetch_secrets(secrets).await;
        let masked = mask_secrets(&raw, &secret_values);

        let key = log_key(&self.namespace, run_name, step_name);
        self.buffers.append(&key, &masked);

        self.store
            .upload(&key, masked)
            .await
            .map_err(|e| Error::StorageUpload(e.to_string()))?;

        self.store.signed_url(&key, LOG_URL_TTL_SECONDS).await
    }

    /// Locates the pod created by `job_name` via the platform-supplied
    /// `job-name` label.
    async fn find_pod(&self, job_name: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = pods
            .list(&kube::api::ListParams::default().labels(&format!("{LABEL_JOB_NAME}={job_name}")))
            .await
            .map_err(|e| Error::Kube(e.to_string()))?;

        list.items
            .into_iter()
            .next()
            .and_then(|pod| pod.metadata.name)
            .ok_or_else(|| Error::Kube(format!("no pod found for job {job_name}")))
    }

    /// Streams the first non-clone container's log, truncating at
    /// `LOG_BYTE_LIMIT` bytes (truncation silently discards the suffix).
    async fn stream_container_log(&self, pod_name: &str) -> Result<Vec<u8>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod = pods
            .get(pod_name)
            .await
            .map_err(|e| Error::Kube(e.to_string()))?;

        let container = main_container_name(&pod)
            .ok_or_else(|| Error::Kube(format!("pod {pod_name} has no step container")))?;

        let mut stream = pods
            .log_stream(
                pod_name,
                &LogParams {
                    container: Some(container),
                    follow: false,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Kube(e.to_string()))?;

        let mut bytes = Vec::new();
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| Error::Kube(e.to_string()))?
        {
            if bytes.len() >= LOG_BYTE_LIMIT {
                break;
            }
            let remaining = LOG_BYTE_LIMIT - bytes.len();
            if chunk.len() > remaining {
                bytes.extend_from_slice(&chunk[..remaining]);
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }

    /// Fetches each referenced secret's value. Missing secrets are skipped
    /// and logged — masking proceeds with whatever was fetched (spec.md
    /// §4.C: secret fetch failure is non-fatal).
    async fn fetch_secrets(&self, refs: &[SecretRef]) -> BTreeMap<String, String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut values = BTreeMap::new();

        for secret_ref in refs {
            match secrets.get(&secret_ref.secret_ref).await {
                Ok(secret) => {
                    let Some(data) = secret.data else { continue };
                    let Some(value) = data.get(&secret_ref.key) else {
                        warn!(
                            secret = %secret_ref.secret_ref,
                            key = %secret_ref.key,
                            "secret key not found"
                        );
                        continue;
                    };
                    if let Ok(decoded) = String::from_utf8(value.0.clone()) {
                        values.insert(secret_ref.id(), decoded);
                    }
                }
                Err(e) => {
                    warn!(secret = %secret_ref.secret_ref, error = %e, "secret fetch failed");
                }
            }
        }

        values
    }
}

/// The "main" container is the first one that isn't the clone init
/// container — i.e. the single container the Job Factory put in
/// `spec.containers` (init containers never reach `pods.log_stream`
/// without naming them explicitly, so this just picks the step container).
fn main_container_name(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .map(|c| c.name.clone())
}
