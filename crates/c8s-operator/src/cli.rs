//! Operator CLI flags, each with an environment variable fallback —
//! the config surface a cluster deployment sets via its container env.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "c8s-operator")]
#[command(about = "Kubernetes-native CI pipeline operator", long_about = None)]
pub struct Cli {
    /// Namespace to watch; unset watches every namespace the service
    /// account can list.
    #[arg(long, env = "C8S_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds to wait before requeuing a non-terminal run.
    #[arg(long, env = "C8S_REQUEUE_SECONDS", default_value_t = 10)]
    pub requeue_seconds: u64,

    /// Port the health/readiness HTTP server listens on.
    #[arg(long, env = "C8S_HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Per-step ring buffer cap, in bytes, for the in-memory live log tail.
    #[arg(long, env = "C8S_LOG_BUFFER_CAP_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub log_buffer_cap_bytes: usize,

    /// S3-compatible endpoint for step log storage.
    #[arg(long, env = "C8S_OBJECT_STORE_ENDPOINT")]
    pub object_store_endpoint: url::Url,

    /// Bucket step logs are uploaded into.
    #[arg(long, env = "C8S_OBJECT_STORE_BUCKET")]
    pub object_store_bucket: String,

    /// Access key for the object store.
    #[arg(long, env = "C8S_OBJECT_STORE_ACCESS_KEY")]
    pub object_store_access_key: String,

    /// Secret key for the object store. Never logged.
    #[arg(long, env = "C8S_OBJECT_STORE_SECRET_KEY")]
    pub object_store_secret_key: String,
}
