//! Error types for the pipeline reconciliation core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A step's `dependsOn` graph has a cycle or references an unknown step.
    #[error("invalid dependency graph: {0}")]
    InvalidDependencyGraph(String),

    /// The `PipelineConfig` referenced by a run could not be found.
    #[error("pipeline config not found: {0}")]
    PipelineConfigNotFound(String),

    /// A step or pipeline timeout string failed to parse.
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    /// Uploading collected log bytes to object storage failed.
    #[error("storage upload failed: {0}")]
    StorageUpload(String),

    /// A secret referenced by a step could not be fetched for masking.
    #[error("secret not found: {0}")]
    SecretNotFound(String),

    /// A step name, image reference, or other user input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Wraps a transport-level failure from the cluster API client.
    #[error("cluster API error: {0}")]
    Kube(String),

    /// Anything else a programmer error would surface as.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
