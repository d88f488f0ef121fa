//! Pipeline configuration and step definitions.
//!
//! These are the template types: immutable once a run starts. They carry
//! no status, no identity beyond a name — the owning `PipelineConfig`
//! resource supplies that.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

static STEP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Returns true if `name` is a valid DNS-label step name.
pub fn is_valid_step_name(name: &str) -> bool {
    STEP_NAME_RE.is_match(name)
}

/// A full pipeline definition, as it would be read off a `PipelineConfig`
/// custom resource's spec.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub repository: String,
    #[serde(default = "default_branches")]
    pub branches: BTreeSet<String>,
    pub steps: Vec<Step>,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default)]
    pub matrix: Option<MatrixSpec>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

fn default_branches() -> BTreeSet<String> {
    BTreeSet::from(["*".to_string()])
}

fn default_timeout() -> String {
    "1h".to_string()
}

impl PipelineConfig {
    /// True if `branch` matches any of the configured branch globs.
    pub fn matches_branch(&self, branch: &str) -> bool {
        self.branches.iter().any(|glob| glob_match(glob, branch))
    }
}

/// One step in a pipeline: a single container invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    pub image: String,
    pub commands: Vec<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequest>,
    #[serde(default = "default_step_timeout")]
    pub timeout: String,
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
    #[serde(default)]
    pub conditional: Option<Conditional>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

fn default_step_timeout() -> String {
    "30m".to_string()
}

/// A reference to a secret key, materialized as an env var in the step container.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub secret_ref: String,
    pub key: String,
    #[serde(default)]
    pub env_var: Option<String>,
}

impl SecretRef {
    /// The environment variable name this secret is exposed as: `envVar`
    /// if set, otherwise the secret key itself.
    pub fn env_name(&self) -> &str {
        self.env_var.as_deref().unwrap_or(&self.key)
    }

    /// A stable identifier for this reference, used as the masking map key.
    pub fn id(&self) -> String {
        format!("{}/{}", self.secret_ref, self.key)
    }
}

/// Gates a step's inclusion (plan time) and readiness (ready-set time).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Conditional {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_true")]
    pub on_success: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u8,
    #[serde(default)]
    pub backoff_seconds: u32,
}

impl RetryPolicy {
    pub fn is_valid(&self) -> bool {
        self.max_retries <= 5
    }
}

/// Cartesian-product matrix expansion, gated by an exclusion set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixSpec {
    pub dimensions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<BTreeMap<String, String>>,
}

/// Minimal glob matcher supporting `*` as a wildcard covering the whole
/// string, `prefix*`, `*suffix`, and exact matches — the vocabulary actually
/// used for branch patterns in CI configs.
pub(crate) fn glob_match(glob: &str, value: &str) -> bool {
    if glob == "*" {
        return true;
    }
    match (glob.strip_suffix('*'), glob.strip_prefix('*')) {
        (Some(prefix), _) if !glob.starts_with('*') => value.starts_with(prefix),
        (_, Some(suffix)) => value.ends_with(suffix),
        _ => glob == value,
    }
}
