//! Prints the `PipelineConfig` and `PipelineRun` CRD manifests as YAML, for
//! `c8s-operator --bin crdgen | kubectl apply -f -`.

use c8s_k8s::crd::{PipelineConfig, PipelineRun};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    println!("{}", serde_yaml::to_string(&PipelineConfig::crd())?);
    println!("---");
    println!("{}", serde_yaml::to_string(&PipelineRun::crd())?);
    Ok(())
}
