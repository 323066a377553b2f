use std::env;
use std::path::PathBuf;

use super::env_flag;

/// Which deployer implementation rolls images out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployerKind {
    Kubernetes,
    Command,
}

impl DeployerKind {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "command" => DeployerKind::Command,
            _ => DeployerKind::Kubernetes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployerConfig {
    pub kind: DeployerKind,
    pub kubeconfig_path: Option<PathBuf>,
    pub in_cluster: bool,
    /// Namespace holding one Deployment per project (named after the project)
    pub namespace: String,
    /// Program run by the command deployer; receives `DOCKYARD_IMAGE` and
    /// `DOCKYARD_PROJECT` in its environment
    pub deploy_command: Option<String>,
}

impl DeployerConfig {
    pub fn from_env() -> Self {
        Self {
            kind: DeployerKind::parse(&env::var("DOCKYARD_DEPLOYER").unwrap_or_default()),
            kubeconfig_path: env::var("KUBECONFIG").ok().map(PathBuf::from),
            in_cluster: env_flag("DOCKYARD_IN_CLUSTER"),
            namespace: env::var("DOCKYARD_NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            deploy_command: env::var("DOCKYARD_DEPLOY_COMMAND").ok(),
        }
    }
}
