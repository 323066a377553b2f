//! Deployers: roll an image out to a project's runtime.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use kube::{
    api::{Api, Patch, PatchParams},
    config::{Config, KubeConfigOptions, Kubeconfig},
    Client,
};
use tokio::process::Command;

use crate::config::DeployerConfig;
use crate::error::Result;
use crate::services::collaborators::{
    exit_message, run_streaming, CollaboratorError, DeployRequest, Deployer,
};
use crate::services::log_sink::LogWriter;

/// Annotation recording which deployment record last patched a workload
pub const DEPLOYMENT_ID_ANNOTATION: &str = "dockyard.io/deployment-id";

// ============================================================================
// Kubernetes
// ============================================================================

/// Where a Deployment's rollout stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutState {
    Complete,
    Progressing { updated: i32, available: i32, desired: i32 },
    Failed(String),
}

/// Read rollout progress the way `kubectl rollout status` does
pub fn rollout_state(deployment: &K8sDeployment) -> RolloutState {
    let generation = deployment.metadata.generation.unwrap_or(0);
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);

    let Some(status) = deployment.status.as_ref() else {
        return RolloutState::Progressing {
            updated: 0,
            available: 0,
            desired,
        };
    };

    let stalled = status.conditions.as_ref().and_then(|conditions| {
        conditions.iter().find(|c| {
            c.type_ == "Progressing" && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        })
    });
    if let Some(condition) = stalled {
        return RolloutState::Failed(
            condition
                .message
                .clone()
                .unwrap_or_else(|| "progress deadline exceeded".to_string()),
        );
    }

    let observed = status.observed_generation.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);

    if observed >= generation && updated >= desired && available >= desired && total <= updated {
        RolloutState::Complete
    } else {
        RolloutState::Progressing {
            updated,
            available,
            desired,
        }
    }
}

/// Patches the image of the Deployment named after the project and waits for
/// the rollout to finish.
pub struct KubernetesDeployer {
    client: Client,
    namespace: String,
    poll_interval: Duration,
}

impl KubernetesDeployer {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Build a client from in-cluster config, an explicit kubeconfig or the
    /// default kubeconfig, in that order
    pub async fn connect(config: &DeployerConfig) -> Result<Self> {
        let client = if config.in_cluster {
            let kube_config = Config::incluster()?;
            Client::try_from(kube_config)?
        } else if let Some(ref kubeconfig_path) = config.kubeconfig_path {
            let kubeconfig = Kubeconfig::read_from(kubeconfig_path)?;
            let kube_config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
            Client::try_from(kube_config)?
        } else {
            Client::try_default().await?
        };

        Ok(Self::new(client, config.namespace.clone()))
    }

    fn classify(error: kube::Error) -> CollaboratorError {
        match error {
            kube::Error::Api(ae) if ae.code == 404 => {
                CollaboratorError::failed(format!("deployment not found: {}", ae.message))
            }
            kube::Error::Api(ae) if ae.code >= 500 || ae.code == 429 => {
                CollaboratorError::transient(format!("Kubernetes API error: {}", ae.message))
            }
            kube::Error::Api(ae) => {
                CollaboratorError::failed(format!("Kubernetes API error: {}", ae.message))
            }
            other => CollaboratorError::transient(format!("Kubernetes error: {}", other)),
        }
    }
}

#[async_trait]
impl Deployer for KubernetesDeployer {
    async fn deploy(
        &self,
        request: &DeployRequest,
        log: LogWriter,
    ) -> std::result::Result<(), CollaboratorError> {
        let deployments: Api<K8sDeployment> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let name = &request.project;

        let current = deployments.get(name).await.map_err(Self::classify)?;
        let container = current
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| s.containers.first())
            .map(|c| c.name.clone())
            .ok_or_else(|| {
                CollaboratorError::failed(format!("deployment {} has no containers", name))
            })?;

        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            (DEPLOYMENT_ID_ANNOTATION): request.deployment_id.to_string()
                        }
                    },
                    "spec": {
                        "containers": [{ "name": container, "image": request.image_ref }]
                    }
                }
            }
        });

        log.line(format!(
            "Setting {}/{} container {} image to {}",
            self.namespace, name, container, request.image_ref
        ));
        deployments
            .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map_err(Self::classify)?;

        let mut last = None;
        loop {
            let deployment = deployments.get(name).await.map_err(Self::classify)?;
            let state = rollout_state(&deployment);

            if last.as_ref() != Some(&state) {
                match &state {
                    RolloutState::Complete => {
                        log.line(format!("Rollout of {} complete", name));
                        return Ok(());
                    }
                    RolloutState::Failed(reason) => {
                        log.line(format!("Rollout of {} failed: {}", name, reason));
                        return Err(CollaboratorError::failed(format!(
                            "rollout failed: {}",
                            reason
                        )));
                    }
                    RolloutState::Progressing {
                        updated,
                        available,
                        desired,
                    } => log.line(format!(
                        "Waiting for rollout: {}/{} updated, {}/{} available",
                        updated, desired, available, desired
                    )),
                }
                last = Some(state);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// Runs a shell command with the image and project in its environment
pub struct CommandDeployer {
    command: String,
}

impl CommandDeployer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(
        &self,
        request: &DeployRequest,
        log: LogWriter,
    ) -> std::result::Result<(), CollaboratorError> {
        log.line(format!("$ {}", self.command));

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .env("DOCKYARD_IMAGE", &request.image_ref)
            .env("DOCKYARD_PROJECT", &request.project)
            .env("DOCKYARD_DEPLOYMENT_ID", request.deployment_id.to_string());

        let status = run_streaming(&mut command, &log).await?;
        if status.success() {
            Ok(())
        } else {
            Err(CollaboratorError::failed(exit_message(
                "deploy command",
                status,
            )))
        }
    }
}
