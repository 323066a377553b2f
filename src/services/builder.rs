//! Image builder that shells out to git and a container CLI.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::BuilderConfig;
use crate::services::collaborators::{
    exit_message, run_streaming, BuildOutput, BuildRequest, Builder, CollaboratorError,
};
use crate::services::log_sink::LogWriter;

/// Image reference for a project at a commit
pub fn image_ref(repository: &str, project: &str, commit_hash: &str) -> String {
    format!(
        "{}/{}:{}",
        repository.trim_end_matches('/'),
        project,
        commit_hash
    )
}

/// Clones the commit and runs `<cli> build` (and `<cli> push`).
///
/// Clone and push failures are treated as transient since they are usually
/// network trouble; a failing build is not.
pub struct CommandBuilder {
    config: BuilderConfig,
}

impl CommandBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    fn checkout_dir(&self, request: &BuildRequest) -> PathBuf {
        self.config
            .workspace_dir
            .join(format!("{}-{}", request.project, request.deployment_id))
    }

    async fn checkout(
        &self,
        request: &BuildRequest,
        dir: &Path,
        log: &LogWriter,
    ) -> Result<(), CollaboratorError> {
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
        tokio::fs::create_dir_all(&self.config.workspace_dir)
            .await
            .map_err(|e| CollaboratorError::failed(format!("cannot create workspace: {}", e)))?;

        log.line(format!(
            "$ git clone --branch {} {}",
            request.branch, request.repository_url
        ));
        let mut clone = Command::new("git");
        clone
            .arg("clone")
            .arg("--branch")
            .arg(&request.branch)
            .arg(&request.repository_url)
            .arg(dir);
        let status = run_streaming(&mut clone, log).await?;
        if !status.success() {
            return Err(CollaboratorError::transient(exit_message("git clone", status)));
        }

        log.line(format!("$ git checkout {}", request.commit_hash));
        let mut checkout = Command::new("git");
        checkout
            .arg("-C")
            .arg(dir)
            .arg("checkout")
            .arg("--detach")
            .arg(&request.commit_hash);
        let status = run_streaming(&mut checkout, log).await?;
        if !status.success() {
            return Err(CollaboratorError::failed(format!(
                "commit {} not found on {}: {}",
                request.commit_hash,
                request.branch,
                exit_message("git checkout", status)
            )));
        }

        Ok(())
    }

    async fn build_image(
        &self,
        image: &str,
        dir: &Path,
        log: &LogWriter,
    ) -> Result<(), CollaboratorError> {
        let cli = &self.config.command;

        log.line(format!("$ {} build -t {} .", cli, image));
        let mut build = Command::new(cli);
        build.arg("build").arg("-t").arg(image).arg(dir);
        let status = run_streaming(&mut build, log).await?;
        if !status.success() {
            return Err(CollaboratorError::failed(exit_message(
                &format!("{} build", cli),
                status,
            )));
        }

        if self.config.push {
            log.line(format!("$ {} push {}", cli, image));
            let mut push = Command::new(cli);
            push.arg("push").arg(image);
            let status = run_streaming(&mut push, log).await?;
            if !status.success() {
                return Err(CollaboratorError::transient(exit_message(
                    &format!("{} push", cli),
                    status,
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    async fn build(
        &self,
        request: &BuildRequest,
        log: LogWriter,
    ) -> Result<BuildOutput, CollaboratorError> {
        let image = image_ref(
            &self.config.image_repository,
            &request.project,
            &request.commit_hash,
        );
        let dir = self.checkout_dir(request);

        let result = async {
            self.checkout(request, &dir, &log).await?;
            self.build_image(&image, &dir, &log).await
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::debug!(path = %dir.display(), "Failed to clean build workspace: {}", e);
        }

        result?;
        log.line(format!("Built {}", image));
        Ok(BuildOutput { image_ref: image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_format() {
        assert_eq!(image_ref("registry", "app", "abc123"), "registry/app:abc123");
        assert_eq!(
            image_ref("registry.local/apps/", "web", "deadbeef"),
            "registry.local/apps/web:deadbeef"
        );
    }
}
