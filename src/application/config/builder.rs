use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Registry prefix for built images, e.g. `registry.example.com/apps`
    pub image_repository: String,
    /// Container CLI used for `build` and `push` (docker, podman, nerdctl)
    pub command: String,
    /// Directory where source checkouts are created
    pub workspace_dir: PathBuf,
    /// Push the built image after a successful build
    pub push: bool,
}

impl BuilderConfig {
    pub fn from_env() -> Self {
        Self {
            image_repository: env::var("DOCKYARD_IMAGE_REPOSITORY")
                .unwrap_or_else(|_| "registry.local".to_string()),
            command: env::var("DOCKYARD_BUILD_COMMAND").unwrap_or_else(|_| "docker".to_string()),
            workspace_dir: env::var("DOCKYARD_WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("dockyard")),
            push: env::var("DOCKYARD_PUSH_IMAGES")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
        }
    }
}
