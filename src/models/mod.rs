pub mod deployment;
pub mod deployment_job;
pub mod deployment_log;
pub mod deployment_notification;
pub mod project;

#[allow(unused_imports)]
pub mod prelude {
    pub use super::deployment::{self, Entity as Deployment};
    pub use super::deployment_job::{self, Entity as DeploymentJob};
    pub use super::deployment_log::{self, Entity as DeploymentLog};
    pub use super::deployment_notification::{self, Entity as DeploymentNotification};
    pub use super::project::{self, Entity as Project};
}
