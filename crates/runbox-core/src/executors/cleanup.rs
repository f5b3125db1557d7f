//! Cleanup Coordinator: tears down whatever one execution acquired.
//!
//! Teardown order is container, then image, then workspace. Each removal is
//! attempted regardless of how the previous one went; failures become
//! warnings and never change the execution's outcome.

use std::fmt;

use super::runner::ContainerHandle;
use crate::runtime::{bounded, ContainerRuntime};
use crate::workspace::{Workspace, WorkspaceManager};

/// Everything an execution has created so far.
#[derive(Debug, Default)]
pub struct AcquiredResources {
    pub workspace: Option<Workspace>,
    /// Built image id, or the requested tag while the build has not succeeded.
    pub image: Option<String>,
    pub container: Option<ContainerHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTarget {
    Container,
    Image,
    Workspace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub target: CleanupTarget,
    pub resource: String,
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.target {
            CleanupTarget::Container => "container",
            CleanupTarget::Image => "image",
            CleanupTarget::Workspace => "workspace",
        };
        write!(f, "Failed to remove {} {}: {}", kind, self.resource, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub container_removed: bool,
    pub image_removed: bool,
    pub workspace_removed: bool,
    pub warnings: Vec<CleanupWarning>,
}

pub struct CleanupCoordinator<'a> {
    runtime: &'a dyn ContainerRuntime,
    workspaces: &'a WorkspaceManager,
}

impl<'a> CleanupCoordinator<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, workspaces: &'a WorkspaceManager) -> Self {
        Self {
            runtime,
            workspaces,
        }
    }

    pub async fn cleanup(&self, resources: AcquiredResources) -> CleanupReport {
        let mut report = CleanupReport::default();

        if let Some(container) = &resources.container {
            let removed =
                bounded("remove_container", self.runtime.remove_container(&container.id)).await;
            match removed {
                Ok(()) => report.container_removed = true,
                Err(e) => report.warn(CleanupTarget::Container, &container.name, e.to_string()),
            }
        }

        if let Some(image) = &resources.image {
            match bounded("remove_image", self.runtime.remove_image(image)).await {
                Ok(()) => report.image_removed = true,
                Err(e) => report.warn(CleanupTarget::Image, image, e.to_string()),
            }
        }

        if let Some(workspace) = resources.workspace {
            let name = workspace.name().to_string();
            match self.workspaces.destroy(workspace) {
                Ok(()) => report.workspace_removed = true,
                Err(e) => report.warn(CleanupTarget::Workspace, &name, e.to_string()),
            }
        }

        report
    }
}

impl CleanupReport {
    fn warn(&mut self, target: CleanupTarget, resource: &str, message: String) {
        let warning = CleanupWarning {
            target,
            resource: resource.to_string(),
            message,
        };
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }
}
