//! Per-execution staging directories.
//!
//! A `Workspace` is exclusively owned by one execution. It holds the input
//! file, the source file and the rendered build recipe, and doubles as the
//! image build context.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::executors::ExecutionRequest;
use crate::templates::{LanguageTemplate, INPUT_FILE_NAME, RECIPE_FILE_NAME};

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    name: String,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pack the workspace into a tar archive to use as a build context.
    pub fn archive(&self) -> io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        builder.append_dir_all(".", self.path())?;
        builder.into_inner()
    }
}

/// Creates and destroys workspaces under an optional root directory.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    root: Option<PathBuf>,
}

impl WorkspaceManager {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Create an empty, uniquely named directory.
    pub fn create(&self) -> io::Result<Workspace> {
        let prefix = format!("runbox-{}-", Uuid::new_v4());
        let mut builder = Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let name = dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(prefix);
        log::debug!("Created workspace {}", dir.path().display());
        Ok(Workspace { dir, name })
    }

    /// Write the input file, the verbatim source and the build recipe.
    pub async fn materialize(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        template: &LanguageTemplate,
    ) -> io::Result<()> {
        write_file(
            &workspace.path().join(INPUT_FILE_NAME),
            request.standard_input.as_deref().unwrap_or(""),
        )
        .await?;
        write_file(
            &workspace.path().join(&template.source_file_name),
            &request.source_code,
        )
        .await?;
        write_file(
            &workspace.path().join(RECIPE_FILE_NAME),
            &template.recipe.render(),
        )
        .await?;
        Ok(())
    }

    /// Remove the workspace recursively. Failures are logged and handed back
    /// so the caller can record them; they never fail an execution.
    pub fn destroy(&self, workspace: Workspace) -> Result<(), io::Error> {
        let path = workspace.path().to_path_buf();
        match workspace.dir.close() {
            Ok(()) => {
                log::debug!("Removed workspace {}", path.display());
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to delete workspace {}: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

async fn write_file(path: &Path, content: &str) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
