//! Filesystem egress provider.

use super::provider::{EgressArtifactSettings, EgressProvider, EgressSource};
use super::EgressError;
use async_trait::async_trait;
use dm_protocol::config_models::FileSystemEgressProviderOptions;
use std::path::{Path, PathBuf};
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;

/// Writes artifacts into a local directory.
///
/// With an intermediate directory configured, the artifact is written there
/// and renamed into the target directory only once it is complete. Partial
/// files are removed on failure either way.
pub struct FileSystemEgressProvider {
    options: FileSystemEgressProviderOptions,
}

impl FileSystemEgressProvider {
    pub fn new(options: FileSystemEgressProviderOptions) -> Self {
        Self { options }
    }

    async fn write_file(
        &self,
        path: &Path,
        source: EgressSource,
        token: CancellationToken,
    ) -> Result<(), EgressError> {
        let file = tokio::fs::File::create(path).await.map_err(|e| {
            EgressError::provider("filesystem", format!("cannot create {}: {e}", path.display()))
        })?;

        let mut output = match self.options.copy_buffer_size {
            Some(size) if size > 0 => BufWriter::with_capacity(size, file),
            _ => BufWriter::new(file),
        };
        source.write_into(&mut output, token).await
    }
}

/// A file being written. Removed on drop unless disarmed, which covers an
/// egress future dropped mid-write as well as an error return.
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "partial artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot remove partial artifact");
            }
        }
    }
}

/// Artifact names never escape the configured directory.
fn sanitize_file_name(name: &str) -> String {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if file_name.is_empty() || file_name == ".." {
        "artifact".to_string()
    } else {
        file_name
    }
}

async fn ensure_directory(path: &Path) -> Result<(), EgressError> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        EgressError::provider(
            "filesystem",
            format!("cannot create directory {}: {e}", path.display()),
        )
    })
}

#[async_trait]
impl EgressProvider for FileSystemEgressProvider {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    async fn egress(
        &self,
        source: EgressSource,
        settings: &EgressArtifactSettings,
        token: CancellationToken,
    ) -> Result<String, EgressError> {
        let file_name = sanitize_file_name(&settings.name);
        ensure_directory(&self.options.directory_path).await?;
        let target: PathBuf = self.options.directory_path.join(&file_name);

        let staging = match &self.options.intermediate_directory_path {
            Some(intermediate) => {
                ensure_directory(intermediate).await?;
                intermediate.join(&file_name)
            }
            None => target.clone(),
        };

        let partial = PartialFile::new(staging.clone());
        self.write_file(&staging, source, token).await?;

        if staging != target {
            tokio::fs::rename(&staging, &target).await.map_err(|e| {
                EgressError::provider(
                    "filesystem",
                    format!("cannot move artifact into {}: {e}", target.display()),
                )
            })?;
        }
        partial.disarm();

        tracing::debug!(path = %target.display(), "artifact written");
        Ok(target.to_string_lossy().into_owned())
    }
}
