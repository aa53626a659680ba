//! Artifact archival
//!
//! Resolves a glob relative to the run workspace and registers the matches
//! as a named [`ArtifactHandle`], so later stages (image build, deploy) can
//! locate build outputs without re-deriving them.
//!
//! ```yaml
//! - uses: artifact/archive
//!   with:
//!     name: jar
//!     pattern: "target/*.jar"
//!     fingerprint: true
//! ```

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::engine::error::StageError;
use crate::pipeline::ArtifactHandle;

/// Options for one archive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub name: String,
    pub pattern: String,
    pub fingerprint: bool,
    pub allow_empty: bool,
}

/// Resolve `request.pattern` under `workspace` into an artifact handle
///
/// Paths in the handle are relative to the workspace and sorted.
pub async fn archive(workspace: &Path, request: &ArchiveRequest) -> Result<ArtifactHandle, StageError> {
    let root = glob::Pattern::escape(&workspace.to_string_lossy());
    let full_pattern = format!("{}/{}", root.trim_end_matches('/'), request.pattern);

    let entries = glob::glob(&full_pattern).map_err(|e| {
        StageError::Config(format!("invalid artifact pattern '{}': {}", request.pattern, e))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StageError::Io(e.into_error()))?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() && !request.allow_empty {
        return Err(StageError::ActionFailed(format!(
            "No artifacts matched '{}'",
            request.pattern
        )));
    }

    let mut fingerprints = BTreeMap::new();
    if request.fingerprint {
        for path in &paths {
            let digest = fingerprint(path).await?;
            fingerprints.insert(relative_to(workspace, path), digest);
        }
    }

    Ok(ArtifactHandle {
        name: request.name.clone(),
        pattern: request.pattern.clone(),
        paths: paths.iter().map(|p| relative_to(workspace, p)).collect(),
        fingerprints,
    })
}

/// SHA-256 of a file's contents, hex encoded
pub async fn fingerprint(path: &Path) -> Result<String, StageError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn relative_to(workspace: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(workspace)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
