//! Pipeline file loader
//!
//! Load pipeline YAML definitions from a file or a directory.

use std::path::Path;

use super::PipelineDefinition;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },
}

pub struct PipelineLoader;

impl PipelineLoader {
    /// Load every `.yaml`/`.yml` file in a directory, sorted by file name
    pub fn load_directory(dir: &Path) -> Result<Vec<PipelineDefinition>, LoadError> {
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if path.is_file() && matches!(ext, Some("yaml") | Some("yml")) {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|path| Self::load_file(path)).collect()
    }

    pub fn load_file(path: &Path) -> Result<PipelineDefinition, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_str(&content, &path.display().to_string())
    }

    /// Parse a definition from YAML text; `source` names it in errors
    pub fn load_str(content: &str, source: &str) -> Result<PipelineDefinition, LoadError> {
        serde_yaml::from_str(content).map_err(|e| LoadError::Yaml {
            file: source.to_string(),
            error: e,
        })
    }
}
