//! Preflight lookup of the external tools a pipeline declares

use std::path::PathBuf;

/// Result of looking up one tool on PATH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

/// Resolve each tool with `which`
pub fn check_tools(tools: &[String]) -> Vec<ToolStatus> {
    tools
        .iter()
        .map(|name| ToolStatus {
            name: name.clone(),
            path: which::which(name).ok(),
        })
        .collect()
}

/// Names of tools that could not be found
pub fn missing_tools(tools: &[String]) -> Vec<String> {
    check_tools(tools)
        .into_iter()
        .filter(|status| !status.is_available())
        .map(|status| status.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh_is_available() {
        let statuses = check_tools(&["sh".to_string()]);
        assert!(statuses[0].is_available());
    }

    #[test]
    fn test_missing_tool() {
        let missing = missing_tools(&[
            "sh".to_string(),
            "definitely-not-a-real-tool-7f3a".to_string(),
        ]);
        assert_eq!(missing, vec!["definitely-not-a-real-tool-7f3a".to_string()]);
    }
}
