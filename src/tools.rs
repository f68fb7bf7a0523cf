//! Runtime tool path resolution
//!
//! For each external tool (e.g., `kubectl`), we:
//! 1. Check for an environment variable `{TOOL}_BIN` (e.g., `KUBECTL_BIN`)
//! 2. Fall back to PATH-based invocation if the envvar is not set
//!
//! This lets a packaging layer pin exact tool binaries while plain PATH
//! lookup keeps working on developer machines.

use std::env;
use std::path::PathBuf;

use crate::error::PreflightError;

pub const KUBECTL: &str = "kubectl";
pub const SKOPEO: &str = "skopeo";

/// Name of the environment variable overriding `tool`'s path
pub fn tool_env_var(tool: &str) -> String {
    format!("{}_BIN", tool.to_uppercase())
}

/// Get the path to an external tool
///
/// Returns the value of `{TOOL}_BIN` when set, otherwise the bare tool name
/// which relies on PATH.
pub fn get_tool_path(tool: &str) -> String {
    env::var(tool_env_var(tool)).unwrap_or_else(|_| tool.to_string())
}

/// Resolve a tool to an executable path, failing when it cannot be found
pub fn locate(tool: &str) -> Result<PathBuf, PreflightError> {
    which::which(get_tool_path(tool)).map_err(|_| PreflightError::ToolMissing {
        tool: tool.to_string(),
        env_var: tool_env_var(tool),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_tool_path_from_env() {
        env::set_var("KDEPLOY_TEST_TOOL_BIN", "/custom/path/to/tool");
        assert_eq!(get_tool_path("kdeploy_test_tool"), "/custom/path/to/tool");
        env::remove_var("KDEPLOY_TEST_TOOL_BIN");
    }

    #[test]
    fn test_get_tool_path_fallback() {
        env::remove_var("MISSING_TOOL_BIN");
        assert_eq!(get_tool_path("missing_tool"), "missing_tool");
    }

    #[test]
    fn test_locate_missing_tool_is_preflight_error() {
        env::remove_var("DEFINITELY_NOT_INSTALLED_KDEPLOY_BIN");
        let err = locate("definitely_not_installed_kdeploy").unwrap_err();
        assert!(err.to_string().contains("DEFINITELY_NOT_INSTALLED_KDEPLOY_BIN"));
    }
}
