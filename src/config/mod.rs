//! # Invocation configuration
//!
//! Loading of everything that feeds one rollout besides the cluster itself:
//!
//! 1. **Specification** (`--spec`, `DEPLOY_SPEC`)
//!    - YAML or JSON document deserialized into [`Spec`]
//!
//! 2. **Credentials** (`--credentials`, `DEPLOY_CREDENTIALS`)
//!    - Named credentials, each optionally carrying specification defaults
//!    - The selected credential's defaults are merged under the specification
//!
//! 3. **Context** (git identity, build version, release metadata)
//!    - From CLI arguments with environment fallbacks
//!    - `DEPLOY_LABEL_*` variables become resource labels
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let spec = config::load_spec(Path::new("deploy.yaml"), Some(Path::new("credentials.yaml")))?;
//! ```

mod context;
mod credentials;

pub use context::{build_context, generate_release_id};
pub use credentials::{deep_merge, Credential, CredentialsFile};

use serde_yaml::Value;
use std::path::Path;
use tracing::debug;

use crate::domain::Spec;
use crate::error::ConfigError;

/// Read a YAML (or JSON) document
pub fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load the specification, with credential defaults merged underneath
pub fn load_spec(spec_path: &Path, credentials_path: Option<&Path>) -> Result<Spec, ConfigError> {
    let mut document = read_yaml(spec_path)?;

    if let Some(path) = credentials_path {
        let credentials = CredentialsFile::load(path)?;
        let name = document
            .get("credentials")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if let Some(defaults) = credentials.defaults_for(&name)? {
            debug!("Merging credential defaults from {}", path.display());
            document = deep_merge(defaults.clone(), document);
        }
    }

    // an empty document is an empty specification
    if document.is_null() {
        return Ok(Spec::default());
    }
    serde_yaml::from_value(document).map_err(|e| ConfigError::ParseError {
        path: spec_path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Kind};

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_spec_merges_selected_credential() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(
            dir.path(),
            "deploy.yaml",
            "app: myapp\naction: deploy-canary\ncredentials: gke-production\ncontainer:\n  port: 8080\n",
        );
        let credentials = write(
            dir.path(),
            "credentials.yaml",
            r#"
credentials:
  - name: gke-staging
    defaults:
      namespace: staging
  - name: gke-production
    type: kubernetes-engine
    defaults:
      namespace: production
      kind: statefulset
      container:
        port: 9000
        repository: eu.gcr.io/acme
"#,
        );

        let spec = load_spec(&spec, Some(&credentials)).unwrap();
        assert_eq!(spec.namespace, "production");
        assert_eq!(spec.kind, Some(Kind::Statefulset));
        assert_eq!(spec.action, Some(Action::DeployCanary));
        assert_eq!(spec.container.port, 8080);
        assert_eq!(spec.container.repository, "eu.gcr.io/acme");
    }

    #[test]
    fn test_json_spec_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(dir.path(), "deploy.json", r#"{"app": "myapp", "replicas": 4}"#);
        let spec = load_spec(&spec, None).unwrap();
        assert_eq!(spec.app, "myapp");
        assert_eq!(spec.replicas, 4);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_spec(&dir.path().join("absent.yaml"), None),
            Err(ConfigError::FileNotFound { .. })
        ));

        let broken = write(dir.path(), "broken.yaml", "app: [unterminated\n");
        assert!(matches!(
            load_spec(&broken, None),
            Err(ConfigError::ParseError { .. })
        ));

        let wrong_type = write(dir.path(), "wrong.yaml", "replicas: many\n");
        assert!(matches!(
            load_spec(&wrong_type, None),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
