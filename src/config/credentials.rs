//! Credential-supplied defaults.
//!
//! A credentials file holds named credentials, each optionally carrying a
//! `defaults` document merged underneath the specification:
//!
//! ```yaml
//! credentials:
//!   - name: gke-production
//!     type: kubernetes-engine
//!     defaults:
//!       namespace: payments
//!       container:
//!         repository: eu.gcr.io/acme
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::debug;

use crate::error::ConfigError;

/// One named credential
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,

    #[serde(default)]
    pub r#type: String,

    /// Specification fields applied where the specification leaves them out
    #[serde(default)]
    pub defaults: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsFile {
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl CredentialsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let document = super::read_yaml(path)?;
        serde_yaml::from_value(document).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Defaults of the credential named `name`.
    ///
    /// An empty name selects the only credential present; with several
    /// credentials and no name nothing is merged.
    pub fn defaults_for(&self, name: &str) -> Result<Option<&Value>, ConfigError> {
        let credential = if name.is_empty() {
            match self.credentials.as_slice() {
                [only] => only,
                _ => return Ok(None),
            }
        } else {
            self.credentials
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| ConfigError::CredentialNotFound {
                    name: name.to_string(),
                })?
        };

        debug!("Using defaults of credential {}", credential.name);
        Ok(match &credential.defaults {
            Value::Null => None,
            defaults => Some(defaults),
        })
    }
}

/// Merge `overlay` onto `base`, recursing into mappings. Overlay values win;
/// an explicit null in the overlay keeps the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            let mut merged: Mapping = base;
            for (key, value) in overlay {
                match merged.get_mut(&key) {
                    Some(existing) => {
                        let current = std::mem::take(existing);
                        *existing = deep_merge(current, value);
                    }
                    None => {
                        merged.insert(key, value);
                    }
                }
            }
            Value::Mapping(merged)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}
