//! Invocation context handed to the resolver alongside the raw specification

use std::collections::BTreeMap;

/// Identity of the source repository being deployed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitIdentity {
    /// Hosting source, e.g. `github.com`
    pub source: String,
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub revision: String,
}

/// Release metadata from the CI system
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseMetadata {
    /// Release target name, e.g. `production`
    pub name: String,
    pub action: String,
    pub id: String,
    pub triggered_by: String,
}

/// Everything besides the specification document that feeds the defaulting pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveContext {
    pub git: GitIdentity,
    pub build_version: String,
    pub release: ReleaseMetadata,
    /// Already sanitized labels derived from the environment
    pub labels: BTreeMap<String, String>,
}
