//! Centralized error types for kdeploy
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;

use crate::domain::RolloutState;

/// Top-level error type for a rollout invocation
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Specification error: {0}")]
    Specification(#[from] SpecificationError),

    #[error("Preflight error: {0}")]
    Preflight(#[from] PreflightError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Rollout timeout: {0}")]
    Timeout(#[from] RolloutTimeoutError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rollout cancelled during {state}; cluster left as last applied")]
    Cancelled { state: RolloutState },
}

/// All validation errors of a specification, reported together
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} validation error(s):\n  - {}", errors.len(), errors.join("\n  - "))]
pub struct SpecificationError {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Failures before anything was mutated
#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("{tool} not found on PATH. Install it or set {env_var}")]
    ToolMissing { tool: String, env_var: String },

    #[error("Client-side dry-run rejected the manifest: {message}")]
    DryRunFailed { message: String },

    #[error("Diff against the cluster failed: {message}")]
    DiffFailed { message: String },
}

/// Cluster mutations that failed and stop the rollout
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Repairing {resource} failed: {message}")]
    RepairFailed { resource: String, message: String },

    #[error("Applying {manifest} failed: {message}")]
    ApplyFailed { manifest: String, message: String },

    #[error("Operation '{operation}' failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Atomic service cutover failed: {message}")]
    CutoverFailed { message: String },
}

/// The workload did not settle within its progress deadline
#[derive(Error, Debug)]
#[error("Rollout of {resource} did not settle within {timeout_secs}s: {message}")]
pub struct RolloutTimeoutError {
    pub resource: String,
    pub timeout_secs: u64,
    pub message: String,
}

/// Best-effort cleanup failure; logged, never surfaced
#[derive(Error, Debug)]
#[error("Cleanup '{operation}' failed: {message}")]
pub struct CleanupError {
    pub operation: String,
    pub message: String,
}

/// Registry digest lookup failure; the image keeps its tag
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("Inspecting {image} failed: {message}")]
    InspectFailed { image: String, message: String },

    #[error("Registry returned no digest for {image}")]
    MissingDigest { image: String },
}

/// Template rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Template not found: {id}")]
    TemplateNotFound { id: String },

    #[error("Failed to render {id}: {message}")]
    Template { id: String, message: String },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures invoking kubectl
#[derive(Error, Debug)]
pub enum KubectlError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Credential '{name}' not found in credentials file")]
    CredentialNotFound { name: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}
