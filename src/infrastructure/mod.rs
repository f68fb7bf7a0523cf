//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Kubernetes control plane (kubectl)
//! - Container registries (digests via skopeo)
//! - Manifest templates on disk (minijinja)

pub mod kubectl;
pub mod registry;
pub mod renderer;

// Re-export commonly used types
pub use kubectl::{CommandOutput, CommandRunner, Kubectl};
pub use registry::{pin_sidecar_digests, DigestResolver, SkopeoDigestResolver};
pub use renderer::{ManifestRenderer, TemplateRenderer};
