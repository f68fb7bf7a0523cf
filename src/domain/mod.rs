//! Domain layer - pure business logic
//!
//! This module contains the rollout decision logic with no external I/O:
//! defaulting and validation, template selection, template data projection
//! and the rollout plan tables. Everything here can be unit tested without
//! a cluster.

pub mod context;
pub mod labels;
pub mod manifests;
pub mod resolver;
pub mod rollout;
pub mod spec;
pub mod template_data;
pub mod validation;

// Re-export commonly used types
pub use context::{GitIdentity, ReleaseMetadata, ResolveContext};
pub use manifests::select_templates;
pub use resolver::{resolve, Resolution};
pub use rollout::{Operation, PlanFacts, RolloutState};
pub use spec::{Action, Kind, ResolvedSpec, Spec, StrategyType, Visibility};
pub use template_data::{build_template_data, TemplateData};
