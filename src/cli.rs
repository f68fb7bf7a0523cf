//! CLI definitions for kdeploy
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config;
use crate::domain::{GitIdentity, ReleaseMetadata, ResolveContext};

#[derive(Parser)]
#[command(
    name = "kdeploy",
    version,
    about = "Rollout orchestrator for Kubernetes applications",
    long_about = "Turns a declarative application specification into rendered Kubernetes manifests\nand drives them onto the cluster as simple, canary, stable or atomic rollouts."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve, render and roll out a specification
    Deploy {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Validate against the cluster and stop before applying
        #[arg(long)]
        dry_run: bool,

        /// Abort the rollout after this long (e.g. 15m)
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Wait between an atomic service switch and deleting old generations
        #[arg(long, default_value = "20s", value_parser = humantime::parse_duration)]
        drain_interval: Duration,

        /// Pin sidecar images to registry digests with skopeo
        #[arg(long, env = "DEPLOY_PIN_SIDECAR_DIGESTS")]
        pin_sidecar_digests: bool,

        /// Skip reading the live replica count from the cluster
        #[arg(long)]
        skip_replica_lookup: bool,
    },

    /// Resolve and validate a specification, printing every error
    Validate {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Resolve and render manifests without touching the cluster
    Render {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// Where the specification comes from
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Specification document (YAML or JSON)
    #[arg(long, env = "DEPLOY_SPEC", default_value = "deploy.yaml")]
    pub spec: PathBuf,

    /// Credentials file supplying specification defaults
    #[arg(long, env = "DEPLOY_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    #[command(flatten)]
    pub context: ContextArgs,
}

/// Where rendered output goes
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Built-in manifest templates
    #[arg(long, env = "DEPLOY_TEMPLATES_DIR", default_value = "templates")]
    pub templates_dir: PathBuf,

    /// Directory receiving the rendered manifests
    #[arg(long, default_value = "/tmp")]
    pub output_dir: PathBuf,

    /// Directory receiving config files for kind config-to-file
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,
}

/// Release context handed over by the CI system
#[derive(Args, Debug, Clone)]
pub struct ContextArgs {
    /// Git hosting source, e.g. github.com
    #[arg(long, env = "GIT_SOURCE", default_value = "")]
    pub git_source: String,

    /// Git repository owner
    #[arg(long, env = "GIT_OWNER", default_value = "")]
    pub git_owner: String,

    /// Git repository name, the default application name
    #[arg(long, env = "GIT_NAME", default_value = "")]
    pub git_name: String,

    #[arg(long, env = "GIT_BRANCH", default_value = "")]
    pub git_branch: String,

    #[arg(long, env = "GIT_REVISION", default_value = "")]
    pub git_revision: String,

    /// Build version, the default image tag
    #[arg(long, env = "BUILD_VERSION", default_value = "")]
    pub build_version: String,

    /// Release target name, e.g. production
    #[arg(long, env = "RELEASE_NAME", default_value = "")]
    pub release_name: String,

    /// Release action, e.g. deploy-canary
    #[arg(long, env = "RELEASE_ACTION", default_value = "")]
    pub release_action: String,

    /// Release id; generated when empty
    #[arg(long, env = "RELEASE_ID", default_value = "")]
    pub release_id: String,

    #[arg(long, env = "RELEASE_TRIGGERED_BY", default_value = "")]
    pub release_triggered_by: String,
}

impl ContextArgs {
    /// Resolver context, with labels taken from the process environment
    pub fn into_context(self) -> ResolveContext {
        config::build_context(
            GitIdentity {
                source: self.git_source,
                owner: self.git_owner,
                name: self.git_name,
                branch: self.git_branch,
                revision: self.git_revision,
            },
            self.build_version,
            ReleaseMetadata {
                name: self.release_name,
                action: self.release_action,
                id: self.release_id,
                triggered_by: self.release_triggered_by,
            },
            std::env::vars(),
        )
    }
}
