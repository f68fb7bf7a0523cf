use anyhow::{Context, Result};
use colored::Colorize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cli::{InputArgs, OutputArgs};
use crate::config;
use crate::domain::Kind;
use crate::infrastructure::{Kubectl, SkopeoDigestResolver, TemplateRenderer};
use crate::k8s::KubeReplicaObserver;
use crate::services::{DeployService, RolloutOptions, RolloutOrchestrator};
use crate::tools;

pub async fn execute(
    input: InputArgs,
    output: OutputArgs,
    dry_run: bool,
    timeout: Option<Duration>,
    drain_interval: Duration,
    pin_sidecar_digests: bool,
    skip_replica_lookup: bool,
) -> Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);

    println!();
    println!(
        "{}",
        "╔════════════════════════════════════════════════════════════╗"
            .bright_cyan()
            .bold()
    );
    println!(
        "{}",
        "║  kdeploy - Rollout                                         ║"
            .bright_cyan()
            .bold()
    );
    println!(
        "{}",
        "╚════════════════════════════════════════════════════════════╝"
            .bright_cyan()
            .bold()
    );
    println!();

    let spec = config::load_spec(&input.spec, input.credentials.as_deref())
        .with_context(|| format!("Failed to load specification {}", input.spec.display()))?;
    let context = input.context.into_context();

    info!("📄 Specification: {}", input.spec.display());
    info!("📁 Output: {}", output.output_dir.display());
    if let Some(timeout) = timeout {
        info!("⏱️  Timeout: {}", humantime::format_duration(timeout));
    }
    if dry_run {
        info!("🧪 Dry run, the cluster will not be changed");
    }

    // config-to-file never reaches the cluster
    let needs_cluster = spec.kind != Some(Kind::ConfigToFile);
    let kubectl = if needs_cluster {
        let path = tools::locate(tools::KUBECTL)?;
        info!("🔧 kubectl: {}", path.display());
        Kubectl::with_binary(path.display().to_string())
    } else {
        Kubectl::new()
    };

    let renderer = TemplateRenderer::new(&output.templates_dir);
    let mut service =
        DeployService::new(context, Box::new(renderer)).with_work_dir(&output.work_dir);

    if pin_sidecar_digests {
        service = service.with_digest_resolver(Box::new(SkopeoDigestResolver::new()));
    }

    if needs_cluster && !skip_replica_lookup {
        match KubeReplicaObserver::connect().await {
            Ok(observer) => service = service.with_observer(Box::new(observer)),
            Err(e) => warn!("Kubernetes API unavailable, replica lookup disabled: {:#}", e),
        }
    }

    let options = RolloutOptions::new(&output.output_dir)
        .with_dry_run(dry_run)
        .with_drain_interval(drain_interval)
        .with_deadline(deadline);
    let orchestrator = RolloutOrchestrator::new(kubectl, options);

    service.deploy(spec, &orchestrator).await?;
    Ok(())
}
