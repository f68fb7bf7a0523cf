//! Deploy service - runs one invocation end to end
//!
//! Resolves the raw specification, enriches it, selects and renders the
//! manifests and hands them to the [`RolloutOrchestrator`].

use colored::Colorize;
use minijinja::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::domain::labels::{LabelSelector, APP_LABEL};
use crate::domain::manifests::{basename, ATOMIC_SERVICE, NAMESPACE};
use crate::domain::template_data::name_with_track;
use crate::domain::{
    build_template_data, resolve, select_templates, Kind, ResolveContext, ResolvedSpec, Spec,
    TemplateData,
};
use crate::error::{RenderError, RolloutError};
use crate::infrastructure::{pin_sidecar_digests, CommandRunner, DigestResolver, ManifestRenderer};
use crate::k8s::ReplicaObserver;
use crate::services::orchestrator::{RolloutOptions, RolloutOrchestrator, RolloutReport};

/// Everything decided before the cluster is touched
#[derive(Debug, Clone)]
pub struct Prepared {
    pub spec: ResolvedSpec,
    pub data: TemplateData,
    /// Full template list, including the disruption budget
    pub templates: Vec<String>,
    /// Template list used for the diff
    pub no_pdb_templates: Vec<String>,
    pub warnings: Vec<String>,
}

impl Prepared {
    pub fn has_templates(&self) -> bool {
        !self.templates.is_empty()
    }
}

/// Files written for one rollout
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RenderedManifests {
    pub manifest: Option<PathBuf>,
    pub no_pdb_manifest: Option<PathBuf>,
    pub atomic_service: Option<PathBuf>,
}

/// Service running resolve, render and rollout for one specification
pub struct DeployService {
    context: ResolveContext,
    renderer: Box<dyn ManifestRenderer>,
    observer: Option<Box<dyn ReplicaObserver>>,
    digests: Option<Box<dyn DigestResolver>>,
    work_dir: PathBuf,
}

impl DeployService {
    pub fn new(context: ResolveContext, renderer: Box<dyn ManifestRenderer>) -> Self {
        Self {
            context,
            renderer,
            observer: None,
            digests: None,
            work_dir: PathBuf::from("."),
        }
    }

    /// Builder: observe live replica counts
    pub fn with_observer(mut self, observer: Box<dyn ReplicaObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Builder: pin sidecar images to digests
    pub fn with_digest_resolver(mut self, resolver: Box<dyn DigestResolver>) -> Self {
        self.digests = Some(resolver);
        self
    }

    /// Builder: directory receiving config-to-file output
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Resolve, enrich and project the specification without touching the cluster
    pub async fn prepare(&self, raw: Spec) -> Result<Prepared, RolloutError> {
        let (spec, warnings) = resolve(raw, &self.context).into_result()?;
        for warning in &warnings {
            warn!("{} {}", "⚠️".yellow(), warning);
        }

        let spec = match &self.digests {
            Some(resolver) => pin_sidecar_digests(spec, resolver.as_ref()).await,
            None => spec,
        };

        let templates = select_templates(&spec, true);
        let no_pdb_templates = select_templates(&spec, false);
        debug!("Selected templates: {}", templates.join(", "));

        let current_replicas = self.observe_replicas(&spec).await;
        let config_files = self.render_config_files(&spec)?;
        let data = build_template_data(&spec, current_replicas, &self.context)
            .with_config_files(config_files);

        Ok(Prepared {
            spec,
            data,
            templates,
            no_pdb_templates,
            warnings,
        })
    }

    /// Replicas running right now, zero when unknown
    async fn observe_replicas(&self, spec: &Spec) -> i32 {
        let Some(observer) = &self.observer else {
            return 0;
        };
        let action = spec.action();
        if !spec.kind().has_rollout() || !(action.is_deploy() || action.is_diff()) {
            return 0;
        }

        // atomic generations each carry their own name, so look at all of them
        let observed = if spec.is_atomic() {
            let selector = LabelSelector::new().eq(APP_LABEL, &spec.app).to_string();
            observer.max_replicas(&spec.namespace, &selector).await
        } else {
            observer
                .current_replicas(spec.kind(), &spec.namespace, &name_with_track(spec))
                .await
        };

        match observed {
            Ok(Some(replicas)) => {
                info!("Currently running {} replica(s)", replicas);
                replicas
            }
            Ok(None) => 0,
            Err(e) => {
                warn!("Could not read current replicas, keeping configured count: {:#}", e);
                0
            }
        }
    }

    /// Render `configs.files` with `configs.data`, merged over the inline files
    fn render_config_files(&self, spec: &Spec) -> Result<BTreeMap<String, String>, RenderError> {
        let mut files = spec.configs.inline.clone();
        if spec.configs.files.is_empty() {
            return Ok(files);
        }

        let data = Value::from_serialize(&spec.configs.data);
        for path in &spec.configs.files {
            let content = self.renderer.render(path, &data)?;
            files.insert(basename(path).to_string(), content);
        }
        Ok(files)
    }

    /// Render the selected templates into the manifest files named by `options`
    pub fn write_manifests(
        &self,
        prepared: &Prepared,
        options: &RolloutOptions,
    ) -> Result<RenderedManifests, RolloutError> {
        let mut written = RenderedManifests::default();
        let context = Value::from_serialize(&prepared.data);

        // the orchestrator dry-runs even when nothing gets applied
        if !prepared.has_templates() {
            let namespace = self.renderer.render_all(&[NAMESPACE.to_string()], &context)?;
            write_file(&options.manifest_path, &namespace)?;
            written.manifest = Some(options.manifest_path.clone());
            return Ok(written);
        }

        let full = self.renderer.render_all(&prepared.templates, &context)?;
        write_file(&options.manifest_path, &full)?;
        written.manifest = Some(options.manifest_path.clone());

        let no_pdb = self
            .renderer
            .render_all(&prepared.no_pdb_templates, &context)?;
        write_file(&options.no_pdb_manifest_path, &no_pdb)?;
        written.no_pdb_manifest = Some(options.no_pdb_manifest_path.clone());

        if prepared.spec.is_atomic() && prepared.spec.action().is_deploy() {
            let service = self
                .renderer
                .render_all(&[ATOMIC_SERVICE.to_string()], &context)?;
            write_file(&options.atomic_service_path, &service)?;
            written.atomic_service = Some(options.atomic_service_path.clone());
        }

        info!(
            "Rendered {} template(s) to {}",
            prepared.templates.len(),
            options.manifest_path.display()
        );
        Ok(written)
    }

    /// Write the rendered config files into the work directory
    pub fn write_config_files(&self, prepared: &Prepared) -> Result<Vec<PathBuf>, RenderError> {
        let mut written = Vec::new();
        for (name, content) in &prepared.data.config_files {
            let path = self.work_dir.join(name);
            write_file(&path, content)?;
            info!("Wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }

    /// Full invocation: prepare, render, then roll out
    pub async fn deploy<R: CommandRunner>(
        &self,
        raw: Spec,
        orchestrator: &RolloutOrchestrator<R>,
    ) -> Result<RolloutReport, RolloutError> {
        let prepared = self.prepare(raw).await?;

        if prepared.spec.kind() == Kind::ConfigToFile {
            let written = self.write_config_files(&prepared)?;
            info!(
                "{} Wrote {} config file(s), nothing to roll out",
                "✅".green(),
                written.len()
            );
            return Ok(RolloutReport::default());
        }

        self.write_manifests(&prepared, orchestrator.options())?;
        let result = orchestrator
            .execute(&prepared.spec, &prepared.data, prepared.has_templates())
            .await;
        self.print_summary(&prepared, &result);
        result
    }

    fn print_summary(&self, prepared: &Prepared, result: &Result<RolloutReport, RolloutError>) {
        let target = format!("{}/{}", prepared.spec.namespace, prepared.data.name_with_track);
        println!();
        println!(
            "{}",
            "════════════════════════════════════════════════════════════".bright_blue()
        );

        match result {
            Ok(report) => {
                println!(
                    "{}",
                    format!("✅ {} completed: {}", prepared.spec.action(), target)
                        .bright_green()
                        .bold()
                );
                let path: Vec<&str> = report.visited.iter().map(|s| s.name()).collect();
                println!("   {}", path.join(" → "));
                for failure in &report.cleanup_failures {
                    println!("   {} {}", "⚠️".yellow(), failure);
                }
            }
            Err(e) => {
                println!(
                    "{}",
                    format!("❌ {} failed: {}", prepared.spec.action(), target)
                        .bright_red()
                        .bold()
                );
                println!("   {}", e);
            }
        }

        println!(
            "{}",
            "════════════════════════════════════════════════════════════".bright_blue()
        );
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), RenderError> {
    let io_error = |source| RenderError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, content).map_err(io_error)
}
