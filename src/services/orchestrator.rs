//! Rollout orchestrator - drives one rollout through its states
//!
//! Validate, Apply, Wait, Reconcile and Cutover run strictly in sequence,
//! every step being a blocking kubectl call. The optional deadline aborts the
//! call in flight and skips every remaining state; nothing is rolled back.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::labels::LabelSelector;
use crate::domain::rollout::{cutover_cleanup, reconcile_plan, Operation, PlanFacts, RolloutState};
use crate::domain::template_data::ServiceType;
use crate::domain::{Kind, ResolvedSpec, Spec, TemplateData};
use crate::error::{
    ApplyError, CleanupError, KubectlError, PreflightError, RolloutError, RolloutTimeoutError,
};
use crate::infrastructure::kubectl::{ensure_success, CommandOutput, CommandRunner};

pub const MANIFEST_FILE: &str = "kubernetes.yaml";
pub const NO_PDB_MANIFEST_FILE: &str = "kubernetes-no-pdb.yaml";
pub const ATOMIC_SERVICE_FILE: &str = "kubernetes-atomic-service.yaml";

/// Wait between the atomic service switch and deleting the old generation
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(20);

/// Settings for one rollout
#[derive(Debug, Clone)]
pub struct RolloutOptions {
    /// Stop after validation
    pub dry_run: bool,
    pub drain_interval: Duration,
    /// Top-level cancellation deadline
    pub deadline: Option<Instant>,
    /// Full manifest, including the pod disruption budget
    pub manifest_path: PathBuf,
    /// Manifest without the pod disruption budget, used for the diff
    pub no_pdb_manifest_path: PathBuf,
    /// Service switching traffic to the current atomic generation
    pub atomic_service_path: PathBuf,
}

impl RolloutOptions {
    /// Options reading the rendered manifests from `output_dir`
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        let dir = output_dir.as_ref();
        Self {
            dry_run: false,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            deadline: None,
            manifest_path: dir.join(MANIFEST_FILE),
            no_pdb_manifest_path: dir.join(NO_PDB_MANIFEST_FILE),
            atomic_service_path: dir.join(ATOMIC_SERVICE_FILE),
        }
    }

    /// Builder: validate only
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builder: set drain interval
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Builder: set cancellation deadline
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// What happened during a rollout that completed
#[derive(Debug, Default)]
pub struct RolloutReport {
    /// States in the order they were entered, ending with Terminal
    pub visited: Vec<RolloutState>,
    /// Diff against the live cluster, empty when nothing changed
    pub diff: String,
    /// Best-effort cleanups that failed
    pub cleanup_failures: Vec<CleanupError>,
}

/// Drives the rollout state machine against the cluster
pub struct RolloutOrchestrator<R> {
    runner: R,
    options: RolloutOptions,
}

impl<R: CommandRunner> RolloutOrchestrator<R> {
    pub fn new(runner: R, options: RolloutOptions) -> Self {
        Self { runner, options }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn options(&self) -> &RolloutOptions {
        &self.options
    }

    /// Run every state from Validate to Terminal.
    ///
    /// `has_templates` tells whether a manifest was rendered at all; actions
    /// acting only through cluster mutation have none.
    pub async fn execute(
        &self,
        spec: &ResolvedSpec,
        data: &TemplateData,
        has_templates: bool,
    ) -> Result<RolloutReport, RolloutError> {
        let facts = PlanFacts::new(spec, self.options.dry_run, has_templates);
        let mut report = RolloutReport::default();
        let mut state = RolloutState::Validate;

        info!(
            "{} {} {} in {}",
            "🚀".bold(),
            spec.action().as_str().cyan(),
            data.name_with_track.bold(),
            spec.namespace
        );

        loop {
            report.visited.push(state);
            if state == RolloutState::Terminal {
                break;
            }
            if self.deadline_passed() {
                return Err(RolloutError::Cancelled { state });
            }

            info!("{} {}", "▶".cyan(), state.name().bold());
            let result = match state {
                RolloutState::Validate => self.validate(has_templates, &mut report).await,
                RolloutState::Apply => self.apply(spec, data).await,
                RolloutState::Wait => self.wait(spec, data).await,
                RolloutState::Reconcile => self.reconcile(spec, &mut report).await,
                RolloutState::Cutover => self.cutover(spec, &mut report).await,
                RolloutState::Terminal => Ok(()),
            };

            if let Err(e) = result {
                error!("{} {} failed: {}", "❌".red(), state.name(), e);
                let mutated = matches!(
                    state,
                    RolloutState::Apply | RolloutState::Wait | RolloutState::Reconcile
                );
                if mutated && !matches!(e, RolloutError::Cancelled { .. }) {
                    self.troubleshoot(state, spec, data).await;
                }
                return Err(e);
            }

            state = state.next(&facts);
        }

        if !report.cleanup_failures.is_empty() {
            warn!(
                "{} cleanup step(s) failed, see warnings above",
                report.cleanup_failures.len()
            );
        }
        info!("{} {} done", "✅".green(), data.name_with_track);
        Ok(report)
    }

    fn deadline_passed(&self) -> bool {
        self.options
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Run kubectl under the deadline. The outer error only ever reports
    /// cancellation; the inner result carries the call's own outcome.
    async fn kubectl(
        &self,
        state: RolloutState,
        args: &[String],
    ) -> Result<Result<CommandOutput, KubectlError>, RolloutError> {
        let call = self.runner.run(args);
        match self.options.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| RolloutError::Cancelled { state }),
            None => Ok(call.await),
        }
    }

    /// Like [`Self::kubectl`], with non-zero exits folded into the inner error
    async fn kubectl_checked(
        &self,
        state: RolloutState,
        args: &[String],
    ) -> Result<Result<CommandOutput, KubectlError>, RolloutError> {
        Ok(self
            .kubectl(state, args)
            .await?
            .and_then(|output| ensure_success(args, output)))
    }

    async fn validate(
        &self,
        has_templates: bool,
        report: &mut RolloutReport,
    ) -> Result<(), RolloutError> {
        let manifest = path_arg(&self.options.manifest_path);
        self.kubectl_checked(
            RolloutState::Validate,
            &args(&["apply", "--dry-run=client", "-f", &manifest]),
        )
        .await?
        .map_err(|e| PreflightError::DryRunFailed {
            message: e.to_string(),
        })?;
        debug!("Client-side dry-run passed");

        if !has_templates {
            info!("No manifests selected, nothing to diff");
            return Ok(());
        }

        let no_pdb = path_arg(&self.options.no_pdb_manifest_path);
        let diff = self
            .kubectl(RolloutState::Validate, &args(&["diff", "-f", &no_pdb]))
            .await?
            .map_err(|e| PreflightError::DiffFailed {
                message: e.to_string(),
            })?;

        // kubectl diff exits 1 when differences were found
        match diff.code {
            Some(0) => info!("No differences against the cluster"),
            Some(1) => {
                println!("{}", diff.stdout);
                report.diff = diff.stdout;
            }
            _ => {
                return Err(PreflightError::DiffFailed {
                    message: diff.stderr.trim().to_string(),
                }
                .into())
            }
        }
        Ok(())
    }

    async fn apply(&self, spec: &Spec, data: &TemplateData) -> Result<(), RolloutError> {
        let kind = spec.kind();
        let namespace = spec.namespace.as_str();

        // jobs cannot be updated in place
        if let (Kind::Job | Kind::Cronjob, Some(resource)) = (kind, kind.resource()) {
            let stale = Operation::Delete {
                resource,
                name: data.name_with_track.clone(),
            };
            info!("Removing previous {}", stale);
            self.kubectl_checked(RolloutState::Apply, &stale.kubectl_args(namespace))
                .await?
                .map_err(|e| repair_failed(resource, &data.name_with_track, e))?;
        }

        if kind.has_service() {
            self.repair_service_type(spec, data).await?;
        }
        if kind.is_deployment() && !spec.is_atomic() {
            self.repair_deployment_selector(spec, data).await?;
        }

        let manifest = path_arg(&self.options.manifest_path);
        let output = self
            .kubectl_checked(RolloutState::Apply, &args(&["apply", "-f", &manifest]))
            .await?
            .map_err(|e| ApplyError::ApplyFailed {
                manifest: manifest.clone(),
                message: e.to_string(),
            })?;
        for line in output.stdout.lines() {
            info!("  {}", line);
        }
        Ok(())
    }

    async fn repair_service_type(&self, spec: &Spec, data: &TemplateData) -> Result<(), RolloutError> {
        let name = spec.app.as_str();
        let namespace = spec.namespace.as_str();

        let output = self
            .kubectl_checked(
                RolloutState::Apply,
                &args(&[
                    "get",
                    "service",
                    name,
                    "-n",
                    namespace,
                    "-o",
                    "jsonpath={.spec.type}",
                    "--ignore-not-found",
                ]),
            )
            .await?
            .map_err(|e| repair_failed("service", name, e))?;

        let current = output.stdout.trim();
        let desired = data.topology.service_type;
        if current.is_empty() || current == desired.as_str() {
            return Ok(());
        }

        warn!(
            "Service {} is {} but should be {}, patching",
            name,
            current,
            desired.as_str()
        );
        let patch = service_type_patch(current, desired);
        self.kubectl_checked(
            RolloutState::Apply,
            &args(&[
                "patch", "service", name, "-n", namespace, "--type=json", "-p", &patch,
            ]),
        )
        .await?
        .map_err(|e| repair_failed("service", name, e))?;
        Ok(())
    }

    async fn repair_deployment_selector(
        &self,
        spec: &Spec,
        data: &TemplateData,
    ) -> Result<(), RolloutError> {
        let name = data.name_with_track.as_str();
        let namespace = spec.namespace.as_str();

        let output = self
            .kubectl_checked(
                RolloutState::Apply,
                &args(&[
                    "get",
                    "deployment",
                    name,
                    "-n",
                    namespace,
                    "-o",
                    "jsonpath={.spec.selector.matchLabels}",
                    "--ignore-not-found",
                ]),
            )
            .await?
            .map_err(|e| repair_failed("deployment", name, e))?;

        let raw = output.stdout.trim();
        if raw.is_empty() {
            return Ok(());
        }
        let current: BTreeMap<String, String> =
            serde_json::from_str(raw).map_err(|e| ApplyError::RepairFailed {
                resource: format!("deployment/{}", name),
                message: format!("unreadable selector {}: {}", raw, e),
            })?;
        if current == data.selector_labels {
            return Ok(());
        }

        warn!("Deployment {} has a stale selector {:?}", name, current);
        let patch = serde_json::json!([{
            "op": "replace",
            "path": "/spec/selector/matchLabels",
            "value": data.selector_labels,
        }])
        .to_string();
        let patched = self
            .kubectl_checked(
                RolloutState::Apply,
                &args(&[
                    "patch", "deployment", name, "-n", namespace, "--type=json", "-p", &patch,
                ]),
            )
            .await?;

        if let Err(e) = patched {
            // selectors are immutable on most clusters; keep the pods, drop the owner
            warn!("Selector patch rejected ({}), recreating deployment", e);
            self.kubectl_checked(
                RolloutState::Apply,
                &args(&[
                    "delete",
                    "deployment",
                    name,
                    "-n",
                    namespace,
                    "--cascade=orphan",
                ]),
            )
            .await?
            .map_err(|e| repair_failed("deployment", name, e))?;
        }
        Ok(())
    }

    async fn wait(&self, spec: &Spec, data: &TemplateData) -> Result<(), RolloutError> {
        let Some(resource) = spec.kind().resource() else {
            return Ok(());
        };
        let wait = Operation::WaitRollout {
            resource,
            name: data.name_with_track.clone(),
            timeout_seconds: data.progress_deadline_seconds,
        };

        let spinner = spinner(format!("Waiting for {}/{}", resource, data.name_with_track));
        let result = self
            .kubectl_checked(RolloutState::Wait, &wait.kubectl_args(&spec.namespace))
            .await;
        spinner.finish_and_clear();

        result?.map_err(|e| RolloutTimeoutError {
            resource: format!("{}/{}", resource, data.name_with_track),
            timeout_secs: data.progress_deadline_seconds,
            message: e.to_string(),
        })?;
        info!("{}/{} rolled out", resource, data.name_with_track);
        Ok(())
    }

    async fn reconcile(&self, spec: &Spec, report: &mut RolloutReport) -> Result<(), RolloutError> {
        let plan = reconcile_plan(spec);
        if plan.is_empty() {
            info!("Nothing to reconcile");
        }
        for operation in &plan {
            self.execute_operation(RolloutState::Reconcile, spec, operation, report)
                .await?;
        }
        Ok(())
    }

    async fn cutover(&self, spec: &Spec, report: &mut RolloutReport) -> Result<(), RolloutError> {
        let service = path_arg(&self.options.atomic_service_path);
        info!(
            "Switching service {} to generation {}",
            spec.app, spec.strategy.atomic_id
        );
        self.kubectl_checked(RolloutState::Cutover, &args(&["apply", "-f", &service]))
            .await?
            .map_err(|e| ApplyError::CutoverFailed {
                message: e.to_string(),
            })?;

        let drain = self.options.drain_interval;
        if !drain.is_zero() {
            info!(
                "Draining previous generation for {}",
                humantime::format_duration(drain)
            );
            let sleep = tokio::time::sleep(drain);
            match self.options.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, sleep)
                    .await
                    .map_err(|_| RolloutError::Cancelled {
                        state: RolloutState::Cutover,
                    })?,
                None => sleep.await,
            }
        }

        for operation in &cutover_cleanup(spec) {
            self.execute_operation(RolloutState::Cutover, spec, operation, report)
                .await?;
        }
        Ok(())
    }

    async fn execute_operation(
        &self,
        state: RolloutState,
        spec: &Spec,
        operation: &Operation,
        report: &mut RolloutReport,
    ) -> Result<(), RolloutError> {
        info!("  {}", operation);
        let spinner = matches!(operation, Operation::WaitRollout { .. })
            .then(|| spinner(operation.to_string()));
        let result = self
            .kubectl_checked(state, &operation.kubectl_args(&spec.namespace))
            .await;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        match result? {
            Ok(_) => Ok(()),
            Err(e) if operation.is_best_effort() => {
                let failure = CleanupError {
                    operation: operation.to_string(),
                    message: e.to_string(),
                };
                warn!("{}", failure);
                report.cleanup_failures.push(failure);
                Ok(())
            }
            Err(e) => match operation {
                Operation::WaitRollout {
                    resource,
                    name,
                    timeout_seconds,
                } => Err(RolloutTimeoutError {
                    resource: format!("{}/{}", resource, name),
                    timeout_secs: *timeout_seconds,
                    message: e.to_string(),
                }
                .into()),
                _ => Err(ApplyError::OperationFailed {
                    operation: operation.to_string(),
                    message: e.to_string(),
                }
                .into()),
            },
        }
    }

    /// Read-only diagnostics after a failed mutation. Failures are logged only.
    async fn troubleshoot(&self, state: RolloutState, spec: &Spec, data: &TemplateData) {
        let namespace = spec.namespace.as_str();
        let selector = LabelSelector::from_labels(&data.selector_labels).to_string();
        warn!("🔍 Collecting diagnostics for {}", data.name_with_track);

        let commands = [
            args(&["get", "pods", "-n", namespace, "-l", &selector, "-o", "wide"]),
            args(&["describe", "pods", "-n", namespace, "-l", &selector]),
            args(&[
                "logs",
                "-n",
                namespace,
                "-l",
                &selector,
                "--all-containers",
                "--tail=50",
            ]),
            args(&["get", "events", "-n", namespace, "--sort-by=.lastTimestamp"]),
        ];

        for command in &commands {
            match self.kubectl(state, command).await {
                Err(_) => {
                    warn!("Diagnostics interrupted by cancellation");
                    return;
                }
                Ok(Ok(output)) if output.success() => {
                    info!("kubectl {}\n{}", command.join(" "), output.stdout);
                }
                Ok(Ok(output)) => {
                    warn!(
                        "kubectl {} failed: {}",
                        command.join(" "),
                        output.stderr.trim()
                    );
                }
                Ok(Err(e)) => warn!("{}", e),
            }
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn repair_failed(resource: &str, name: &str, e: KubectlError) -> ApplyError {
    ApplyError::RepairFailed {
        resource: format!("{}/{}", resource, name),
        message: e.to_string(),
    }
}

/// JSON patch moving a live service to `desired`
pub fn service_type_patch(current: &str, desired: ServiceType) -> String {
    let mut ops = Vec::new();
    // ClusterIP services reject node ports
    if desired == ServiceType::ClusterIp && matches!(current, "NodePort" | "LoadBalancer") {
        ops.push(serde_json::json!({ "op": "remove", "path": "/spec/ports/0/nodePort" }));
    }
    ops.push(serde_json::json!({
        "op": "replace",
        "path": "/spec/type",
        "value": desired.as_str(),
    }));
    serde_json::Value::Array(ops).to_string()
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::{GitIdentity, ReleaseMetadata, ResolveContext};
    use crate::domain::resolver::set_defaults;
    use crate::domain::spec::{Action, StrategyType};
    use crate::domain::template_data::build_template_data;
    use crate::infrastructure::kubectl::fake::FakeRunner;

    fn context() -> ResolveContext {
        ResolveContext {
            git: GitIdentity {
                name: "myapp".to_string(),
                owner: "acme".to_string(),
                ..Default::default()
            },
            build_version: "1.0.0".to_string(),
            release: ReleaseMetadata {
                id: "abc123".to_string(),
                ..Default::default()
            },
            labels: BTreeMap::new(),
        }
    }

    fn prepared(mutate: impl FnOnce(&mut Spec)) -> (ResolvedSpec, TemplateData) {
        let mut raw = Spec {
            namespace: "myapp".to_string(),
            action: Some(Action::DeploySimple),
            hosts: vec!["myapp.acme.test".to_string()],
            ..Default::default()
        };
        mutate(&mut raw);
        let spec = set_defaults(raw, &context());
        let data = build_template_data(&spec, 0, &context());
        (spec, data)
    }

    fn orchestrator_with(runner: FakeRunner) -> RolloutOrchestrator<FakeRunner> {
        RolloutOrchestrator::new(
            runner,
            RolloutOptions::new("/tmp/kdeploy-test").with_drain_interval(Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_canary_deploy_scales_canary_only() {
        let (spec, data) = prepared(|s| s.action = Some(Action::DeployCanary));
        let orchestrator = orchestrator_with(FakeRunner::new());

        let report = orchestrator.execute(&spec, &data, true).await.unwrap();

        use RolloutState::*;
        assert_eq!(report.visited, vec![Validate, Apply, Wait, Reconcile, Terminal]);
        let runner = orchestrator.runner();
        let dry_run = runner.position("apply --dry-run=client -f /tmp/kdeploy-test/kubernetes.yaml");
        let diff = runner.position("diff -f /tmp/kdeploy-test/kubernetes-no-pdb.yaml");
        let apply = runner.position("apply -f /tmp/kdeploy-test/kubernetes.yaml");
        let wait = runner.position("rollout status deployment/myapp-canary --timeout=300s");
        let scale = runner.position("scale deployment myapp-canary --replicas=1");
        assert!(dry_run < diff && diff < apply && apply < wait && wait < scale);
        assert!(scale.is_some());
        assert!(!runner.calls().iter().any(|c| c.contains("myapp-stable")));
    }

    #[tokio::test]
    async fn test_atomic_cutover_switches_service_then_deletes_old_generations() {
        let (spec, data) = prepared(|s| {
            s.strategy.r#type = Some(StrategyType::AtomicUpdate);
        });
        assert_eq!(spec.strategy.atomic_id, "abc123");
        let orchestrator = orchestrator_with(FakeRunner::new());

        let report = orchestrator.execute(&spec, &data, true).await.unwrap();

        assert_eq!(report.visited.last(), Some(&RolloutState::Terminal));
        assert!(report.visited.contains(&RolloutState::Cutover));
        let runner = orchestrator.runner();
        assert!(runner.position("rollout status deployment/myapp-abc123").is_some());
        let switch = runner.position("apply -f /tmp/kdeploy-test/kubernetes-atomic-service.yaml");
        let old = runner.position(
            "delete deployment,horizontalpodautoscaler,poddisruptionbudget,configmap,secret -l app=myapp,atomic-id,atomic-id!=abc123",
        );
        let legacy = runner.position(
            "delete deployment,horizontalpodautoscaler,poddisruptionbudget,configmap,secret -l app=myapp,!atomic-id",
        );
        assert!(switch.is_some() && switch < old && old < legacy);
        assert!(!runner.calls().iter().any(|c| c.starts_with("get deployment")));
    }

    #[tokio::test]
    async fn test_dry_run_and_diff_stop_after_validate() {
        let (spec, data) = prepared(|_| {});
        let orchestrator = RolloutOrchestrator::new(
            FakeRunner::new(),
            RolloutOptions::new("/tmp/kdeploy-test").with_dry_run(true),
        );
        let report = orchestrator.execute(&spec, &data, true).await.unwrap();
        assert_eq!(report.visited, vec![RolloutState::Validate, RolloutState::Terminal]);
        assert_eq!(orchestrator.runner().calls().len(), 2);

        let (spec, data) = prepared(|s| s.action = Some(Action::DiffSimple));
        let runner = FakeRunner::new().respond(
            "diff",
            CommandOutput {
                code: Some(1),
                stdout: "-  replicas: 3\n+  replicas: 4".to_string(),
                stderr: String::new(),
            },
        );
        let orchestrator = orchestrator_with(runner);
        let report = orchestrator.execute(&spec, &data, true).await.unwrap();
        assert!(report.diff.contains("replicas: 4"));
        assert!(orchestrator.runner().position("apply -f").is_none());
    }

    #[tokio::test]
    async fn test_preflight_failures_stop_before_apply() {
        let (spec, data) = prepared(|_| {});

        let orchestrator = orchestrator_with(
            FakeRunner::new().respond("apply --dry-run", CommandOutput::failed(1, "bad yaml")),
        );
        let err = orchestrator.execute(&spec, &data, true).await.unwrap_err();
        assert!(matches!(err, RolloutError::Preflight(PreflightError::DryRunFailed { .. })));
        assert_eq!(orchestrator.runner().calls().len(), 1);

        let orchestrator =
            orchestrator_with(FakeRunner::new().respond("diff", CommandOutput::failed(2, "forbidden")));
        let err = orchestrator.execute(&spec, &data, true).await.unwrap_err();
        assert!(matches!(err, RolloutError::Preflight(PreflightError::DiffFailed { .. })));
        assert!(orchestrator.runner().position("apply -f").is_none());
    }

    #[tokio::test]
    async fn test_wait_failure_collects_diagnostics_and_skips_reconcile() {
        let (spec, data) = prepared(|_| {});
        let orchestrator = orchestrator_with(
            FakeRunner::new()
                .respond("rollout status", CommandOutput::failed(1, "progress deadline exceeded"))
                .respond("logs", CommandOutput::failed(1, "no pods")),
        );

        let err = orchestrator.execute(&spec, &data, true).await.unwrap_err();
        assert!(matches!(err, RolloutError::Timeout(_)));
        let runner = orchestrator.runner();
        assert!(runner.position("get pods -n myapp -l app=myapp").is_some());
        assert!(runner.position("get events").is_some());
        assert!(runner.position("delete").is_none());
    }

    #[tokio::test]
    async fn test_cleanup_failures_do_not_abort() {
        let (spec, data) = prepared(|s| s.action = Some(Action::DeployStable));
        let orchestrator = orchestrator_with(
            FakeRunner::new().respond("scale deployment myapp-canary", CommandOutput::failed(1, "not found")),
        );

        let report = orchestrator.execute(&spec, &data, true).await.unwrap();
        assert_eq!(report.cleanup_failures.len(), 1);
        assert!(orchestrator
            .runner()
            .position("delete deployment myapp --ignore-not-found -n myapp")
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_selector_falls_back_to_orphan_delete() {
        let (spec, data) = prepared(|_| {});
        let orchestrator = orchestrator_with(
            FakeRunner::new()
                .respond(
                    "get deployment myapp -n myapp -o jsonpath={.spec.selector.matchLabels}",
                    CommandOutput::ok(r#"{"app":"myapp","version":"0.9"}"#),
                )
                .respond("patch deployment", CommandOutput::failed(1, "field is immutable")),
        );

        orchestrator.execute(&spec, &data, true).await.unwrap();
        let runner = orchestrator.runner();
        let orphan = runner.position("delete deployment myapp -n myapp --cascade=orphan");
        let apply = runner.position("apply -f /tmp/kdeploy-test/kubernetes.yaml");
        assert!(orphan.is_some() && orphan < apply);
    }

    #[tokio::test]
    async fn test_service_type_drift_is_patched() {
        let (spec, data) = prepared(|_| {});
        let orchestrator = orchestrator_with(FakeRunner::new().respond(
            "get service myapp",
            CommandOutput::ok("NodePort"),
        ));

        orchestrator.execute(&spec, &data, true).await.unwrap();
        let calls = orchestrator.runner().calls();
        let patch = calls
            .iter()
            .find(|c| c.starts_with("patch service myapp"))
            .unwrap();
        assert!(patch.contains("/spec/ports/0/nodePort"));
        assert!(patch.contains(r#""value":"ClusterIP""#));
    }

    #[tokio::test]
    async fn test_deadline_cancels_wait_and_skips_the_rest() {
        let (spec, data) = prepared(|_| {});
        let orchestrator = RolloutOrchestrator::new(
            FakeRunner::new().hang_on("rollout status"),
            RolloutOptions::new("/tmp/kdeploy-test")
                .with_deadline(Some(Instant::now() + Duration::from_millis(100))),
        );

        let err = orchestrator.execute(&spec, &data, true).await.unwrap_err();
        assert!(matches!(err, RolloutError::Cancelled { state: RolloutState::Wait }));
        let runner = orchestrator.runner();
        assert!(runner.position("delete").is_none());
        assert!(runner.position("get pods").is_none());
    }

    #[tokio::test]
    async fn test_rollback_only_scales_canary_down() {
        let (spec, data) = prepared(|s| s.action = Some(Action::RollbackCanary));
        let orchestrator = orchestrator_with(FakeRunner::new());

        let report = orchestrator.execute(&spec, &data, false).await.unwrap();
        use RolloutState::*;
        assert_eq!(report.visited, vec![Validate, Reconcile, Terminal]);
        assert_eq!(
            orchestrator.runner().calls(),
            vec![
                "apply --dry-run=client -f /tmp/kdeploy-test/kubernetes.yaml",
                "scale deployment myapp-canary --replicas=0 -n myapp",
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_still_dry_runs_before_restarting() {
        let (spec, data) = prepared(|s| s.action = Some(Action::RestartStable));
        let orchestrator = orchestrator_with(FakeRunner::new());

        orchestrator.execute(&spec, &data, false).await.unwrap();
        let runner = orchestrator.runner();
        let dry_run = runner.position("apply --dry-run=client -f /tmp/kdeploy-test/kubernetes.yaml");
        let restart = runner.position("rollout restart deployment/myapp-stable");
        assert!(dry_run.is_some() && dry_run < restart);
        assert!(runner.position("diff").is_none());
    }

    #[tokio::test]
    async fn test_failed_dry_run_blocks_rollback() {
        let (spec, data) = prepared(|s| s.action = Some(Action::RollbackCanary));
        let orchestrator = orchestrator_with(
            FakeRunner::new().respond("apply --dry-run", CommandOutput::failed(1, "unreachable")),
        );

        let err = orchestrator.execute(&spec, &data, false).await.unwrap_err();
        assert!(matches!(err, RolloutError::Preflight(PreflightError::DryRunFailed { .. })));
        assert!(orchestrator.runner().position("scale").is_none());
    }

    #[test]
    fn test_service_type_patch() {
        assert_eq!(
            service_type_patch("ClusterIP", ServiceType::LoadBalancer),
            r#"[{"op":"replace","path":"/spec/type","value":"LoadBalancer"}]"#
        );
        assert!(service_type_patch("LoadBalancer", ServiceType::ClusterIp).contains("remove"));
    }
}
