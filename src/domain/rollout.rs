//! Rollout domain types
//!
//! Defines the rollout as a state machine with explicit states, and the
//! reconcile/cutover tables as ordered lists of idempotent cluster operations.
//! Nothing here talks to the cluster; the orchestrator executes the plans.

use std::fmt;

use super::labels::{LabelSelector, APP_LABEL, ATOMIC_ID_LABEL};
use super::spec::{Action, Kind, Spec, StrategyType, Track, Visibility};
use super::template_data::{duration_seconds, name_with_track, FALLBACK_PROGRESS_DEADLINE_SECONDS};

/// Annotations that publish a service through external DNS
pub const DNS_HOSTNAME_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/hostname";
pub const DNS_CLOUDFLARE_PROXIED_ANNOTATION: &str =
    "external-dns.alpha.kubernetes.io/cloudflare-proxied";

/// Resource types owned by one atomic generation
pub const GENERATION_RESOURCES: [&str; 5] = [
    "deployment",
    "horizontalpodautoscaler",
    "poddisruptionbudget",
    "configmap",
    "secret",
];

/// States of one rollout invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutState {
    /// Client-side dry-run and diff against the live cluster
    Validate,
    /// Pre-apply repair and apply of the full manifest
    Apply,
    /// Block until the workload rollout settles
    Wait,
    /// Action specific cleanup
    Reconcile,
    /// Atomic service cutover and removal of previous generations
    Cutover,
    Terminal,
}

impl RolloutState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validate => "Validate",
            Self::Apply => "Apply",
            Self::Wait => "Wait",
            Self::Reconcile => "Reconcile",
            Self::Cutover => "Cutover",
            Self::Terminal => "Terminal",
        }
    }

    /// Successor state after this one completed successfully
    pub fn next(self, facts: &PlanFacts) -> Self {
        match self {
            Self::Validate if facts.dry_run || facts.action.is_diff() => Self::Terminal,
            Self::Validate if !facts.has_templates => Self::Reconcile,
            Self::Validate => Self::Apply,
            Self::Apply if facts.kind.has_rollout() => Self::Wait,
            Self::Apply | Self::Wait => Self::Reconcile,
            Self::Reconcile if facts.is_atomic_deploy() => Self::Cutover,
            Self::Reconcile | Self::Cutover | Self::Terminal => Self::Terminal,
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs that decide state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanFacts {
    pub action: Action,
    pub kind: Kind,
    pub strategy: StrategyType,
    pub dry_run: bool,
    /// Whether the selected template set is non-empty
    pub has_templates: bool,
}

impl PlanFacts {
    pub fn new(spec: &Spec, dry_run: bool, has_templates: bool) -> Self {
        Self {
            action: spec.action(),
            kind: spec.kind(),
            strategy: spec.strategy_type(),
            dry_run,
            has_templates,
        }
    }

    pub fn is_atomic_deploy(&self) -> bool {
        self.strategy == StrategyType::AtomicUpdate && self.action == Action::DeploySimple
    }
}

/// A single idempotent cluster operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Scale {
        resource: &'static str,
        name: String,
        replicas: i32,
    },
    Delete {
        resource: &'static str,
        name: String,
    },
    DeleteBySelector {
        resources: Vec<&'static str>,
        selector: LabelSelector,
    },
    RemoveAnnotations {
        resource: &'static str,
        name: String,
        keys: Vec<&'static str>,
    },
    RolloutRestart {
        resource: &'static str,
        name: String,
    },
    WaitRollout {
        resource: &'static str,
        name: String,
        timeout_seconds: u64,
    },
}

impl Operation {
    /// Best-effort operations log their failure and never abort the rollout
    pub fn is_best_effort(&self) -> bool {
        match self {
            Self::Delete { .. } | Self::DeleteBySelector { .. } | Self::RemoveAnnotations { .. } => {
                true
            }
            Self::Scale { replicas, .. } => *replicas == 0,
            Self::RolloutRestart { .. } | Self::WaitRollout { .. } => false,
        }
    }

    /// kubectl arguments executing this operation in `namespace`
    pub fn kubectl_args(&self, namespace: &str) -> Vec<String> {
        let mut args: Vec<String> = match self {
            Self::Scale {
                resource,
                name,
                replicas,
            } => vec![
                "scale".into(),
                (*resource).into(),
                name.clone(),
                format!("--replicas={}", replicas),
            ],
            Self::Delete { resource, name } => vec![
                "delete".into(),
                (*resource).into(),
                name.clone(),
                "--ignore-not-found".into(),
            ],
            Self::DeleteBySelector {
                resources,
                selector,
            } => vec![
                "delete".into(),
                resources.join(","),
                "-l".into(),
                selector.to_string(),
                "--ignore-not-found".into(),
            ],
            Self::RemoveAnnotations {
                resource,
                name,
                keys,
            } => {
                let mut args = vec!["annotate".into(), (*resource).into(), name.clone()];
                args.extend(keys.iter().map(|k| format!("{}-", k)));
                args
            }
            Self::RolloutRestart { resource, name } => vec![
                "rollout".into(),
                "restart".into(),
                format!("{}/{}", resource, name),
            ],
            Self::WaitRollout {
                resource,
                name,
                timeout_seconds,
            } => vec![
                "rollout".into(),
                "status".into(),
                format!("{}/{}", resource, name),
                format!("--timeout={}s", timeout_seconds),
            ],
        };
        args.push("-n".into());
        args.push(namespace.to_string());
        args
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale {
                resource,
                name,
                replicas,
            } => write!(f, "scale {}/{} to {}", resource, name, replicas),
            Self::Delete { resource, name } => write!(f, "delete {}/{}", resource, name),
            Self::DeleteBySelector {
                resources,
                selector,
            } => write!(f, "delete {} matching {}", resources.join(","), selector),
            Self::RemoveAnnotations { resource, name, .. } => {
                write!(f, "remove annotations from {}/{}", resource, name)
            }
            Self::RolloutRestart { resource, name } => {
                write!(f, "restart {}/{}", resource, name)
            }
            Self::WaitRollout { resource, name, .. } => {
                write!(f, "wait for {}/{}", resource, name)
            }
        }
    }
}

fn track_name(app: &str, track: Track) -> String {
    format!("{}-{}", app, track.as_str())
}

/// Rollout deadline carried by the specification
pub fn progress_deadline_seconds(spec: &Spec) -> u64 {
    duration_seconds(
        &spec.strategy.rolling_update.timeout,
        FALLBACK_PROGRESS_DEADLINE_SECONDS,
    )
}

/// Ordered cleanup operations for the Reconcile state
pub fn reconcile_plan(spec: &Spec) -> Vec<Operation> {
    let kind = spec.kind();
    if kind.is_config() {
        return Vec::new();
    }

    let app = spec.app.as_str();
    let canary = track_name(app, Track::Canary);
    let stable = track_name(app, Track::Stable);
    let mut ops = Vec::new();

    match spec.action() {
        Action::DeployCanary if kind.is_deployment() => {
            ops.push(Operation::Scale {
                resource: "deployment",
                name: canary,
                replicas: 1,
            });
        }
        Action::DeployStable => {
            if kind.is_deployment() {
                ops.push(Operation::Scale {
                    resource: "deployment",
                    name: canary,
                    replicas: 0,
                });
                for resource in ["deployment", "horizontalpodautoscaler", "poddisruptionbudget"] {
                    ops.push(Operation::Delete {
                        resource,
                        name: app.to_string(),
                    });
                }
            }
            ops.extend(delete_unconfigured(spec));
        }
        // old generations go at cutover, unconfigured resources go here
        Action::DeploySimple if spec.is_atomic() => ops.extend(delete_unconfigured(spec)),
        Action::DeploySimple => {
            if kind.is_deployment() {
                ops.push(Operation::Delete {
                    resource: "deployment",
                    name: canary,
                });
                for resource in ["deployment", "horizontalpodautoscaler", "poddisruptionbudget"] {
                    ops.push(Operation::Delete {
                        resource,
                        name: stable.clone(),
                    });
                }
            }
            ops.extend(delete_unconfigured(spec));
        }
        Action::RollbackCanary if kind.is_deployment() => {
            ops.push(Operation::Scale {
                resource: "deployment",
                name: canary,
                replicas: 0,
            });
        }
        Action::RestartSimple | Action::RestartCanary | Action::RestartStable => {
            if let (true, Some(resource)) = (kind.has_rollout(), kind.resource()) {
                let name = name_with_track(spec);
                ops.push(Operation::RolloutRestart {
                    resource,
                    name: name.clone(),
                });
                ops.push(Operation::WaitRollout {
                    resource,
                    name,
                    timeout_seconds: progress_deadline_seconds(spec),
                });
            }
        }
        _ => {}
    }

    ops
}

/// Deletions of resources the specification no longer declares
fn delete_unconfigured(spec: &Spec) -> Vec<Operation> {
    let app = spec.app.as_str();
    let kind = spec.kind();
    let visibility = spec.visibility();
    let workload = name_with_track(spec);
    let mut ops = Vec::new();

    let mut delete = |applies: bool, resource: &'static str, name: String| {
        if applies {
            ops.push(Operation::Delete { resource, name });
        }
    };

    delete(!spec.has_configs(), "configmap", format!("{}-configs", app));
    delete(!spec.has_secrets(), "secret", format!("{}-secrets", app));
    delete(
        !spec.uses_service_account_secret(),
        "secret",
        format!("{}-gcp-service-account", app),
    );
    delete(
        !spec.image_pull_secret.is_configured(),
        "secret",
        format!("{}-pull-secret", app),
    );

    if kind.has_rollout() {
        delete(
            !spec.uses_autoscaler(),
            "horizontalpodautoscaler",
            workload.clone(),
        );
        delete(
            !spec.uses_vertical_autoscaler(),
            "verticalpodautoscaler",
            workload,
        );
    }

    if kind == Kind::Deployment {
        delete(
            !matches!(
                visibility,
                Visibility::Private | Visibility::Iap | Visibility::PublicWhitelist
            ),
            "ingress",
            app.to_string(),
        );
        delete(
            spec.internal_hosts.is_empty(),
            "ingress",
            format!("{}-internal", app),
        );
        delete(
            visibility != Visibility::Apigee,
            "ingress",
            format!("{}-apigee", app),
        );
        delete(!visibility.is_esp(), "ingress", format!("{}-esp", app));
        delete(visibility != Visibility::Iap, "backendconfig", app.to_string());
        delete(
            visibility != Visibility::Iap,
            "secret",
            format!("{}-iap-oauth-credentials", app),
        );

        if visibility != Visibility::Public {
            ops.push(Operation::RemoveAnnotations {
                resource: "service",
                name: app.to_string(),
                keys: vec![DNS_HOSTNAME_ANNOTATION, DNS_CLOUDFLARE_PROXIED_ANNOTATION],
            });
        }
    }

    ops
}

/// Selector for every generation of `app` except the current one
pub fn previous_generations_selector(app: &str, atomic_id: &str) -> LabelSelector {
    LabelSelector::new()
        .eq(APP_LABEL, app)
        .exists(ATOMIC_ID_LABEL)
        .ne(ATOMIC_ID_LABEL, atomic_id)
}

/// Selector for resources of `app` deployed before it switched to atomic updates
pub fn legacy_resources_selector(app: &str) -> LabelSelector {
    LabelSelector::new()
        .eq(APP_LABEL, app)
        .does_not_exist(ATOMIC_ID_LABEL)
}

/// Cleanup operations run after the atomic service switched generations
pub fn cutover_cleanup(spec: &Spec) -> Vec<Operation> {
    vec![
        Operation::DeleteBySelector {
            resources: GENERATION_RESOURCES.to_vec(),
            selector: previous_generations_selector(&spec.app, &spec.strategy.atomic_id),
        },
        Operation::DeleteBySelector {
            resources: GENERATION_RESOURCES.to_vec(),
            selector: legacy_resources_selector(&spec.app),
        },
    ]
}
