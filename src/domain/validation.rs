//! Specification validation
//!
//! A pure function over a fully defaulted specification. Every violated
//! constraint is reported; nothing short-circuits after the first error.

use regex::Regex;
use std::sync::OnceLock;

use super::spec::{Action, Kind, ProbeSpec, SidecarType, Spec, StrategyType, Visibility};

/// Errors and non-fatal warnings found in one specification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn require(&mut self, value: &str, field: &str) {
        if value.trim().is_empty() {
            self.error(format!("{} is required", field));
        }
    }

    fn positive(&mut self, value: i32, field: &str) {
        if value <= 0 {
            self.error(format!("{} must be larger than zero, got {}", field, value));
        }
    }
}

fn is_dns_label(value: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

fn is_hostname(value: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\*\.)?([a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?\.)*[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$")
            .ok()
    })
    .as_ref()
    .is_some_and(|re| re.is_match(value))
}

/// Check all required properties of a resolved specification
pub fn validate_required_properties(spec: &Spec) -> Validation {
    let mut v = Validation::default();

    validate_general(spec, &mut v);

    // rollbacks and config-only kinds only need to know where to act
    if spec.action() == Action::RollbackCanary || spec.kind().is_config() {
        return v;
    }

    validate_action_and_strategy(spec, &mut v);
    validate_container(spec, &mut v);

    match spec.kind() {
        Kind::Deployment => validate_visibility(spec, &mut v),
        Kind::HeadlessDeployment => {}
        Kind::Statefulset => validate_statefulset(spec, &mut v),
        Kind::Job => validate_job(spec, &mut v),
        Kind::Cronjob => {
            validate_job(spec, &mut v);
            validate_cronjob(spec, &mut v);
        }
        Kind::Config | Kind::ConfigToFile => {}
    }

    if spec.kind().has_rollout() {
        validate_autoscale(spec, &mut v);
    }
    validate_sidecars(spec, &mut v);

    v
}

fn validate_general(spec: &Spec, v: &mut Validation) {
    v.require(&spec.app, "application name (app)");
    if !spec.app.is_empty() && (spec.app.len() > 63 || !is_dns_label(&spec.app)) {
        v.error(format!(
            "application name '{}' must be a lowercase DNS label of at most 63 characters",
            spec.app
        ));
    }
    v.require(&spec.namespace, "namespace");
    if !spec.namespace.is_empty() && !is_dns_label(&spec.namespace) {
        v.error(format!(
            "namespace '{}' must be a lowercase DNS label",
            spec.namespace
        ));
    }
}

fn validate_action_and_strategy(spec: &Spec, v: &mut Validation) {
    if spec.action() == Action::Unknown {
        v.error("action is required and must be one of deploy-simple, deploy-canary, deploy-stable, restart-simple, restart-canary, restart-stable, diff-simple, diff-canary, diff-stable, rollback-canary");
    }

    if spec.is_atomic() {
        if spec.action() != Action::DeploySimple {
            v.error(format!(
                "strategy AtomicUpdate only supports action deploy-simple, got {}",
                spec.action()
            ));
        } else if spec.strategy.atomic_id.is_empty() {
            v.error("strategy AtomicUpdate requires an atomic id, set strategy.atomicId or provide a release id");
        }
        if spec.kind() != Kind::Deployment {
            v.error(format!(
                "strategy AtomicUpdate only supports kind deployment, got {}",
                spec.kind()
            ));
        }
    } else if !spec.strategy.atomic_id.is_empty() {
        v.error(format!(
            "strategy.atomicId is only allowed with strategy AtomicUpdate, got {}",
            spec.strategy_type().as_str()
        ));
    }

    if spec.strategy_type() == StrategyType::Recreate && spec.action().track().is_some() {
        v.warn("strategy Recreate causes downtime for every canary or stable release");
    }

    if humantime::parse_duration(&spec.strategy.rolling_update.timeout).is_err() {
        v.error(format!(
            "strategy.rollingUpdate.timeout '{}' is not a valid duration",
            spec.strategy.rolling_update.timeout
        ));
    }
}

fn validate_container(spec: &Spec, v: &mut Validation) {
    let container = &spec.container;
    v.require(&container.repository, "container.repository");
    v.require(&container.name, "container.name");
    v.require(&container.tag, "container.tag");

    if spec.kind().has_service() && container.port == 0 {
        v.error("container.port must be larger than zero");
    }

    v.require(&container.cpu.request, "container.cpu.request");
    v.require(&container.cpu.limit, "container.cpu.limit");
    v.require(&container.memory.request, "container.memory.request");
    v.require(&container.memory.limit, "container.memory.limit");

    if spec.kind().has_rollout() {
        validate_probe(&container.liveness, "container.liveness", v);
        validate_probe(&container.readiness, "container.readiness", v);
    }

    for name in container.secret_env.keys() {
        if container.env.contains_key(name) {
            v.error(format!(
                "container environment variable {} is defined both as plain and as secret value",
                name
            ));
        }
        // both end up as keys of the one application secret
        if spec.secrets.keys.contains_key(name) {
            v.error(format!(
                "container secret environment variable {} collides with secrets key {}",
                name, name
            ));
        }
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~+/=".contains(c)
}

fn validate_probe(probe: &ProbeSpec, field: &str, v: &mut Validation) {
    if !probe.enabled.is_enabled() {
        return;
    }
    v.require(&probe.path, &format!("{}.path", field));
    v.positive(probe.timeout_seconds, &format!("{}.timeoutSeconds", field));
    v.positive(probe.period_seconds, &format!("{}.periodSeconds", field));
    if probe.initial_delay_seconds < 0 {
        v.error(format!("{}.initialDelaySeconds cannot be negative", field));
    }
}

fn validate_autoscale(spec: &Spec, v: &mut Validation) {
    let autoscale = &spec.autoscale;
    if !autoscale.enabled.is_enabled() {
        v.positive(spec.replicas, "replicas");
        return;
    }

    v.positive(autoscale.min_replicas, "autoscale.min");
    v.positive(autoscale.max_replicas, "autoscale.max");
    v.positive(autoscale.cpu_percentage, "autoscale.cpu");
    if autoscale.min_replicas > autoscale.max_replicas {
        v.error(format!(
            "autoscale.min ({}) cannot be larger than autoscale.max ({})",
            autoscale.min_replicas, autoscale.max_replicas
        ));
    }
    if autoscale.safety.enabled.is_enabled() {
        v.require(&autoscale.safety.prom_query, "autoscale.safety.promQuery");
        if autoscale.safety.ratio <= 0.0 {
            v.error("autoscale.safety.ratio must be larger than zero");
        }
        if autoscale.safety.scale_down_ratio <= 0.0 || autoscale.safety.scale_down_ratio > 1.0 {
            v.error("autoscale.safety.scaleDownRatio must be larger than zero and at most 1");
        }
    }
}

fn validate_visibility(spec: &Spec, v: &mut Validation) {
    let visibility = spec.visibility();

    if spec.hosts.is_empty() {
        v.error(format!(
            "at least one host is required for visibility {}",
            visibility
        ));
    }
    for host in spec.hosts.iter().chain(spec.internal_hosts.iter()) {
        if host.len() > 253 || !is_hostname(host) {
            v.error(format!("host '{}' is not a valid hostname", host));
        }
    }

    match visibility {
        Visibility::Esp | Visibility::Espv2 => {
            if !spec.workload_identity.is_enabled() && !spec.use_google_cloud_credentials.is_enabled()
            {
                v.error(format!(
                    "visibility {} requires workloadIdentity or useGoogleCloudCredentials to be enabled",
                    visibility
                ));
            }
            v.require(&spec.esp.service_name, "esp.serviceName");
            if visibility == Visibility::Esp {
                v.warn("visibility esp is deprecated, use espv2 instead");
            }
        }
        Visibility::Iap => {
            v.require(&spec.iap.oauth_client_id, "iap.oauthClientId");
            v.require(&spec.iap.oauth_client_secret, "iap.oauthClientSecret");
        }
        Visibility::Apigee => {
            v.require(&spec.apigee.auth_secret, "apigee.authSecret");
            // compared verbatim inside an nginx string literal
            if !spec.apigee.auth_secret.chars().all(is_token_char) {
                v.error("apigee.authSecret may only contain letters, digits and -._~+/=");
            }
        }
        Visibility::PublicWhitelist => {
            if spec.whitelisted_ips.is_empty() {
                v.warn("visibility public-whitelist without whitelistedIps allows no traffic through the ingress");
            }
        }
        Visibility::Private | Visibility::Public => {}
    }
}

fn validate_statefulset(spec: &Spec, v: &mut Validation) {
    v.require(&spec.storage.class, "storage.class");
    v.require(&spec.storage.size, "storage.size");
    v.require(&spec.storage.mount_path, "storage.mountPath");
    if !matches!(
        spec.pod_management_policy.as_str(),
        "OrderedReady" | "Parallel"
    ) {
        v.error(format!(
            "podManagementPolicy must be OrderedReady or Parallel, got '{}'",
            spec.pod_management_policy
        ));
    }
}

fn validate_job(spec: &Spec, v: &mut Validation) {
    if !matches!(spec.job.restart_policy.as_str(), "OnFailure" | "Never") {
        v.error(format!(
            "job.restartPolicy must be OnFailure or Never, got '{}'",
            spec.job.restart_policy
        ));
    }
    if spec.job.backoff_limit < 0 {
        v.error("job.backoffLimit cannot be negative");
    }
}

fn validate_cronjob(spec: &Spec, v: &mut Validation) {
    v.require(&spec.cronjob.schedule, "cronjob.schedule");
    if !spec.cronjob.schedule.is_empty() && spec.cronjob.schedule.split_whitespace().count() != 5 {
        v.error(format!(
            "cronjob.schedule '{}' must have five fields",
            spec.cronjob.schedule
        ));
    }
    v.require(&spec.cronjob.concurrency_policy, "cronjob.concurrencyPolicy");
    if !spec.cronjob.concurrency_policy.is_empty()
        && !matches!(
            spec.cronjob.concurrency_policy.as_str(),
            "Allow" | "Forbid" | "Replace"
        )
    {
        v.error(format!(
            "cronjob.concurrencyPolicy must be Allow, Forbid or Replace, got '{}'",
            spec.cronjob.concurrency_policy
        ));
    }
}

fn validate_sidecars(spec: &Spec, v: &mut Validation) {
    for (index, sidecar) in spec.sidecars.iter().enumerate() {
        let field = format!("sidecars[{}]", index);
        if sidecar.r#type != SidecarType::Istio {
            v.require(&sidecar.image, &format!("{}.image", field));
        }

        match sidecar.r#type {
            SidecarType::Openresty if spec.container.port == 443 => {
                v.error("the openresty sidecar terminates TLS on port 443, the container cannot use port 443 as well");
            }
            SidecarType::Cloudsqlproxy => {
                v.require(
                    &sidecar.db_instance_connection_name,
                    &format!("{}.dbInstanceConnectionName", field),
                );
                if sidecar.sql_proxy_port == 0 {
                    v.error(format!("{}.sqlProxyPort must be larger than zero", field));
                }
            }
            _ => {}
        }
    }

    let openresty = spec
        .sidecars
        .iter()
        .filter(|s| s.r#type == SidecarType::Openresty)
        .count();
    if openresty > 1 {
        v.error("at most one openresty sidecar is supported");
    }
}
