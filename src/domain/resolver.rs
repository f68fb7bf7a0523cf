//! Parameter resolution
//!
//! Turns a sparse, partially specified request into a fully defaulted
//! specification. Defaulting is strictly additive: a value the caller set is
//! never replaced. The order of the steps below matters because later defaults
//! read earlier ones (app → image name → image tag, visibility → sidecars →
//! sidecar sub-defaults, kind → probes).

use tracing::debug;

use super::context::ResolveContext;
use super::labels::sanitize_label;
use super::spec::{
    Action, Kind, ResolvedSpec, ResourceSpec, SidecarSpec, SidecarType, Spec, StrategyType,
    Tristate, Visibility,
};
use super::validation::{self, Validation};
use crate::error::SpecificationError;

pub const DEFAULT_CONTAINER_PORT: u16 = 5000;
pub const DEFAULT_CPU_REQUEST: &str = "100m";
pub const DEFAULT_CPU_LIMIT: &str = DEFAULT_CPU_REQUEST;
pub const DEFAULT_MEMORY_REQUEST: &str = "128Mi";
pub const DEFAULT_MEMORY_LIMIT: &str = "128Mi";
pub const DEFAULT_MIN_REPLICAS: i32 = 3;
pub const DEFAULT_MAX_REPLICAS: i32 = 100;
pub const DEFAULT_CPU_PERCENTAGE: i32 = 80;
pub const DEFAULT_SQL_PROXY_PORT: u16 = 5432;

pub const OPENRESTY_IMAGE: &str = "estafette/openresty-sidecar:1.15.8.2-alpine";
pub const ESP_IMAGE: &str = "gcr.io/endpoints-release/endpoints-runtime:1";
pub const ESPV2_IMAGE: &str = "gcr.io/endpoints-release/endpoints-runtime:2";
pub const CLOUDSQLPROXY_IMAGE: &str = "gcr.io/cloudsql-docker/gce-proxy:1.33.2";

/// Outcome of resolving one raw specification
#[derive(Debug, Clone)]
pub struct Resolution {
    pub spec: ResolvedSpec,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Resolution {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into the resolved spec plus its warnings, or the full error list
    pub fn into_result(self) -> Result<(ResolvedSpec, Vec<String>), SpecificationError> {
        if self.errors.is_empty() {
            Ok((self.spec, self.warnings))
        } else {
            Err(SpecificationError {
                errors: self.errors,
                warnings: self.warnings,
            })
        }
    }
}

/// Default then validate a raw specification
pub fn resolve(raw: Spec, ctx: &ResolveContext) -> Resolution {
    let spec = set_defaults(raw, ctx);
    let Validation { errors, warnings } = validation::validate_required_properties(&spec);
    Resolution {
        spec,
        errors,
        warnings,
    }
}

/// Apply every conventional default to the empty fields of `raw`
pub fn set_defaults(raw: Spec, ctx: &ResolveContext) -> ResolvedSpec {
    let mut spec = raw;

    set_identity_defaults(&mut spec, ctx);
    set_strategy_defaults(&mut spec, ctx);
    set_container_defaults(&mut spec);
    set_scaling_defaults(&mut spec);
    set_request_defaults(&mut spec);
    set_kind_specific_defaults(&mut spec);
    set_sidecar_defaults(&mut spec);
    set_visibility_specific_defaults(&mut spec);

    debug!(
        "Resolved {} ({} / {} / {})",
        spec.app,
        spec.kind(),
        spec.action(),
        spec.visibility()
    );

    ResolvedSpec(spec)
}

fn default_str(field: &mut String, value: impl AsRef<str>) {
    if field.is_empty() {
        *field = value.as_ref().to_string();
    }
}

fn default_num<T: Default + PartialEq>(field: &mut T, value: T) {
    if *field == T::default() {
        *field = value;
    }
}

fn default_tristate(field: &mut Tristate, value: bool) {
    *field = field.or(value);
}

/// A limit with no request defaults the request to the limit; a request with
/// no limit defaults the limit to the request. Conventional values only apply
/// when neither is set, so a caller's limit is never lowered.
fn default_resource(resource: &mut ResourceSpec, request: &str, limit: &str) {
    match (resource.request.is_empty(), resource.limit.is_empty()) {
        (true, true) => {
            resource.request = request.to_string();
            resource.limit = limit.to_string();
        }
        (true, false) => resource.request = resource.limit.clone(),
        (false, true) => resource.limit = resource.request.clone(),
        (false, false) => {}
    }
}

fn set_identity_defaults(spec: &mut Spec, ctx: &ResolveContext) {
    default_str(&mut spec.app, &ctx.git.name);
    default_str(&mut spec.container.name, spec.app.clone());
    default_str(&mut spec.container.repository, &ctx.git.owner);
    default_str(&mut spec.container.tag, &ctx.build_version);

    if spec.action.is_none() {
        spec.action = Action::parse(&ctx.release.action);
    }
    if spec.kind.is_none() {
        spec.kind = Some(Kind::Deployment);
    }
    if spec.visibility.is_none() {
        spec.visibility = Some(Visibility::Private);
    }

    for (key, value) in &ctx.labels {
        spec.labels
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    default_str(&mut spec.basepath, "/");
    default_tristate(&mut spec.use_google_cloud_credentials, false);
    default_tristate(&mut spec.workload_identity, false);
    default_tristate(&mut spec.disable_service_account_key_rotation, false);
    default_tristate(&mut spec.inject_http_proxy_sidecar, true);
}

fn set_strategy_defaults(spec: &mut Spec, ctx: &ResolveContext) {
    if spec.strategy.r#type.is_none() {
        spec.strategy.r#type = Some(StrategyType::RollingUpdate);
    }

    if spec.is_atomic() && spec.action() == Action::DeploySimple && spec.strategy.atomic_id.is_empty()
    {
        let source = if ctx.release.id.is_empty() {
            &ctx.build_version
        } else {
            &ctx.release.id
        };
        spec.strategy.atomic_id = sanitize_label(source);
    }

    let rolling = &mut spec.strategy.rolling_update;
    default_str(&mut rolling.max_surge, "25%");
    default_str(&mut rolling.max_unavailable, "0");
    default_str(&mut rolling.timeout, "5m");
}

fn set_container_defaults(spec: &mut Spec) {
    let headless = spec.kind() == Kind::HeadlessDeployment;
    let container = &mut spec.container;

    default_num(&mut container.port, DEFAULT_CONTAINER_PORT);
    let port = container.port;

    default_resource(&mut container.cpu, DEFAULT_CPU_REQUEST, DEFAULT_CPU_LIMIT);
    default_resource(
        &mut container.memory,
        DEFAULT_MEMORY_REQUEST,
        DEFAULT_MEMORY_LIMIT,
    );

    let liveness = &mut container.liveness;
    default_tristate(&mut liveness.enabled, true);
    default_str(&mut liveness.path, "/liveness");
    default_num(&mut liveness.port, port);
    default_num(&mut liveness.initial_delay_seconds, 30);
    default_num(&mut liveness.timeout_seconds, 1);
    default_num(&mut liveness.period_seconds, 10);
    default_num(&mut liveness.failure_threshold, 3);
    default_num(&mut liveness.success_threshold, 1);

    // headless deployments have nothing routing traffic to them
    let readiness = &mut container.readiness;
    default_tristate(&mut readiness.enabled, !headless);
    default_str(&mut readiness.path, "/readiness");
    default_num(&mut readiness.port, port);
    default_num(&mut readiness.timeout_seconds, 1);
    default_num(&mut readiness.period_seconds, 10);
    default_num(&mut readiness.failure_threshold, 3);
    default_num(&mut readiness.success_threshold, 1);

    default_tristate(&mut container.metrics.scrape, true);
    default_str(&mut container.metrics.path, "/metrics");
    default_num(&mut container.metrics.port, port);

    default_tristate(&mut container.lifecycle.pre_stop_sleep, true);
    default_num(&mut container.lifecycle.pre_stop_sleep_seconds, 20);
}

fn set_scaling_defaults(spec: &mut Spec) {
    let app = spec.app.clone();
    let autoscale = &mut spec.autoscale;

    default_tristate(&mut autoscale.enabled, true);
    default_num(&mut autoscale.min_replicas, DEFAULT_MIN_REPLICAS);
    default_num(&mut autoscale.max_replicas, DEFAULT_MAX_REPLICAS);
    default_num(&mut autoscale.cpu_percentage, DEFAULT_CPU_PERCENTAGE);

    let safety = &mut autoscale.safety;
    default_tristate(&mut safety.enabled, false);
    default_str(
        &mut safety.prom_query,
        format!(
            "sum(rate(nginx_http_requests_total{{app='{}'}}[5m])) by (app)",
            app
        ),
    );
    default_num(&mut safety.ratio, 1.0);
    default_num(&mut safety.scale_down_ratio, 1.0);

    let min_replicas = autoscale.min_replicas;
    default_num(&mut spec.replicas, min_replicas);

    default_tristate(&mut spec.vertical_pod_autoscaler.enabled, false);
    default_str(&mut spec.vertical_pod_autoscaler.update_mode, "Off");
}

fn set_request_defaults(spec: &mut Spec) {
    let request = &mut spec.request;
    default_str(&mut request.timeout, "60s");
    default_str(&mut request.proxy_connect_timeout, "10s");
    default_str(&mut request.max_body_size, "128M");
    default_str(&mut request.client_body_buffer_size, "8k");
    default_str(&mut request.proxy_buffer_size, "4k");
    default_num(&mut request.proxy_buffers_number, 4);

    default_str(&mut spec.secrets.mount_path, "/secrets");
    default_str(&mut spec.configs.mount_path, "/configs");
}

fn set_kind_specific_defaults(spec: &mut Spec) {
    match spec.kind() {
        Kind::Job => {
            default_str(&mut spec.job.restart_policy, "OnFailure");
            default_num(&mut spec.job.backoff_limit, 6);
        }
        Kind::Cronjob => {
            default_str(&mut spec.job.restart_policy, "OnFailure");
            default_num(&mut spec.job.backoff_limit, 6);
            default_str(&mut spec.cronjob.concurrency_policy, "Forbid");
        }
        Kind::Statefulset => {
            default_str(&mut spec.pod_management_policy, "OrderedReady");
        }
        _ => {}
    }
}

/// Fold the deprecated single sidecar into the list, inject the sidecars the
/// visibility demands, then fill in per-type sidecar defaults.
fn set_sidecar_defaults(spec: &mut Spec) {
    if let Some(legacy) = spec.sidecar.take() {
        spec.sidecars.insert(0, legacy);
    }

    if spec.kind() == Kind::Deployment {
        let required = match spec.visibility() {
            Visibility::Esp => Some(SidecarType::Esp),
            Visibility::Espv2 => Some(SidecarType::Espv2),
            _ if spec.inject_http_proxy_sidecar.is_enabled() => Some(SidecarType::Openresty),
            _ => None,
        };
        if let Some(sidecar_type) = required {
            if !spec.has_sidecar(sidecar_type) {
                spec.sidecars.push(SidecarSpec::new(sidecar_type));
            }
        }
    }

    let readiness_path = spec.container.readiness.path.clone();
    for sidecar in &mut spec.sidecars {
        match sidecar.r#type {
            SidecarType::Openresty => {
                default_str(&mut sidecar.image, OPENRESTY_IMAGE);
                default_resource(&mut sidecar.cpu, "50m", "50m");
                default_resource(&mut sidecar.memory, "32Mi", "32Mi");
                default_str(&mut sidecar.health_check_path, &readiness_path);
            }
            SidecarType::Esp => {
                default_str(&mut sidecar.image, ESP_IMAGE);
                default_resource(&mut sidecar.cpu, "100m", "100m");
                default_resource(&mut sidecar.memory, "64Mi", "64Mi");
            }
            SidecarType::Espv2 => {
                default_str(&mut sidecar.image, ESPV2_IMAGE);
                default_resource(&mut sidecar.cpu, "100m", "100m");
                default_resource(&mut sidecar.memory, "64Mi", "64Mi");
            }
            SidecarType::Cloudsqlproxy => {
                default_str(&mut sidecar.image, CLOUDSQLPROXY_IMAGE);
                default_resource(&mut sidecar.cpu, "50m", "50m");
                default_resource(&mut sidecar.memory, "32Mi", "32Mi");
                default_num(&mut sidecar.sql_proxy_port, DEFAULT_SQL_PROXY_PORT);
                default_num(&mut sidecar.sql_proxy_termination_timeout_seconds, 60);
            }
            // istio sidecars are injected by the mesh; only pass-through data applies
            SidecarType::Istio => {}
        }
    }
}

fn set_visibility_specific_defaults(spec: &mut Spec) {
    if spec.visibility().is_esp() {
        if let Some(host) = spec.hosts.first() {
            let host = host.clone();
            default_str(&mut spec.esp.service_name, host);
        }
        default_str(&mut spec.esp.openapi_path, "openapi.yaml");
    }
}
