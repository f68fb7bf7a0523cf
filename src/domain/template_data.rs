//! Template data projection
//!
//! Flattens a resolved specification plus runtime facts into the values the
//! manifest templates consume. Everything visibility related is derived from
//! [`NetworkTopology::for_visibility`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

use super::context::ResolveContext;
use super::labels::{APP_LABEL, ATOMIC_ID_LABEL, TRACK_LABEL};
use super::spec::{
    Action, ProbeSpec, ResolvedSpec, SidecarSpec, SidecarType, Spec, StrategyType, Track,
    Visibility,
};

/// Upper bound the ingress controller accepts for the proxy connect timeout
pub const MAX_PROXY_CONNECT_TIMEOUT_SECONDS: u64 = 75;
pub const FALLBACK_PROXY_CONNECT_TIMEOUT_SECONDS: u64 = 10;
pub const FALLBACK_PROXY_READ_TIMEOUT_SECONDS: u64 = 60;
pub const FALLBACK_PROGRESS_DEADLINE_SECONDS: u64 = 300;

/// Kubernetes service type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceType {
    #[serde(rename = "ClusterIP")]
    ClusterIp,
    NodePort,
    LoadBalancer,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClusterIp => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        }
    }
}

/// Network exposure derived from the visibility mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkTopology {
    pub service_type: ServiceType,
    pub use_nginx_ingress: bool,
    pub use_gce_ingress: bool,
    pub use_dns_annotations_on_ingress: bool,
    pub use_dns_annotations_on_service: bool,
    pub use_cloudflare_proxy: bool,
    pub limit_trusted_ip_ranges: bool,
    pub limit_whitelisted_ips: bool,
}

impl NetworkTopology {
    pub fn for_visibility(visibility: Visibility) -> Self {
        match visibility {
            Visibility::Private => Self {
                service_type: ServiceType::ClusterIp,
                use_nginx_ingress: true,
                use_gce_ingress: false,
                use_dns_annotations_on_ingress: true,
                use_dns_annotations_on_service: false,
                use_cloudflare_proxy: false,
                limit_trusted_ip_ranges: false,
                limit_whitelisted_ips: false,
            },
            Visibility::Public => Self {
                service_type: ServiceType::LoadBalancer,
                use_nginx_ingress: false,
                use_gce_ingress: false,
                use_dns_annotations_on_ingress: false,
                use_dns_annotations_on_service: true,
                use_cloudflare_proxy: true,
                limit_trusted_ip_ranges: true,
                limit_whitelisted_ips: false,
            },
            Visibility::PublicWhitelist => Self {
                service_type: ServiceType::ClusterIp,
                use_nginx_ingress: true,
                use_gce_ingress: false,
                use_dns_annotations_on_ingress: true,
                use_dns_annotations_on_service: false,
                use_cloudflare_proxy: true,
                limit_trusted_ip_ranges: false,
                limit_whitelisted_ips: true,
            },
            Visibility::Esp | Visibility::Espv2 => Self {
                service_type: ServiceType::NodePort,
                use_nginx_ingress: false,
                use_gce_ingress: true,
                use_dns_annotations_on_ingress: true,
                use_dns_annotations_on_service: false,
                use_cloudflare_proxy: true,
                limit_trusted_ip_ranges: false,
                limit_whitelisted_ips: false,
            },
            Visibility::Iap => Self {
                service_type: ServiceType::NodePort,
                use_nginx_ingress: false,
                use_gce_ingress: true,
                use_dns_annotations_on_ingress: true,
                use_dns_annotations_on_service: false,
                use_cloudflare_proxy: false,
                limit_trusted_ip_ranges: false,
                limit_whitelisted_ips: false,
            },
            Visibility::Apigee => Self {
                service_type: ServiceType::ClusterIp,
                use_nginx_ingress: true,
                use_gce_ingress: false,
                use_dns_annotations_on_ingress: true,
                use_dns_annotations_on_service: false,
                use_cloudflare_proxy: true,
                limit_trusted_ip_ranges: false,
                limit_whitelisted_ips: false,
            },
        }
    }
}

/// Reference into the application secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretRef {
    /// Environment variable name
    pub name: String,
    /// Key in the application secret
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeData {
    pub enabled: bool,
    pub path: String,
    pub port: u16,
    pub initial_delay_seconds: i32,
    pub timeout_seconds: i32,
    pub period_seconds: i32,
    pub failure_threshold: i32,
    pub success_threshold: i32,
}

impl From<&ProbeSpec> for ProbeData {
    fn from(probe: &ProbeSpec) -> Self {
        Self {
            enabled: probe.enabled.is_enabled(),
            path: probe.path.clone(),
            port: probe.port,
            initial_delay_seconds: probe.initial_delay_seconds,
            timeout_seconds: probe.timeout_seconds,
            period_seconds: probe.period_seconds,
            failure_threshold: probe.failure_threshold,
            success_threshold: probe.success_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortData {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerData {
    pub image: String,
    pub name: String,
    pub port: u16,
    pub additional_ports: Vec<PortData>,
    pub env: BTreeMap<String, String>,
    pub secret_env: Vec<SecretRef>,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub liveness: ProbeData,
    pub readiness: ProbeData,
    pub metrics_scrape: bool,
    pub metrics_path: String,
    pub metrics_port: u16,
    pub pre_stop_sleep: bool,
    pub pre_stop_sleep_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidecarData {
    pub r#type: String,
    pub image: String,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub env: BTreeMap<String, String>,
    pub secret_env: Vec<SecretRef>,
    /// Type-specific fields such as health check path or proxy port
    pub properties: BTreeMap<String, Value>,
}

/// Flat projection consumed by the manifest templates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateData {
    pub name: String,
    pub name_with_track: String,
    pub namespace: String,
    pub kind: String,
    pub action: String,
    pub visibility: String,
    pub labels: BTreeMap<String, String>,
    pub selector_labels: BTreeMap<String, String>,
    pub include_track_label: bool,
    pub track_label: String,
    pub use_atomic_update: bool,
    pub atomic_id: String,

    pub build_version: String,
    pub git_revision: String,
    pub release_name: String,
    pub release_id: String,
    pub triggered_by: String,

    #[serde(flatten)]
    pub topology: NetworkTopology,
    pub hosts: Vec<String>,
    pub hostnames: String,
    pub internal_hosts: Vec<String>,
    pub internal_hostnames: String,
    pub ingress_path: String,
    pub internal_ingress_path: String,
    pub certificate_secret_name: String,
    pub whitelisted_ips: String,
    pub trusted_ip_ranges: String,

    pub replicas: i32,
    pub use_hpa_scaler: bool,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub target_cpu_percentage: i32,
    pub use_hpa_safety: bool,
    pub hpa_safety_prom_query: String,
    pub hpa_safety_ratio: f64,
    pub hpa_safety_delay_seconds: f64,
    pub hpa_safety_scale_down_ratio: f64,
    pub use_vpa: bool,
    pub vpa_update_mode: String,
    pub strategy_type: String,
    pub max_surge: String,
    pub max_unavailable: String,
    pub progress_deadline_seconds: u64,

    pub nginx_proxy_read_timeout: u64,
    pub nginx_proxy_connect_timeout: u64,
    pub nginx_proxy_body_size: String,
    pub nginx_client_body_buffer_size: String,
    pub nginx_proxy_buffer_size: String,
    pub nginx_proxy_buffers_number: i32,

    pub container: ContainerData,
    pub sidecars: Vec<SidecarData>,
    /// TLS terminating proxy in front of the application container
    pub use_openresty_sidecar: bool,
    /// Named container port the service forwards plain traffic to
    pub service_target_port: String,

    pub use_google_cloud_credentials: bool,
    pub use_workload_identity: bool,
    pub disable_service_account_key_rotation: bool,

    /// Base64 encoded application secret data
    pub secrets: BTreeMap<String, String>,
    pub mount_secrets: bool,
    pub secret_mount_path: String,
    pub secrets_checksum: String,
    /// Rendered config files keyed by file name
    pub config_files: BTreeMap<String, String>,
    pub mount_configs: bool,
    pub config_mount_path: String,
    pub configs_checksum: String,

    pub restart_policy: String,
    pub backoff_limit: i32,
    pub schedule: String,
    pub concurrency_policy: String,
    pub storage_class: String,
    pub storage_size: String,
    pub storage_mount_path: String,
    pub pod_management_policy: String,

    pub iap_oauth_client_id: String,
    /// Base64, lands in the data of the IAP OAuth secret
    pub iap_oauth_client_secret: String,
    /// Plain token, compared against a request header in the apigee ingress
    pub apigee_auth_secret: String,
    pub esp_service_name: String,
    pub esp_config_id: String,
    pub esp_openapi_path: String,

    pub use_image_pull_secret: bool,
    pub image_pull_dockerconfig: String,

    pub tolerations: Value,
    pub node_selector: BTreeMap<String, String>,
    pub security_context: Value,
    pub manifest_data: BTreeMap<String, Value>,
}

impl TemplateData {
    /// Replace the config file contents and refresh their checksum
    pub fn with_config_files(mut self, files: BTreeMap<String, String>) -> Self {
        self.configs_checksum = checksum(&files);
        self.config_files = files;
        self
    }
}

/// Project a resolved specification onto template data.
///
/// `current_replicas` is the replica count observed on the live workload, or
/// zero when nothing is running yet.
pub fn build_template_data(
    spec: &ResolvedSpec,
    current_replicas: i32,
    context: &ResolveContext,
) -> TemplateData {
    let action = spec.action();
    let track = workload_track(action);
    let topology = NetworkTopology::for_visibility(spec.visibility());
    let atomic = spec.is_atomic();

    let mut labels = spec.labels.clone();
    labels.insert(APP_LABEL.to_string(), spec.app.clone());
    let mut selector_labels = BTreeMap::from([(APP_LABEL.to_string(), spec.app.clone())]);
    if let Some(track) = track {
        labels.insert(TRACK_LABEL.to_string(), track.as_str().to_string());
        selector_labels.insert(TRACK_LABEL.to_string(), track.as_str().to_string());
    }
    if atomic && !spec.strategy.atomic_id.is_empty() {
        labels.insert(ATOMIC_ID_LABEL.to_string(), spec.strategy.atomic_id.clone());
        selector_labels.insert(ATOMIC_ID_LABEL.to_string(), spec.strategy.atomic_id.clone());
    }

    let mut secrets: BTreeMap<String, String> = spec
        .secrets
        .keys
        .iter()
        .map(|(key, value)| (key.clone(), BASE64.encode(value_to_string(value))))
        .collect();

    let container = container_data(spec, &mut secrets);
    let sidecars = spec
        .sidecars
        .iter()
        .map(|sidecar| sidecar_data(spec, sidecar, &mut secrets))
        .collect();

    let ingress_path = if topology.use_gce_ingress && spec.basepath.ends_with('/') {
        format!("{}*", spec.basepath)
    } else {
        spec.basepath.clone()
    };

    let certificate_secret_name = if spec.certificate_secret.is_empty() {
        format!("{}-letsencrypt-certificate", spec.app)
    } else {
        spec.certificate_secret.clone()
    };

    let request = &spec.request;
    let rolling = &spec.strategy.rolling_update;
    let inline = spec.configs.inline.clone();

    TemplateData {
        name: spec.app.clone(),
        name_with_track: name_with_track(spec),
        namespace: spec.namespace.clone(),
        kind: spec.kind().as_str().to_string(),
        action: action.as_str().to_string(),
        visibility: spec.visibility().as_str().to_string(),
        labels,
        selector_labels,
        include_track_label: track.is_some(),
        track_label: track.map(|t| t.as_str().to_string()).unwrap_or_default(),
        use_atomic_update: atomic,
        atomic_id: spec.strategy.atomic_id.clone(),

        build_version: context.build_version.clone(),
        git_revision: context.git.revision.clone(),
        release_name: context.release.name.clone(),
        release_id: context.release.id.clone(),
        triggered_by: context.release.triggered_by.clone(),

        topology,
        hosts: spec.hosts.clone(),
        hostnames: spec.hosts.join(","),
        internal_hosts: spec.internal_hosts.clone(),
        internal_hostnames: spec.internal_hosts.join(","),
        ingress_path,
        internal_ingress_path: spec.basepath.clone(),
        certificate_secret_name,
        whitelisted_ips: spec.whitelisted_ips.join(","),
        trusted_ip_ranges: spec.trusted_ip_ranges.join(","),

        replicas: resolve_replicas(spec, current_replicas),
        use_hpa_scaler: spec.uses_autoscaler(),
        min_replicas: spec.autoscale.min_replicas,
        max_replicas: spec.autoscale.max_replicas,
        target_cpu_percentage: spec.autoscale.cpu_percentage,
        use_hpa_safety: spec.autoscale.safety.enabled.is_enabled(),
        hpa_safety_prom_query: spec.autoscale.safety.prom_query.clone(),
        hpa_safety_ratio: spec.autoscale.safety.ratio,
        hpa_safety_delay_seconds: spec.autoscale.safety.delay_seconds,
        hpa_safety_scale_down_ratio: spec.autoscale.safety.scale_down_ratio,
        use_vpa: spec.uses_vertical_autoscaler(),
        vpa_update_mode: spec.vertical_pod_autoscaler.update_mode.clone(),
        // atomic generations are plain rolling deployments under their own name
        strategy_type: match spec.strategy_type() {
            StrategyType::AtomicUpdate => StrategyType::RollingUpdate.as_str().to_string(),
            other => other.as_str().to_string(),
        },
        max_surge: rolling.max_surge.clone(),
        max_unavailable: rolling.max_unavailable.clone(),
        progress_deadline_seconds: duration_seconds(
            &rolling.timeout,
            FALLBACK_PROGRESS_DEADLINE_SECONDS,
        ),

        nginx_proxy_read_timeout: duration_seconds(
            &request.timeout,
            FALLBACK_PROXY_READ_TIMEOUT_SECONDS,
        ),
        nginx_proxy_connect_timeout: duration_seconds(
            &request.proxy_connect_timeout,
            FALLBACK_PROXY_CONNECT_TIMEOUT_SECONDS,
        )
        .min(MAX_PROXY_CONNECT_TIMEOUT_SECONDS),
        nginx_proxy_body_size: request.max_body_size.clone(),
        nginx_client_body_buffer_size: request.client_body_buffer_size.clone(),
        nginx_proxy_buffer_size: request.proxy_buffer_size.clone(),
        nginx_proxy_buffers_number: request.proxy_buffers_number,

        container,
        sidecars,
        use_openresty_sidecar: spec.has_sidecar(SidecarType::Openresty),
        service_target_port: service_target_port(spec).to_string(),

        use_google_cloud_credentials: spec.uses_service_account_secret(),
        use_workload_identity: spec.workload_identity.is_enabled(),
        disable_service_account_key_rotation: spec
            .disable_service_account_key_rotation
            .is_enabled(),

        mount_secrets: !spec.secrets.keys.is_empty(),
        secret_mount_path: spec.secrets.mount_path.clone(),
        secrets_checksum: checksum(&secrets),
        secrets,
        configs_checksum: checksum(&inline),
        config_files: inline,
        mount_configs: spec.has_configs(),
        config_mount_path: spec.configs.mount_path.clone(),

        restart_policy: spec.job.restart_policy.clone(),
        backoff_limit: spec.job.backoff_limit,
        schedule: spec.cronjob.schedule.clone(),
        concurrency_policy: spec.cronjob.concurrency_policy.clone(),
        storage_class: spec.storage.class.clone(),
        storage_size: spec.storage.size.clone(),
        storage_mount_path: spec.storage.mount_path.clone(),
        pod_management_policy: spec.pod_management_policy.clone(),

        iap_oauth_client_id: spec.iap.oauth_client_id.clone(),
        iap_oauth_client_secret: BASE64.encode(&spec.iap.oauth_client_secret),
        apigee_auth_secret: spec.apigee.auth_secret.clone(),
        esp_service_name: spec.esp.service_name.clone(),
        esp_config_id: spec.esp.config_id.clone(),
        esp_openapi_path: spec.esp.openapi_path.clone(),

        use_image_pull_secret: spec.image_pull_secret.is_configured(),
        image_pull_dockerconfig: docker_config(spec),

        tolerations: spec.tolerations.clone(),
        node_selector: spec.node_selector.clone(),
        security_context: spec.security_context.clone(),
        manifest_data: spec.manifests.data.clone(),
    }
}

/// Track the workload name is derived from. Rollback scales the canary
/// explicitly and renders nothing, so it keeps the bare name.
fn workload_track(action: Action) -> Option<Track> {
    match action {
        Action::RollbackCanary => None,
        other => other.track(),
    }
}

/// Workload name: `<app>[-canary|-stable][-<atomic id>]`
pub fn name_with_track(spec: &Spec) -> String {
    let mut name = spec.app.clone();
    if let Some(track) = workload_track(spec.action()) {
        name.push('-');
        name.push_str(track.as_str());
    }
    if spec.is_atomic() && !spec.strategy.atomic_id.is_empty() {
        name.push('-');
        name.push_str(&spec.strategy.atomic_id);
    }
    name
}

/// Replica count to render, preferring what is running right now
pub fn resolve_replicas(spec: &Spec, current_replicas: i32) -> i32 {
    if current_replicas > 0 {
        return current_replicas;
    }
    if !spec.autoscale.enabled.is_enabled()
        || spec.strategy_type() == StrategyType::Recreate
        || spec.replicas > spec.autoscale.min_replicas
    {
        return spec.replicas;
    }
    spec.autoscale.min_replicas
}

/// Parse `60s`, `5m` or a bare number of seconds, falling back on failure
pub fn duration_seconds(value: &str, fallback: u64) -> u64 {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return seconds;
    }
    humantime::parse_duration(value)
        .map(|d: Duration| d.as_secs())
        .unwrap_or(fallback)
}

fn service_target_port(spec: &Spec) -> &'static str {
    if spec.has_sidecar(SidecarType::Openresty) {
        "http"
    } else if spec.has_sidecar(SidecarType::Esp) || spec.has_sidecar(SidecarType::Espv2) {
        "esp"
    } else {
        "web"
    }
}

fn container_data(spec: &Spec, secrets: &mut BTreeMap<String, String>) -> ContainerData {
    let container = &spec.container;

    let secret_env = container
        .secret_env
        .iter()
        .map(|(name, value)| {
            secrets.insert(name.clone(), BASE64.encode(value));
            SecretRef {
                name: name.clone(),
                key: name.clone(),
            }
        })
        .collect();

    let image = if container.repository.is_empty() {
        format!("{}:{}", container.name, container.tag)
    } else {
        format!("{}/{}:{}", container.repository, container.name, container.tag)
    };

    ContainerData {
        image,
        name: container.name.clone(),
        port: container.port,
        additional_ports: container
            .additional_ports
            .iter()
            .map(|p| PortData {
                name: p.name.clone(),
                port: p.port,
                protocol: if p.protocol.is_empty() {
                    "TCP".to_string()
                } else {
                    p.protocol.clone()
                },
            })
            .collect(),
        env: env_strings(&container.env),
        secret_env,
        cpu_request: container.cpu.request.clone(),
        cpu_limit: container.cpu.limit.clone(),
        memory_request: container.memory.request.clone(),
        memory_limit: container.memory.limit.clone(),
        liveness: ProbeData::from(&container.liveness),
        readiness: ProbeData::from(&container.readiness),
        metrics_scrape: container.metrics.scrape.is_enabled(),
        metrics_path: container.metrics.path.clone(),
        metrics_port: container.metrics.port,
        pre_stop_sleep: container.lifecycle.pre_stop_sleep.is_enabled(),
        pre_stop_sleep_seconds: container.lifecycle.pre_stop_sleep_seconds,
    }
}

fn sidecar_data(
    spec: &Spec,
    sidecar: &SidecarSpec,
    secrets: &mut BTreeMap<String, String>,
) -> SidecarData {
    let type_name = sidecar.r#type.as_str();
    let mut env = env_strings(&sidecar.env);
    let mut properties = sidecar.custom_properties.clone();

    match sidecar.r#type {
        SidecarType::Openresty => {
            let request = &spec.request;
            let injected = [
                ("OFFLOAD_TO_HOST", "localhost".to_string()),
                ("OFFLOAD_TO_PORT", spec.container.port.to_string()),
                ("SERVICE_NAME", spec.app.clone()),
                ("NAMESPACE", spec.namespace.clone()),
                ("HEALTH_CHECK_PATH", sidecar.health_check_path.clone()),
                ("SEND_TIMEOUT", request.timeout.clone()),
                ("CLIENT_BODY_TIMEOUT", request.timeout.clone()),
                ("CLIENT_HEADER_TIMEOUT", request.timeout.clone()),
                ("PROXY_CONNECT_TIMEOUT", request.proxy_connect_timeout.clone()),
                ("PROXY_SEND_TIMEOUT", request.timeout.clone()),
                ("PROXY_READ_TIMEOUT", request.timeout.clone()),
                ("CLIENT_MAX_BODY_SIZE", request.max_body_size.clone()),
                ("CLIENT_BODY_BUFFER_SIZE", request.client_body_buffer_size.clone()),
                ("PROXY_BUFFER_SIZE", request.proxy_buffer_size.clone()),
                ("PROXY_BUFFERS_NUMBER", request.proxy_buffers_number.to_string()),
            ];
            for (name, value) in injected {
                env.entry(name.to_string()).or_insert(value);
            }
            properties.insert(
                "healthCheckPath".to_string(),
                Value::from(sidecar.health_check_path.clone()),
            );
        }
        SidecarType::Esp | SidecarType::Espv2 => {
            properties.insert(
                "serviceName".to_string(),
                Value::from(spec.esp.service_name.clone()),
            );
            properties.insert(
                "configId".to_string(),
                Value::from(spec.esp.config_id.clone()),
            );
            properties.insert(
                "backend".to_string(),
                Value::from(format!("127.0.0.1:{}", spec.container.port)),
            );
        }
        SidecarType::Cloudsqlproxy => {
            properties.insert(
                "dbInstanceConnectionName".to_string(),
                Value::from(sidecar.db_instance_connection_name.clone()),
            );
            properties.insert(
                "sqlProxyPort".to_string(),
                Value::from(u64::from(sidecar.sql_proxy_port)),
            );
            properties.insert(
                "sqlProxyTerminationTimeoutSeconds".to_string(),
                Value::from(i64::from(sidecar.sql_proxy_termination_timeout_seconds)),
            );
        }
        SidecarType::Istio => {}
    }

    let secret_env = sidecar
        .secret_env
        .iter()
        .map(|(name, value)| {
            let key = format!("{}-{}", type_name, name.to_lowercase().replace('_', "-"));
            secrets.insert(key.clone(), BASE64.encode(value));
            SecretRef {
                name: name.clone(),
                key,
            }
        })
        .collect();

    SidecarData {
        r#type: type_name.to_string(),
        image: sidecar.image.clone(),
        cpu_request: sidecar.cpu.request.clone(),
        cpu_limit: sidecar.cpu.limit.clone(),
        memory_request: sidecar.memory.request.clone(),
        memory_limit: sidecar.memory.limit.clone(),
        env,
        secret_env,
        properties,
    }
}

fn env_strings(env: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(name, value)| (name.clone(), value_to_string(value)))
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Hex encoded SHA-256 over the sorted key/value pairs
pub fn checksum(entries: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in entries {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn docker_config(spec: &Spec) -> String {
    let pull = &spec.image_pull_secret;
    if !pull.is_configured() {
        return String::new();
    }
    let auth = BASE64.encode(format!("{}:{}", pull.username, pull.password));
    let config = serde_json::json!({
        "auths": {
            pull.registry.as_str(): {
                "username": pull.username,
                "password": pull.password,
                "auth": auth,
            }
        }
    });
    BASE64.encode(config.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::{GitIdentity, ReleaseMetadata};
    use crate::domain::resolver::set_defaults;
    use crate::domain::spec::{Kind, Tristate};

    fn context() -> ResolveContext {
        ResolveContext {
            git: GitIdentity {
                name: "checkout".to_string(),
                owner: "acme".to_string(),
                revision: "0123abcd".to_string(),
                ..Default::default()
            },
            build_version: "1.4.2".to_string(),
            release: ReleaseMetadata {
                name: "production".to_string(),
                id: "42".to_string(),
                ..Default::default()
            },
            labels: BTreeMap::new(),
        }
    }

    fn resolved(mutate: impl FnOnce(&mut Spec)) -> ResolvedSpec {
        let mut raw = Spec {
            app: "myapp".to_string(),
            namespace: "myapp".to_string(),
            action: Some(Action::DeploySimple),
            hosts: vec!["myapp.acme.test".to_string()],
            ..Default::default()
        };
        mutate(&mut raw);
        set_defaults(raw, &context())
    }

    #[test]
    fn test_topology_is_total_and_public_uses_load_balancer() {
        for visibility in Visibility::ALL {
            let topology = NetworkTopology::for_visibility(visibility);
            assert!(!(topology.use_nginx_ingress && topology.use_gce_ingress));
        }
        let public = NetworkTopology::for_visibility(Visibility::Public);
        assert_eq!(public.service_type, ServiceType::LoadBalancer);
        assert!(public.use_dns_annotations_on_service);
        assert!(public.limit_trusted_ip_ranges);
    }

    #[test]
    fn test_scenario_private_deployment() {
        let spec = resolved(|s| {
            s.kind = Some(Kind::Deployment);
            s.visibility = Some(Visibility::Private);
            s.container.port = 8080;
        });
        let data = build_template_data(&spec, 0, &context());
        assert_eq!(data.topology.service_type, ServiceType::ClusterIp);
        assert!(data.topology.use_nginx_ingress);
        assert_eq!(data.name_with_track, "myapp");
        assert!(!data.include_track_label);
        assert_eq!(data.container.image, "acme/myapp:1.4.2");
        assert_eq!(data.certificate_secret_name, "myapp-letsencrypt-certificate");
    }

    #[test]
    fn test_scenario_canary_track() {
        let spec = resolved(|s| s.action = Some(Action::DeployCanary));
        let data = build_template_data(&spec, 0, &context());
        assert_eq!(data.name_with_track, "myapp-canary");
        assert!(data.include_track_label);
        assert_eq!(data.track_label, "canary");
        assert_eq!(data.selector_labels.get("track").map(String::as_str), Some("canary"));
    }

    #[test]
    fn test_rollback_uses_bare_name() {
        let spec = resolved(|s| s.action = Some(Action::RollbackCanary));
        assert_eq!(name_with_track(&spec), "myapp");
    }

    #[test]
    fn test_scenario_atomic_generation() {
        let spec = resolved(|s| {
            s.strategy.r#type = Some(StrategyType::AtomicUpdate);
            s.strategy.atomic_id = "abc123".to_string();
        });
        let data = build_template_data(&spec, 0, &context());
        assert!(data.name_with_track.ends_with("-abc123"));
        assert_eq!(data.labels.get("atomic-id").map(String::as_str), Some("abc123"));
        assert_eq!(
            data.selector_labels.get("atomic-id").map(String::as_str),
            Some("abc123")
        );
        assert_eq!(data.strategy_type, "RollingUpdate");
    }

    #[test]
    fn test_observed_replicas_always_win() {
        let configurations: Vec<Box<dyn Fn(&mut Spec)>> = vec![
            Box::new(|_| {}),
            Box::new(|s| s.autoscale.enabled = Tristate::Disabled),
            Box::new(|s| s.strategy.r#type = Some(StrategyType::Recreate)),
            Box::new(|s| s.replicas = 40),
            Box::new(|s| s.autoscale.min_replicas = 20),
        ];
        for configure in configurations {
            let spec = resolved(|s| configure(s));
            assert_eq!(build_template_data(&spec, 15, &context()).replicas, 15);
        }
    }

    #[test]
    fn test_replica_fallback_order() {
        let spec = resolved(|s| s.replicas = 2);
        assert_eq!(resolve_replicas(&spec, 0), 3);

        let spec = resolved(|s| s.replicas = 7);
        assert_eq!(resolve_replicas(&spec, 0), 7);

        let spec = resolved(|s| {
            s.replicas = 1;
            s.autoscale.enabled = Tristate::Disabled;
        });
        assert_eq!(resolve_replicas(&spec, 0), 1);

        let spec = resolved(|s| {
            s.replicas = 2;
            s.strategy.r#type = Some(StrategyType::Recreate);
        });
        assert_eq!(resolve_replicas(&spec, 0), 2);
    }

    #[test]
    fn test_timeouts_are_normalized_and_clamped() {
        let spec = resolved(|s| {
            s.request.timeout = "2m".to_string();
            s.request.proxy_connect_timeout = "120s".to_string();
        });
        let data = build_template_data(&spec, 0, &context());
        assert_eq!(data.nginx_proxy_read_timeout, 120);
        assert_eq!(data.nginx_proxy_connect_timeout, 75);
        assert_eq!(data.progress_deadline_seconds, 300);

        let spec = resolved(|s| s.request.proxy_connect_timeout = "soon".to_string());
        let data = build_template_data(&spec, 0, &context());
        assert_eq!(data.nginx_proxy_connect_timeout, 10);
        assert_eq!(duration_seconds("45", 1), 45);
    }

    #[test]
    fn test_secret_values_are_base64_encoded() {
        let spec = resolved(|s| {
            s.secrets
                .keys
                .insert("api-key".to_string(), Value::from("s3cr3t"));
            s.container
                .secret_env
                .insert("DB_PASSWORD".to_string(), "hunter2".to_string());
            let mut sidecar = SidecarSpec::new(SidecarType::Cloudsqlproxy);
            sidecar
                .secret_env
                .insert("PROXY_TOKEN".to_string(), "t0k3n".to_string());
            s.sidecars.push(sidecar);
        });
        let data = build_template_data(&spec, 0, &context());
        assert_eq!(data.secrets.get("api-key").map(String::as_str), Some("czNjcjN0"));
        assert_eq!(
            data.secrets.get("DB_PASSWORD").map(String::as_str),
            Some("aHVudGVyMg==")
        );
        assert!(data.secrets.contains_key("cloudsqlproxy-proxy-token"));
        assert!(!data.secrets.values().any(|v| v == "hunter2" || v == "t0k3n"));
        assert!(data.mount_secrets);

        let cloudsql = data
            .sidecars
            .iter()
            .find(|s| s.r#type == "cloudsqlproxy")
            .unwrap();
        assert_eq!(cloudsql.secret_env[0].key, "cloudsqlproxy-proxy-token");
        assert_eq!(cloudsql.properties.get("sqlProxyPort"), Some(&Value::from(5432u64)));
    }

    #[test]
    fn test_auth_secrets_are_encoded_for_their_sink() {
        let spec = resolved(|s| {
            s.iap.oauth_client_secret = "s3cr3t".to_string();
            s.apigee.auth_secret = "t0k3n".to_string();
        });
        let data = build_template_data(&spec, 0, &context());
        assert_eq!(data.iap_oauth_client_secret, "czNjcjN0");
        assert_eq!(data.apigee_auth_secret, "t0k3n");
    }

    #[test]
    fn test_openresty_env_keeps_user_values() {
        let spec = resolved(|s| {
            let mut sidecar = SidecarSpec::new(SidecarType::Openresty);
            sidecar
                .env
                .insert("PROXY_READ_TIMEOUT".to_string(), Value::from("300s"));
            s.sidecars.push(sidecar);
        });
        let data = build_template_data(&spec, 0, &context());
        let openresty = &data.sidecars[0];
        assert_eq!(openresty.env["PROXY_READ_TIMEOUT"], "300s");
        assert_eq!(openresty.env["SEND_TIMEOUT"], "60s");
        assert_eq!(openresty.env["CLIENT_MAX_BODY_SIZE"], "128M");
        assert_eq!(openresty.env["OFFLOAD_TO_PORT"], "5000");
    }

    #[test]
    fn test_config_checksum_follows_files() {
        let spec = resolved(|_| {});
        let data = build_template_data(&spec, 0, &context());
        let before = data.configs_checksum.clone();
        let data = data.with_config_files(BTreeMap::from([(
            "app.yaml".to_string(),
            "debug: true".to_string(),
        )]));
        assert_ne!(before, data.configs_checksum);
        assert_eq!(data.configs_checksum.len(), 64);
    }

    #[test]
    fn test_gce_ingress_path_gets_wildcard() {
        let spec = resolved(|s| {
            s.visibility = Some(Visibility::Iap);
            s.basepath = "/api/".to_string();
        });
        let data = build_template_data(&spec, 0, &context());
        assert_eq!(data.ingress_path, "/api/*");
        assert_eq!(data.internal_ingress_path, "/api/");
    }
}
