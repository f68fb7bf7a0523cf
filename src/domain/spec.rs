//! Deployment specification types
//!
//! The specification is the single input driving every downstream decision.
//! Fields use empty strings, zero numbers and [`Tristate::Unset`] to mean
//! "not provided by the caller"; the resolver fills those in and never touches
//! anything that was provided.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

/// Explicit three-valued switch: unset, enabled or disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Tristate {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl Tristate {
    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }

    pub fn is_unset(self) -> bool {
        self == Self::Unset
    }

    /// Returns `self` when set, otherwise the given default.
    pub fn or(self, default: bool) -> Self {
        match self {
            Self::Unset => default.into(),
            set => set,
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

impl From<Option<bool>> for Tristate {
    fn from(value: Option<bool>) -> Self {
        value.map(Self::from).unwrap_or_default()
    }
}

impl From<Tristate> for Option<bool> {
    fn from(value: Tristate) -> Self {
        match value {
            Tristate::Unset => None,
            Tristate::Enabled => Some(true),
            Tristate::Disabled => Some(false),
        }
    }
}

/// Release action requested for this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    DeploySimple,
    DeployCanary,
    DeployStable,
    RestartSimple,
    RestartCanary,
    RestartStable,
    DiffSimple,
    DiffCanary,
    DiffStable,
    RollbackCanary,
    /// Any action string this tool does not know about
    #[serde(other)]
    Unknown,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::DeploySimple,
        Action::DeployCanary,
        Action::DeployStable,
        Action::RestartSimple,
        Action::RestartCanary,
        Action::RestartStable,
        Action::DiffSimple,
        Action::DiffCanary,
        Action::DiffStable,
        Action::RollbackCanary,
        Action::Unknown,
    ];

    /// Parse the release action handed over by the CI system
    pub fn parse(s: &str) -> Option<Self> {
        if s.trim().is_empty() {
            return None;
        }
        Some(
            serde_yaml::from_value(Value::String(s.trim().to_string()))
                .unwrap_or(Action::Unknown),
        )
    }

    pub fn is_deploy(self) -> bool {
        matches!(
            self,
            Self::DeploySimple | Self::DeployCanary | Self::DeployStable
        )
    }

    pub fn is_diff(self) -> bool {
        matches!(self, Self::DiffSimple | Self::DiffCanary | Self::DiffStable)
    }

    pub fn is_restart(self) -> bool {
        matches!(
            self,
            Self::RestartSimple | Self::RestartCanary | Self::RestartStable
        )
    }

    /// Track this action operates on, if any
    pub fn track(self) -> Option<Track> {
        match self {
            Self::DeployCanary | Self::RestartCanary | Self::DiffCanary | Self::RollbackCanary => {
                Some(Track::Canary)
            }
            Self::DeployStable | Self::RestartStable | Self::DiffStable => Some(Track::Stable),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeploySimple => "deploy-simple",
            Self::DeployCanary => "deploy-canary",
            Self::DeployStable => "deploy-stable",
            Self::RestartSimple => "restart-simple",
            Self::RestartCanary => "restart-canary",
            Self::RestartStable => "restart-stable",
            Self::DiffSimple => "diff-simple",
            Self::DiffCanary => "diff-canary",
            Self::DiffStable => "diff-stable",
            Self::RollbackCanary => "rollback-canary",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canary or stable sub-identity of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Canary,
    Stable,
}

impl Track {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Canary => "canary",
            Self::Stable => "stable",
        }
    }
}

/// Workload kind, drives the base template set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Deployment,
    HeadlessDeployment,
    Statefulset,
    Job,
    Cronjob,
    Config,
    ConfigToFile,
}

impl Kind {
    pub const ALL: [Kind; 7] = [
        Kind::Deployment,
        Kind::HeadlessDeployment,
        Kind::Statefulset,
        Kind::Job,
        Kind::Cronjob,
        Kind::Config,
        Kind::ConfigToFile,
    ];

    /// Kinds that only carry configuration and run no workload
    pub fn is_config(self) -> bool {
        matches!(self, Self::Config | Self::ConfigToFile)
    }

    /// Kinds managed as a long running deployment
    pub fn is_deployment(self) -> bool {
        matches!(self, Self::Deployment | Self::HeadlessDeployment)
    }

    /// Kinds whose rollout is awaited through `kubectl rollout status`
    pub fn has_rollout(self) -> bool {
        matches!(
            self,
            Self::Deployment | Self::HeadlessDeployment | Self::Statefulset
        )
    }

    /// Kinds fronted by a regular service
    pub fn has_service(self) -> bool {
        matches!(self, Self::Deployment | Self::Statefulset)
    }

    /// Resource type name understood by kubectl
    pub fn resource(self) -> Option<&'static str> {
        match self {
            Self::Deployment | Self::HeadlessDeployment => Some("deployment"),
            Self::Statefulset => Some("statefulset"),
            Self::Job => Some("job"),
            Self::Cronjob => Some("cronjob"),
            Self::Config | Self::ConfigToFile => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::HeadlessDeployment => "headless-deployment",
            Self::Statefulset => "statefulset",
            Self::Job => "job",
            Self::Cronjob => "cronjob",
            Self::Config => "config",
            Self::ConfigToFile => "config-to-file",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network exposure mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Private,
    Public,
    PublicWhitelist,
    Esp,
    Espv2,
    Iap,
    Apigee,
}

impl Visibility {
    pub const ALL: [Visibility; 7] = [
        Visibility::Private,
        Visibility::Public,
        Visibility::PublicWhitelist,
        Visibility::Esp,
        Visibility::Espv2,
        Visibility::Iap,
        Visibility::Apigee,
    ];

    pub fn is_esp(self) -> bool {
        matches!(self, Self::Esp | Self::Espv2)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
            Self::PublicWhitelist => "public-whitelist",
            Self::Esp => "esp",
            Self::Espv2 => "espv2",
            Self::Iap => "iap",
            Self::Apigee => "apigee",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rollout mechanics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyType {
    RollingUpdate,
    Recreate,
    AtomicUpdate,
}

impl StrategyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RollingUpdate => "RollingUpdate",
            Self::Recreate => "Recreate",
            Self::AtomicUpdate => "AtomicUpdate",
        }
    }
}

/// Closed set of supported sidecar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidecarType {
    Openresty,
    Esp,
    Espv2,
    Cloudsqlproxy,
    Istio,
}

impl SidecarType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openresty => "openresty",
            Self::Esp => "esp",
            Self::Espv2 => "espv2",
            Self::Cloudsqlproxy => "cloudsqlproxy",
            Self::Istio => "istio",
        }
    }
}

/// The deployment request, raw as deserialized or resolved after defaulting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Spec {
    /// Application name, also the base name of every resource
    pub app: String,
    pub namespace: String,
    pub action: Option<Action>,
    pub kind: Option<Kind>,
    pub visibility: Option<Visibility>,

    /// Name of the credential whose defaults were merged under this spec
    pub credentials: String,

    /// Extra labels applied to every resource
    pub labels: BTreeMap<String, String>,

    /// Requested replica count; 0 means "not requested"
    pub replicas: i32,

    /// External hostnames
    pub hosts: Vec<String>,
    /// Hostnames served by the internal ingress
    pub internal_hosts: Vec<String>,
    pub basepath: String,
    pub whitelisted_ips: Vec<String>,
    pub trusted_ip_ranges: Vec<String>,

    /// Existing certificate secret; when empty a certificate secret manifest is rendered
    pub certificate_secret: String,

    pub use_google_cloud_credentials: Tristate,
    pub workload_identity: Tristate,
    pub disable_service_account_key_rotation: Tristate,
    pub inject_http_proxy_sidecar: Tristate,

    pub container: ContainerSpec,
    pub autoscale: AutoscaleSpec,
    pub vertical_pod_autoscaler: VpaSpec,
    pub request: RequestSpec,

    /// Deprecated single sidecar, folded into `sidecars` during defaulting
    pub sidecar: Option<SidecarSpec>,
    pub sidecars: Vec<SidecarSpec>,

    pub secrets: SecretsSpec,
    pub configs: ConfigsSpec,
    pub manifests: ManifestsSpec,
    pub strategy: StrategySpec,

    pub job: JobSpec,
    pub cronjob: CronJobSpec,
    pub storage: StorageSpec,
    pub pod_management_policy: String,

    pub iap: IapSpec,
    pub apigee: ApigeeSpec,
    pub esp: EspSpec,
    pub image_pull_secret: ImagePullSecretSpec,

    /// Pass-through pod scheduling and security data
    pub tolerations: Value,
    pub node_selector: BTreeMap<String, String>,
    pub security_context: Value,
}

impl Spec {
    pub fn action(&self) -> Action {
        self.action.unwrap_or(Action::Unknown)
    }

    pub fn kind(&self) -> Kind {
        self.kind.unwrap_or(Kind::Deployment)
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility.unwrap_or(Visibility::Private)
    }

    pub fn strategy_type(&self) -> StrategyType {
        self.strategy.r#type.unwrap_or(StrategyType::RollingUpdate)
    }

    pub fn is_atomic(&self) -> bool {
        self.strategy_type() == StrategyType::AtomicUpdate
    }

    pub fn has_sidecar(&self, sidecar_type: SidecarType) -> bool {
        self.sidecars.iter().any(|s| s.r#type == sidecar_type)
    }

    /// Whether any application or sidecar secret source is declared
    pub fn has_secrets(&self) -> bool {
        !self.secrets.keys.is_empty()
            || !self.container.secret_env.is_empty()
            || self.sidecars.iter().any(|s| !s.secret_env.is_empty())
    }

    pub fn has_configs(&self) -> bool {
        !self.configs.files.is_empty() || !self.configs.inline.is_empty()
    }

    pub fn uses_service_account_secret(&self) -> bool {
        self.use_google_cloud_credentials.is_enabled() && !self.workload_identity.is_enabled()
    }

    pub fn uses_autoscaler(&self) -> bool {
        self.autoscale.enabled.is_enabled() && self.strategy_type() != StrategyType::Recreate
    }

    pub fn uses_vertical_autoscaler(&self) -> bool {
        self.vertical_pod_autoscaler.enabled.is_enabled()
            && self.strategy_type() != StrategyType::Recreate
    }
}

/// A specification that went through the defaulting pass.
///
/// Only [`crate::domain::resolver::resolve`] constructs this, so holding one
/// proves every conventional default has been applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSpec(pub(crate) Spec);

impl ResolvedSpec {
    pub fn into_inner(self) -> Spec {
        self.0
    }

    /// Sidecars, for post-validation enrichment such as digest pinning
    pub(crate) fn sidecars_mut(&mut self) -> &mut Vec<SidecarSpec> {
        &mut self.0.sidecars
    }
}

impl Deref for ResolvedSpec {
    type Target = Spec;

    fn deref(&self) -> &Spec {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerSpec {
    pub repository: String,
    pub name: String,
    pub tag: String,
    pub port: u16,
    pub additional_ports: Vec<PortSpec>,
    pub env: BTreeMap<String, Value>,
    /// Environment variables served from the application secret
    pub secret_env: BTreeMap<String, String>,
    pub cpu: ResourceSpec,
    pub memory: ResourceSpec,
    pub liveness: ProbeSpec,
    pub readiness: ProbeSpec,
    pub metrics: MetricsSpec,
    pub lifecycle: LifecycleSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortSpec {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

/// Request and limit of a single compute resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub request: String,
    pub limit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProbeSpec {
    pub enabled: Tristate,
    pub path: String,
    pub port: u16,
    pub initial_delay_seconds: i32,
    pub timeout_seconds: i32,
    pub period_seconds: i32,
    pub failure_threshold: i32,
    pub success_threshold: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSpec {
    pub scrape: Tristate,
    pub path: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifecycleSpec {
    pub pre_stop_sleep: Tristate,
    pub pre_stop_sleep_seconds: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoscaleSpec {
    pub enabled: Tristate,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub cpu_percentage: i32,
    pub safety: SafetySpec,
}

/// Safety net keeping the autoscaler from scaling below observed traffic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SafetySpec {
    pub enabled: Tristate,
    pub prom_query: String,
    pub ratio: f64,
    pub delay_seconds: f64,
    pub scale_down_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VpaSpec {
    pub enabled: Tristate,
    pub update_mode: String,
}

/// Reverse proxy request handling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestSpec {
    pub timeout: String,
    pub proxy_connect_timeout: String,
    pub max_body_size: String,
    pub client_body_buffer_size: String,
    pub proxy_buffer_size: String,
    pub proxy_buffers_number: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    pub r#type: SidecarType,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cpu: ResourceSpec,
    #[serde(default)]
    pub memory: ResourceSpec,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(default)]
    pub secret_env: BTreeMap<String, String>,
    #[serde(default)]
    pub health_check_path: String,
    #[serde(default)]
    pub db_instance_connection_name: String,
    #[serde(default)]
    pub sql_proxy_port: u16,
    #[serde(default)]
    pub sql_proxy_termination_timeout_seconds: i32,
    /// Type-specific fields passed to the templates untouched
    #[serde(default)]
    pub custom_properties: BTreeMap<String, Value>,
}

impl SidecarSpec {
    pub fn new(sidecar_type: SidecarType) -> Self {
        Self {
            r#type: sidecar_type,
            image: String::new(),
            cpu: ResourceSpec::default(),
            memory: ResourceSpec::default(),
            env: BTreeMap::new(),
            secret_env: BTreeMap::new(),
            health_check_path: String::new(),
            db_instance_connection_name: String::new(),
            sql_proxy_port: 0,
            sql_proxy_termination_timeout_seconds: 0,
            custom_properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecretsSpec {
    pub keys: BTreeMap<String, Value>,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigsSpec {
    /// Config file templates, rendered with `data`
    pub files: Vec<String>,
    pub data: BTreeMap<String, Value>,
    /// Literal config file contents keyed by file name
    pub inline: BTreeMap<String, String>,
    pub mount_path: String,
}

/// User-supplied manifest files replacing or extending the computed set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestsSpec {
    pub files: Vec<String>,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategySpec {
    pub r#type: Option<StrategyType>,
    /// Generation discriminator, only set for atomic updates
    pub atomic_id: String,
    pub rolling_update: RollingUpdateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RollingUpdateSpec {
    pub max_surge: String,
    pub max_unavailable: String,
    /// Progress deadline as a duration string, e.g. `5m`
    pub timeout: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobSpec {
    pub restart_policy: String,
    pub backoff_limit: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CronJobSpec {
    pub schedule: String,
    pub concurrency_policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSpec {
    pub class: String,
    pub size: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IapSpec {
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApigeeSpec {
    pub auth_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EspSpec {
    pub service_name: String,
    pub config_id: String,
    pub openapi_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePullSecretSpec {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl ImagePullSecretSpec {
    pub fn is_configured(&self) -> bool {
        !self.registry.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tristate_roundtrips_through_option() {
        assert_eq!(Tristate::from(None), Tristate::Unset);
        assert_eq!(Tristate::from(Some(false)), Tristate::Disabled);
        assert_eq!(Option::<bool>::from(Tristate::Enabled), Some(true));
        assert_eq!(Tristate::Disabled.or(true), Tristate::Disabled);
        assert_eq!(Tristate::Unset.or(true), Tristate::Enabled);
    }

    #[test]
    fn test_unknown_action_does_not_fail_parsing() {
        let spec: Spec = serde_yaml::from_str("app: x\naction: promote-everything\n").unwrap();
        assert_eq!(spec.action, Some(Action::Unknown));
        assert_eq!(Action::parse("deploy-canary"), Some(Action::DeployCanary));
        assert_eq!(Action::parse(""), None);
    }

    #[test]
    fn test_spec_parses_camel_case_document() {
        let yaml = r#"
app: myapp
kind: headless-deployment
visibility: public-whitelist
useGoogleCloudCredentials: true
container:
  port: 8080
  cpu:
    limit: 500m
strategy:
  type: AtomicUpdate
sidecars:
  - type: cloudsqlproxy
    dbInstanceConnectionName: project:region:db
"#;
        let spec: Spec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kind(), Kind::HeadlessDeployment);
        assert_eq!(spec.visibility(), Visibility::PublicWhitelist);
        assert!(spec.use_google_cloud_credentials.is_enabled());
        assert_eq!(spec.container.cpu.limit, "500m");
        assert!(spec.is_atomic());
        assert!(spec.has_sidecar(SidecarType::Cloudsqlproxy));
        assert!(spec.workload_identity.is_unset());
    }

    #[test]
    fn test_action_tracks() {
        assert_eq!(Action::DeployCanary.track(), Some(Track::Canary));
        assert_eq!(Action::RollbackCanary.track(), Some(Track::Canary));
        assert_eq!(Action::DiffStable.track(), Some(Track::Stable));
        assert_eq!(Action::DeploySimple.track(), None);
    }
}
