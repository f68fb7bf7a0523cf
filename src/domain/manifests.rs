//! Manifest template selection
//!
//! Derives the minimal set of built-in templates a specification needs, then
//! merges the user's local override files into it. The output only depends on
//! the specification, so repeated calls yield the same sequence.

use std::path::Path;

use super::spec::{Action, Kind, Spec, Visibility};

pub const NAMESPACE: &str = "namespace.yaml";
pub const SERVICE_ACCOUNT: &str = "serviceaccount.yaml";
pub const DEPLOYMENT: &str = "deployment.yaml";
pub const STATEFULSET: &str = "statefulset.yaml";
pub const JOB: &str = "job.yaml";
pub const CRONJOB: &str = "cronjob.yaml";
pub const SERVICE: &str = "service.yaml";
pub const HEADLESS_SERVICE: &str = "service-headless.yaml";
pub const ATOMIC_SERVICE: &str = "service-atomic.yaml";
pub const CERTIFICATE_SECRET: &str = "certificate-secret.yaml";
pub const POD_DISRUPTION_BUDGET: &str = "poddisruptionbudget.yaml";
pub const HORIZONTAL_POD_AUTOSCALER: &str = "horizontalpodautoscaler.yaml";
pub const VERTICAL_POD_AUTOSCALER: &str = "verticalpodautoscaler.yaml";
pub const INGRESS: &str = "ingress.yaml";
pub const INTERNAL_INGRESS: &str = "ingress-internal.yaml";
pub const APIGEE_INGRESS: &str = "ingress-apigee.yaml";
pub const ESP_INGRESS: &str = "ingress-esp.yaml";
pub const IAP_BACKEND_CONFIG: &str = "backendconfig.yaml";
pub const IAP_OAUTH_SECRET: &str = "iap-oauth-credentials-secret.yaml";
pub const APPLICATION_SECRETS: &str = "application-secrets.yaml";
pub const SERVICE_ACCOUNT_SECRET: &str = "service-account-secret.yaml";
pub const CONFIGMAP: &str = "configmap.yaml";
pub const IMAGE_PULL_SECRET: &str = "image-pull-secret.yaml";

/// Select the templates to merge for `spec`, with local overrides applied.
///
/// Restart, rollback and unknown actions act purely through cluster-side
/// mutation and select nothing, as does `config-to-file`, which never
/// touches the cluster.
pub fn select_templates(spec: &Spec, include_disruption_budget: bool) -> Vec<String> {
    let action = spec.action();
    if !(action.is_deploy() || action.is_diff()) || spec.kind() == Kind::ConfigToFile {
        return Vec::new();
    }

    let mut templates: Vec<&'static str> = base_templates(spec);

    let kind = spec.kind();
    let visibility = spec.visibility();

    let rules: [(bool, &[&'static str]); 12] = [
        (
            include_disruption_budget
                && kind.has_rollout()
                && matches!(
                    action,
                    Action::DeploySimple
                        | Action::DeployStable
                        | Action::DiffSimple
                        | Action::DiffStable
                ),
            &[POD_DISRUPTION_BUDGET],
        ),
        (
            kind.has_rollout() && spec.uses_autoscaler(),
            &[HORIZONTAL_POD_AUTOSCALER],
        ),
        (
            kind.has_rollout() && spec.uses_vertical_autoscaler(),
            &[VERTICAL_POD_AUTOSCALER],
        ),
        (
            kind == Kind::Deployment
                && matches!(
                    visibility,
                    Visibility::Private | Visibility::Iap | Visibility::PublicWhitelist
                ),
            &[INGRESS],
        ),
        (
            kind == Kind::Deployment && visibility == Visibility::Apigee,
            &[APIGEE_INGRESS],
        ),
        (
            kind == Kind::Deployment && visibility.is_esp(),
            &[ESP_INGRESS],
        ),
        (
            kind == Kind::Deployment && visibility == Visibility::Iap,
            &[IAP_BACKEND_CONFIG, IAP_OAUTH_SECRET],
        ),
        (
            kind == Kind::Deployment && !spec.internal_hosts.is_empty(),
            &[INTERNAL_INGRESS],
        ),
        (spec.has_secrets(), &[APPLICATION_SECRETS]),
        (
            !kind.is_config() && spec.uses_service_account_secret(),
            &[SERVICE_ACCOUNT_SECRET],
        ),
        (spec.has_configs(), &[CONFIGMAP]),
        (
            !kind.is_config() && spec.image_pull_secret.is_configured(),
            &[IMAGE_PULL_SECRET],
        ),
    ];

    for (applies, names) in rules {
        if applies {
            templates.extend_from_slice(names);
        }
    }

    let computed = templates.into_iter().map(String::from).collect();
    merge_overrides(computed, &spec.manifests.files)
}

fn base_templates(spec: &Spec) -> Vec<&'static str> {
    let certificate: &[&'static str] = if spec.certificate_secret.is_empty() {
        &[CERTIFICATE_SECRET]
    } else {
        &[]
    };

    let mut base = match spec.kind() {
        Kind::Deployment => vec![NAMESPACE, SERVICE_ACCOUNT, DEPLOYMENT, SERVICE],
        Kind::HeadlessDeployment => return vec![NAMESPACE, SERVICE_ACCOUNT, DEPLOYMENT],
        Kind::Statefulset => vec![
            NAMESPACE,
            SERVICE,
            HEADLESS_SERVICE,
            SERVICE_ACCOUNT,
            STATEFULSET,
        ],
        Kind::Job => return vec![NAMESPACE, SERVICE_ACCOUNT, JOB],
        Kind::Cronjob => return vec![NAMESPACE, SERVICE_ACCOUNT, CRONJOB],
        Kind::Config | Kind::ConfigToFile => return Vec::new(),
    };
    base.extend_from_slice(certificate);
    base
}

/// Replace computed templates by overrides with the same file name, keeping
/// their position; append overrides that match nothing.
pub fn merge_overrides(computed: Vec<String>, overrides: &[String]) -> Vec<String> {
    let mut merged = computed;

    for override_path in overrides {
        let name = basename(override_path);
        match merged.iter().position(|t| basename(t) == name) {
            Some(index) => merged[index] = override_path.clone(),
            None => merged.push(override_path.clone()),
        }
    }

    merged
}

pub(crate) fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
