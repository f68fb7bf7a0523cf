//! Label sanitization and label selectors
//!
//! Kubernetes label values are limited to 63 characters from `[A-Za-z0-9-_.]`
//! and must start and end with an alphanumeric character.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Prefix of environment variables that become resource labels
pub const LABEL_ENV_PREFIX: &str = "DEPLOY_LABEL_";

/// Label carrying the application name
pub const APP_LABEL: &str = "app";
/// Label carrying the canary/stable track
pub const TRACK_LABEL: &str = "track";
/// Label carrying the atomic generation discriminator
pub const ATOMIC_ID_LABEL: &str = "atomic-id";

const MAX_LABEL_LENGTH: usize = 63;

fn invalid_chars() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9\-_.]+").ok()).as_ref()
}

/// Make an arbitrary string safe to use as a label key segment or value
pub fn sanitize_label(value: &str) -> String {
    let replaced = match invalid_chars() {
        Some(re) => re.replace_all(value, "-").into_owned(),
        None => value.to_string(),
    };
    let truncated: String = replaced.chars().take(MAX_LABEL_LENGTH).collect();
    truncated
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Collect labels from `DEPLOY_LABEL_*` style environment variables.
///
/// `DEPLOY_LABEL_TEAM=Payments Core` becomes `team: Payments-Core`. Entries
/// whose key or value sanitizes to nothing are dropped.
pub fn labels_from_env<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let key = key.strip_prefix(LABEL_ENV_PREFIX)?;
            let key = sanitize_label(&key.to_lowercase().replace('_', "-"));
            let value = sanitize_label(&value);
            if key.is_empty() || value.is_empty() {
                None
            } else {
                Some((key, value))
            }
        })
        .collect()
}

/// Single requirement of a set-based label selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            // Kubernetes semantics: `k!=v` also matches objects without `k`
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::Exists(k) => labels.contains_key(k),
            Self::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(k, v) => write!(f, "{}={}", k, v),
            Self::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Self::Exists(k) => write!(f, "{}", k),
            Self::DoesNotExist(k) => write!(f, "!{}", k),
        }
    }
}

/// Conjunction of requirements, rendered in kubectl `-l` syntax
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    pub fn ne(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::NotEquals(key.into(), value.into()));
        self
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    pub fn does_not_exist(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::DoesNotExist(key.into()));
        self
    }

    /// Selector matching every label in the map exactly
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        labels
            .iter()
            .fold(Self::new(), |selector, (k, v)| selector.eq(k, v))
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sanitize_collapses_invalid_runs() {
        assert_eq!(sanitize_label("feature/new login!!"), "feature-new-login");
        assert_eq!(sanitize_label("--release_1.2--"), "release_1.2");
        assert_eq!(sanitize_label("@@@"), "");
    }

    #[test]
    fn test_sanitize_caps_length_then_trims() {
        let long = format!("{}-tail", "a".repeat(62));
        let sanitized = sanitize_label(&long);
        assert_eq!(sanitized.len(), 62);
        assert!(sanitized.chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_labels_from_env_only_uses_prefixed_vars() {
        let vars = vec![
            ("DEPLOY_LABEL_TEAM".to_string(), "Payments Core".to_string()),
            ("DEPLOY_LABEL_COST_CENTER".to_string(), "cc/42".to_string()),
            ("DEPLOY_LABEL_EMPTY".to_string(), "!!".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let result = labels_from_env(vars);
        assert_eq!(
            result,
            labels(&[("cost-center", "cc-42"), ("team", "Payments-Core")])
        );
    }

    #[test]
    fn test_selector_renders_kubectl_syntax() {
        let selector = LabelSelector::new()
            .eq("app", "myapp")
            .exists("atomic-id")
            .ne("atomic-id", "abc123");
        assert_eq!(selector.to_string(), "app=myapp,atomic-id,atomic-id!=abc123");
        assert_eq!(
            LabelSelector::new().eq("app", "x").does_not_exist("atomic-id").to_string(),
            "app=x,!atomic-id"
        );
    }

    #[test]
    fn test_selector_matching() {
        let selector = LabelSelector::new().eq("app", "myapp").exists("atomic-id");
        assert!(selector.matches(&labels(&[("app", "myapp"), ("atomic-id", "a")])));
        assert!(!selector.matches(&labels(&[("app", "myapp")])));
        assert!(!selector.matches(&labels(&[("app", "other"), ("atomic-id", "a")])));
    }
}
