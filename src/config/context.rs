//! Invocation context assembly

use tracing::info;

use crate::domain::labels::labels_from_env;
use crate::domain::{GitIdentity, ReleaseMetadata, ResolveContext};

/// Generate a short release id, the first 8 hex characters of a v4 uuid
pub fn generate_release_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

/// Build the resolver context.
///
/// `env` supplies the `DEPLOY_LABEL_*` variables. A missing release id is
/// generated so an atomic identifier can always be derived.
pub fn build_context<I>(
    git: GitIdentity,
    build_version: String,
    mut release: ReleaseMetadata,
    env: I,
) -> ResolveContext
where
    I: IntoIterator<Item = (String, String)>,
{
    if release.id.trim().is_empty() {
        release.id = generate_release_id();
        info!("No release id given, using {}", release.id);
    }

    ResolveContext {
        git,
        build_version,
        release,
        labels: labels_from_env(env),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_id_is_short_hex() {
        let id = generate_release_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_release_id());
    }

    #[test]
    fn test_context_keeps_given_release_id_and_collects_labels() {
        let release = ReleaseMetadata {
            id: "r-42".to_string(),
            ..Default::default()
        };
        let env = vec![("DEPLOY_LABEL_TEAM".to_string(), "payments".to_string())];
        let ctx = build_context(GitIdentity::default(), "1.2.3".to_string(), release, env);

        assert_eq!(ctx.release.id, "r-42");
        assert_eq!(ctx.build_version, "1.2.3");
        assert_eq!(ctx.labels.get("team").map(String::as_str), Some("payments"));
    }

    #[test]
    fn test_missing_release_id_is_generated() {
        let ctx = build_context(
            GitIdentity::default(),
            String::new(),
            ReleaseMetadata::default(),
            Vec::new(),
        );
        assert_eq!(ctx.release.id.len(), 8);
    }
}
