//! Container registry operations
//!
//! Resolves sidecar image tags to content-addressed digests with
//! `skopeo inspect`. Resolution is best effort: a failed lookup keeps the tag.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::ResolvedSpec;
use crate::error::EnrichmentError;
use crate::tools::{get_tool_path, SKOPEO};

/// `resolve_digest(image_ref) -> digest`
#[async_trait]
pub trait DigestResolver: Send + Sync {
    async fn resolve_digest(&self, image: &str) -> Result<String, EnrichmentError>;
}

/// Digest lookup through `skopeo inspect`
pub struct SkopeoDigestResolver {
    binary: String,
}

impl SkopeoDigestResolver {
    pub fn new() -> Self {
        Self {
            binary: get_tool_path(SKOPEO),
        }
    }
}

impl Default for SkopeoDigestResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DigestResolver for SkopeoDigestResolver {
    async fn resolve_digest(&self, image: &str) -> Result<String, EnrichmentError> {
        let reference = format!("docker://{}", image);
        let output = Command::new(&self.binary)
            .args(["inspect", "--format", "{{.Digest}}", &reference])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EnrichmentError::InspectFailed {
                image: image.to_string(),
                message: format!("skopeo inspect failed: {}", e),
            })?;

        if !output.status.success() {
            return Err(EnrichmentError::InspectFailed {
                image: image.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let digest = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if digest.is_empty() {
            return Err(EnrichmentError::MissingDigest {
                image: image.to_string(),
            });
        }

        Ok(digest)
    }
}

/// Strip the tag from an image reference: `repo/name:tag` -> `repo/name`
pub fn image_repository(image: &str) -> &str {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(colon) => &image[..name_start + colon],
        None => image,
    }
}

/// Replace sidecar image tags with digests where the registry knows them
pub async fn pin_sidecar_digests<D>(mut spec: ResolvedSpec, resolver: &D) -> ResolvedSpec
where
    D: DigestResolver + ?Sized,
{
    for sidecar in spec.sidecars_mut() {
        if sidecar.image.is_empty() || sidecar.image.contains('@') {
            continue;
        }
        match resolver.resolve_digest(&sidecar.image).await {
            Ok(digest) => {
                let pinned = format!("{}@{}", image_repository(&sidecar.image), digest);
                info!("Pinned {} sidecar to {}", sidecar.r#type.as_str(), pinned);
                sidecar.image = pinned;
            }
            Err(e) => {
                warn!("Keeping {} unpinned: {}", sidecar.image, e);
            }
        }
    }
    debug!("Sidecar digest enrichment done");
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::ResolveContext;
    use crate::domain::resolver::set_defaults;
    use crate::domain::spec::{SidecarSpec, SidecarType, Spec};

    struct FixedResolver;

    #[async_trait]
    impl DigestResolver for FixedResolver {
        async fn resolve_digest(&self, image: &str) -> Result<String, EnrichmentError> {
            if image.contains("cloudsql") {
                Err(EnrichmentError::MissingDigest {
                    image: image.to_string(),
                })
            } else {
                Ok("sha256:feedface".to_string())
            }
        }
    }

    #[test]
    fn test_image_repository() {
        assert_eq!(image_repository("nginx:1.25"), "nginx");
        assert_eq!(
            image_repository("localhost:5000/team/proxy:2.1"),
            "localhost:5000/team/proxy"
        );
        assert_eq!(image_repository("localhost:5000/team/proxy"), "localhost:5000/team/proxy");
    }

    #[test]
    fn test_failed_lookup_keeps_tag() {
        let mut raw = Spec {
            app: "myapp".to_string(),
            ..Default::default()
        };
        raw.sidecars.push(SidecarSpec::new(SidecarType::Cloudsqlproxy));
        raw.sidecars.push(SidecarSpec::new(SidecarType::Openresty));
        let spec = set_defaults(raw, &ResolveContext::default());
        let original = spec.sidecars[0].image.clone();

        let spec = tokio_test::block_on(pin_sidecar_digests(spec, &FixedResolver));
        assert_eq!(spec.sidecars[0].image, original);
        assert!(spec.sidecars[1].image.ends_with("@sha256:feedface"));
        assert!(!spec.sidecars[1].image.contains(":1.15"));
    }
}
