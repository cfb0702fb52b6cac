//! Image reference parsing and the typed references handed to the transport.
//!
//! Parses references like `registry.example.io/mirror/nginx:1.25` into
//! structured components and models the transport-level reference as a
//! tagged variant (remote registry vs. on-disk OCI layout).

use std::fmt;
use std::path::PathBuf;

use stevedore_core::error::{MirrorError, Result};

use crate::digest::ImageDigest;

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "docker.io", "registry.example.io:5000")
    pub registry: String,
    /// Repository path, project and name (e.g., "library/nginx")
    pub repository: String,
    /// Tag (e.g., "latest", "1.25")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<ImageDigest>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `registry.io/org/image:tag`
    /// - `registry.io/org/image@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MirrorError::BadReference("empty image reference".to_string()));
        }

        // Split off the digest first (@ separator).
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((rest, digest_part)) => (rest, Some(digest_part.parse::<ImageDigest>()?)),
            None => (reference, None),
        };

        // Split the tag: the last colon after the last slash.
        let (name, tag) = match name_tag.rfind('/') {
            Some(slash_pos) => match name_tag[slash_pos + 1..].rfind(':') {
                Some(colon_pos) => {
                    let colon_pos = slash_pos + 1 + colon_pos;
                    (&name_tag[..colon_pos], Some(name_tag[colon_pos + 1..].to_string()))
                }
                None => (name_tag, None),
            },
            None => match name_tag.rfind(':') {
                // A colon with only digits after it is a registry port,
                // which cannot occur without a slash; treat as tag.
                Some(colon_pos) => (&name_tag[..colon_pos], Some(name_tag[colon_pos + 1..].to_string())),
                None => (name_tag, None),
            },
        };
        if matches!(&tag, Some(t) if t.is_empty()) {
            return Err(MirrorError::BadReference(format!(
                "empty tag in reference {reference:?}"
            )));
        }

        let (registry, repository) = split_registry_repository(name)?;

        // Apply the default tag only when neither tag nor digest is present.
        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// This reference with its tag dropped and the given digest pinned,
    /// i.e. `{registry}/{repository}@{digest}`.
    pub fn with_digest(&self, digest: &ImageDigest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.clone()),
        }
    }

    /// The full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(&digest.to_string());
        }
        s
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    // The first component is a registry hostname when it contains a dot or a
    // port, or is "localhost".
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(MirrorError::BadReference(format!(
                    "empty repository in reference {name:?}"
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    // No registry detected: use the default.
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        // A bare name like "nginx" lives under "library/" on Docker Hub.
        format!("library/{name}")
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

/// A typed reference the transport can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// An image in a remote registry.
    Registry(ImageReference),
    /// A single-image OCI layout directory on disk.
    OciLayout { dir: PathBuf },
}

impl ImageRef {
    /// The layout directory, when this is an on-disk reference.
    pub fn layout_dir(&self) -> Option<&std::path::Path> {
        match self {
            ImageRef::OciLayout { dir } => Some(dir),
            ImageRef::Registry(_) => None,
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Registry(r) => write!(f, "docker://{r}"),
            ImageRef::OciLayout { dir } => write!(f, "oci:{}", dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("1.25".to_string()));
    }

    #[test]
    fn test_parse_user_repo() {
        let r = ImageReference::parse("myuser/myimage").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "myuser/myimage");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("registry.example.io/mirror/app:v1.0").unwrap();
        assert_eq!(r.registry, "registry.example.io");
        assert_eq!(r.repository, "mirror/app");
        assert_eq!(r.tag, Some("v1.0".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("registry.example.io:5000/app:v1").unwrap();
        assert_eq!(r.registry, "registry.example.io:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageReference::parse("localhost/app:test").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "app");
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse(&format!("registry.example.io/mirror/app@sha256:{HEX}")).unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.unwrap().encoded(), HEX);
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse(&format!("registry.example.io/mirror/app:v1@sha256:{HEX}")).unwrap();
        assert_eq!(r.tag, Some("v1".to_string()));
        assert!(r.digest.is_some());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
        assert!(ImageReference::parse("nginx:").is_err());
    }

    #[test]
    fn test_parse_deep_repository_path() {
        let r = ImageReference::parse("registry.example.io/org/sub/app:v1").unwrap();
        assert_eq!(r.repository, "org/sub/app");
    }

    #[test]
    fn test_with_digest_drops_tag() {
        let digest: ImageDigest = format!("sha256:{HEX}").parse().unwrap();
        let r = ImageReference::parse("registry.example.io/mirror/app:v1")
            .unwrap()
            .with_digest(&digest);
        assert_eq!(
            r.full_reference(),
            format!("registry.example.io/mirror/app@sha256:{HEX}")
        );
    }

    #[test]
    fn test_image_ref_display() {
        let r = ImageRef::Registry(ImageReference::parse("nginx:1.25").unwrap());
        assert_eq!(r.to_string(), "docker://docker.io/library/nginx:1.25");
        let r = ImageRef::OciLayout {
            dir: PathBuf::from("/tmp/out/abc"),
        };
        assert_eq!(r.to_string(), "oci:/tmp/out/abc");
    }
}
