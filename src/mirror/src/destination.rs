//! The destination capability: where copied variants land and how they are
//! addressed per platform.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use stevedore_core::error::{MirrorError, Result};

use crate::digest::ImageDigest;
use crate::reference::{ImageRef, ImageReference};
use crate::transport::SystemContext;

/// The enumerated destination kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    /// A remote registry repository.
    Registry,
    /// An on-disk directory holding one OCI layout per variant, each named
    /// by the variant's encoded manifest digest.
    OciLayout,
}

/// A copy destination.
pub struct Destination {
    kind: DestinationKind,
    reference: Option<ImageReference>,
    directory: Option<PathBuf>,
    system_context: SystemContext,
    known_digests: HashSet<ImageDigest>,
}

impl Destination {
    /// A registry destination; per-variant references are tags derived from
    /// this reference's tag and the platform tuple.
    pub fn registry(reference: ImageReference, system_context: SystemContext) -> Self {
        Self {
            kind: DestinationKind::Registry,
            reference: Some(reference),
            directory: None,
            system_context,
            known_digests: HashSet::new(),
        }
    }

    /// An on-disk destination; per-variant references are OCI layout
    /// directories under `directory`, named by encoded digest.
    pub fn oci_layout(directory: impl Into<PathBuf>, system_context: SystemContext) -> Self {
        Self {
            kind: DestinationKind::OciLayout,
            reference: None,
            directory: Some(directory.into()),
            system_context,
            known_digests: HashSet::new(),
        }
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    /// The layout base directory, when `kind() == OciLayout`.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn system_context(&self) -> &SystemContext {
        &self.system_context
    }

    /// A human-readable name for error messages.
    pub fn reference_name(&self) -> String {
        match (&self.reference, &self.directory) {
            (Some(reference), _) => reference.full_reference(),
            (None, Some(directory)) => directory.display().to_string(),
            (None, None) => String::new(),
        }
    }

    /// Tell the destination it already holds a digest. Registry destinations
    /// learn their contents from the caller (the archive layer knows what it
    /// holds); on-disk layouts are probed directly.
    pub fn register_digest(&mut self, digest: ImageDigest) {
        self.known_digests.insert(digest);
    }

    /// Whether the destination already advertises this digest as present.
    pub fn have_digest(&self, digest: &ImageDigest) -> bool {
        if self.known_digests.contains(digest) {
            return true;
        }
        match (self.kind, &self.directory) {
            (DestinationKind::OciLayout, Some(directory)) => {
                directory.join(digest.encoded()).is_dir()
            }
            _ => false,
        }
    }

    /// The typed reference for one platform variant.
    ///
    /// `digest_encoded` may be the literal placeholder `"UNKNOW"` when the
    /// final digest is not knowable before the copy (schema-1 conversion);
    /// the placeholder directory is renamed after the copy completes.
    pub fn reference_multi_arch(
        &self,
        os: &str,
        os_version: &str,
        arch: &str,
        variant: &str,
        digest_encoded: &str,
    ) -> Result<ImageRef> {
        if digest_encoded.is_empty() {
            return Err(MirrorError::BadReference(
                "empty digest for destination reference".into(),
            ));
        }
        match self.kind {
            DestinationKind::OciLayout => {
                let directory = self.directory.as_ref().ok_or_else(|| {
                    MirrorError::BadReference("OCI layout destination has no directory".into())
                })?;
                Ok(ImageRef::OciLayout {
                    dir: directory.join(digest_encoded),
                })
            }
            DestinationKind::Registry => {
                let reference = self.reference.as_ref().ok_or_else(|| {
                    MirrorError::BadReference("registry destination has no reference".into())
                })?;
                let mut tag = reference.tag.clone().unwrap_or_else(|| "latest".to_string());
                for part in [os, os_version, arch, variant] {
                    if !part.is_empty() {
                        tag.push('-');
                        tag.push_str(part);
                    }
                }
                Ok(ImageRef::Registry(ImageReference {
                    registry: reference.registry.clone(),
                    repository: reference.repository.clone(),
                    tag: Some(tag),
                    digest: None,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEX: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_layout_reference_multi_arch() {
        let dest = Destination::oci_layout("/tmp/out", SystemContext::default());
        let r = dest
            .reference_multi_arch("linux", "", "amd64", "", HEX)
            .unwrap();
        assert_eq!(r, ImageRef::OciLayout {
            dir: PathBuf::from("/tmp/out").join(HEX),
        });
    }

    #[test]
    fn test_layout_reference_unknow_placeholder() {
        let dest = Destination::oci_layout("/tmp/out", SystemContext::default());
        let r = dest
            .reference_multi_arch("linux", "", "amd64", "", "UNKNOW")
            .unwrap();
        assert_eq!(r.layout_dir().unwrap(), Path::new("/tmp/out/UNKNOW"));
    }

    #[test]
    fn test_registry_reference_tag_suffix() {
        let reference = ImageReference::parse("registry.example.io/mirror/app:v1").unwrap();
        let dest = Destination::registry(reference, SystemContext::default());
        let r = dest
            .reference_multi_arch("linux", "", "arm", "v7", HEX)
            .unwrap();
        match r {
            ImageRef::Registry(r) => {
                assert_eq!(r.full_reference(), "registry.example.io/mirror/app:v1-linux-arm-v7")
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn test_registry_reference_includes_os_version() {
        let reference = ImageReference::parse("registry.example.io/mirror/app:v1").unwrap();
        let dest = Destination::registry(reference, SystemContext::default());
        let r = dest
            .reference_multi_arch("windows", "10.0.17763", "amd64", "", HEX)
            .unwrap();
        match r {
            ImageRef::Registry(r) => assert_eq!(
                r.tag.as_deref(),
                Some("v1-windows-10.0.17763-amd64")
            ),
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn test_empty_digest_rejected() {
        let dest = Destination::oci_layout("/tmp/out", SystemContext::default());
        assert!(dest.reference_multi_arch("linux", "", "amd64", "", "").is_err());
    }

    #[test]
    fn test_have_digest_probes_layout_directory() {
        let tmp = TempDir::new().unwrap();
        let dest = Destination::oci_layout(tmp.path(), SystemContext::default());
        let digest: ImageDigest = format!("sha256:{HEX}").parse().unwrap();
        assert!(!dest.have_digest(&digest));
        std::fs::create_dir_all(tmp.path().join(HEX)).unwrap();
        assert!(dest.have_digest(&digest));
    }

    #[test]
    fn test_have_digest_registered() {
        let reference = ImageReference::parse("registry.example.io/mirror/app:v1").unwrap();
        let mut dest = Destination::registry(reference, SystemContext::default());
        let digest: ImageDigest = format!("sha256:{HEX}").parse().unwrap();
        assert!(!dest.have_digest(&digest));
        dest.register_digest(digest.clone());
        assert!(dest.have_digest(&digest));
    }
}
