//! Manifest wire types and the tagged variant over the recognized MIMEs.
//!
//! The OCI shapes come from `oci-spec`; the legacy Docker schema-1 and
//! schema-2 shapes are modeled here because `oci-spec` does not carry them.

use oci_spec::image::{ImageIndex, ImageManifest};
use serde::{Deserialize, Serialize};
use stevedore_core::error::{MirrorError, Result};

use crate::digest::ImageDigest;
use crate::platform::Platform;

/// Recognized top-level and blob media types.
pub mod media_types {
    pub const DOCKER_V2_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_V2_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_V2_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
    pub const DOCKER_V2_SCHEMA1_SIGNED: &str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
}

/// A blob descriptor in a schema-2 manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema2Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: ImageDigest,
    /// Non-empty for foreign layers whose content lives outside the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

/// A per-platform manifest descriptor in a Docker v2 manifest list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema2PlatformDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: ImageDigest,
    #[serde(default)]
    pub platform: Platform,
}

/// Docker v2 manifest list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema2List {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub manifests: Vec<Schema2PlatformDescriptor>,
}

/// Docker v2 schema-2 image manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema2Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub config: Schema2Descriptor,
    pub layers: Vec<Schema2Descriptor>,
}

/// One fsLayer entry in a Docker schema-1 manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema1FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: ImageDigest,
}

/// One history entry in a Docker schema-1 manifest; `v1Compatibility` holds
/// a JSON-encoded legacy image config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema1History {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// Docker v2 schema-1 manifest, with or without its JWS signatures.
///
/// `fs_layers` and `history` are parallel arrays ordered newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema1Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<Schema1FsLayer>,
    pub history: Vec<Schema1History>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<serde_json::Value>,
}

/// A normalized list entry: what both list shapes provide per platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDescriptor {
    pub media_type: String,
    pub digest: ImageDigest,
    pub platform: Platform,
}

/// The parsed top-level manifest, discriminated by MIME.
#[derive(Debug, Clone)]
pub enum SourceManifest {
    DockerList(Schema2List),
    OciIndex(ImageIndex),
    DockerSchema2(Schema2Manifest),
    DockerSchema1 { manifest: Schema1Manifest, signed: bool },
    OciManifest(ImageManifest),
    /// A MIME outside the recognized set; rejected at dispatch time.
    Unrecognized { mime: String },
}

impl SourceManifest {
    /// Parse manifest bytes under the declared MIME type.
    pub fn parse(mime: &str, bytes: &[u8]) -> Result<Self> {
        Ok(match mime {
            media_types::DOCKER_V2_LIST => Self::DockerList(serde_json::from_slice(bytes)?),
            media_types::OCI_INDEX => Self::OciIndex(serde_json::from_slice(bytes)?),
            media_types::DOCKER_V2_SCHEMA2 => Self::DockerSchema2(serde_json::from_slice(bytes)?),
            media_types::DOCKER_V2_SCHEMA1 => Self::DockerSchema1 {
                manifest: serde_json::from_slice(bytes)?,
                signed: false,
            },
            media_types::DOCKER_V2_SCHEMA1_SIGNED => Self::DockerSchema1 {
                manifest: serde_json::from_slice(bytes)?,
                signed: true,
            },
            media_types::OCI_MANIFEST => Self::OciManifest(serde_json::from_slice(bytes)?),
            other => Self::Unrecognized {
                mime: other.to_string(),
            },
        })
    }

    /// The recognized MIME of this manifest (the raw value for `Unrecognized`).
    pub fn media_type(&self) -> &str {
        match self {
            Self::DockerList(_) => media_types::DOCKER_V2_LIST,
            Self::OciIndex(_) => media_types::OCI_INDEX,
            Self::DockerSchema2(_) => media_types::DOCKER_V2_SCHEMA2,
            Self::DockerSchema1 { signed: false, .. } => media_types::DOCKER_V2_SCHEMA1,
            Self::DockerSchema1 { signed: true, .. } => media_types::DOCKER_V2_SCHEMA1_SIGNED,
            Self::OciManifest(_) => media_types::OCI_MANIFEST,
            Self::Unrecognized { mime } => mime,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::DockerList(_) | Self::OciIndex(_))
    }

    /// Normalized per-platform entries for the two list shapes.
    pub fn list_entries(&self) -> Result<Vec<ManifestDescriptor>> {
        match self {
            Self::DockerList(list) => Ok(list
                .manifests
                .iter()
                .map(|m| ManifestDescriptor {
                    media_type: m.media_type.clone(),
                    digest: m.digest.clone(),
                    platform: m.platform.clone(),
                })
                .collect()),
            Self::OciIndex(index) => index
                .manifests()
                .iter()
                .map(|d| {
                    Ok(ManifestDescriptor {
                        media_type: d.media_type().to_string(),
                        digest: d.digest().to_string().parse()?,
                        platform: d
                            .platform()
                            .as_ref()
                            .map(platform_from_oci)
                            .unwrap_or_default(),
                    })
                })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }
}

fn platform_from_oci(p: &oci_spec::image::Platform) -> Platform {
    Platform {
        architecture: p.architecture().to_string(),
        os: p.os().to_string(),
        os_version: p.os_version().clone().unwrap_or_default(),
        os_features: p.os_features().clone().unwrap_or_default(),
        variant: p.variant().clone().unwrap_or_default(),
    }
}

/// Determine the MIME of raw manifest bytes when the server or layout did
/// not declare one. Mirrors the usual registry heuristics: an explicit
/// `mediaType` wins; `schemaVersion: 1` means schema-1 (signed when a
/// signature block is present); otherwise the document shape decides.
pub fn guess_media_type(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    if let Some(mime) = value.get("mediaType").and_then(|v| v.as_str()) {
        return Some(mime.to_string());
    }
    if value.get("schemaVersion").and_then(|v| v.as_u64()) == Some(1) {
        let signed = value
            .get("signatures")
            .and_then(|v| v.as_array())
            .map(|a| !a.is_empty())
            .unwrap_or(false);
        return Some(if signed {
            media_types::DOCKER_V2_SCHEMA1_SIGNED.to_string()
        } else {
            media_types::DOCKER_V2_SCHEMA1.to_string()
        });
    }
    // Docker documents always carry an explicit mediaType, so an untyped
    // document is one of the OCI shapes.
    if value.get("manifests").is_some() {
        return Some(media_types::OCI_INDEX.to_string());
    }
    if value.get("config").is_some() {
        return Some(media_types::OCI_MANIFEST.to_string());
    }
    None
}

/// Extract the config blob digest from single-image manifest bytes, used
/// when resolving a config without fully modeling the manifest.
pub fn config_digest(reference: &str, bytes: &[u8], mime: &str) -> Result<ImageDigest> {
    match mime {
        media_types::DOCKER_V2_SCHEMA2 => {
            let manifest: Schema2Manifest = serde_json::from_slice(bytes)?;
            Ok(manifest.config.digest)
        }
        media_types::OCI_MANIFEST => {
            let manifest: ImageManifest = serde_json::from_slice(bytes)?;
            manifest.config().digest().to_string().parse()
        }
        other => Err(MirrorError::InspectFailed {
            reference: reference.to_string(),
            message: format!("manifest MIME {other:?} has no config descriptor"),
        }),
    }
}
