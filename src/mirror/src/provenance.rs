//! Provenance records emitted for every successfully copied variant.
//!
//! These records are what the archive layer persists as its on-disk index;
//! together they are sufficient to reconstruct which blobs belong to which
//! platform variant of an image.

use oci_spec::image::ImageManifest;
use serde::{Deserialize, Serialize};
use stevedore_core::error::Result;

use crate::digest::ImageDigest;
use crate::manifest::Schema2Manifest;

/// The structured summary of one copied platform variant.
///
/// `digest` is always the digest recomputed from the manifest bytes actually
/// stored at the destination, never the source's advertised digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub arch: String,
    pub os: String,
    #[serde(rename = "osVersion", default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    #[serde(rename = "osFeatures", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    /// Layer digests, excluding foreign layers hosted outside the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<ImageDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ImageDigest>,
    pub digest: ImageDigest,
}

/// The per-image provenance record harvested after a copy session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// `registry/project/name`, without tag or digest.
    pub source: String,
    pub tag: String,
    #[serde(rename = "archList")]
    pub arch_list: Vec<String>,
    #[serde(rename = "osList")]
    pub os_list: Vec<String>,
    pub images: Vec<ImageSpec>,
}

/// Fill config and layer digests from a schema-2 manifest.
pub fn update_spec_from_schema2(spec: &mut ImageSpec, manifest: &Schema2Manifest) {
    spec.config = Some(manifest.config.digest.clone());
    for layer in &manifest.layers {
        if !layer.urls.is_empty() {
            // Foreign layer: fetched from the Internet at runtime, never
            // part of the archive.
            continue;
        }
        spec.layers.push(layer.digest.clone());
    }
}

/// Fill config and layer digests from an OCI image manifest.
pub fn update_spec_from_oci_manifest(spec: &mut ImageSpec, manifest: &ImageManifest) -> Result<()> {
    spec.config = Some(manifest.config().digest().to_string().parse()?);
    for layer in manifest.layers() {
        if layer.urls().as_ref().is_some_and(|urls| !urls.is_empty()) {
            continue;
        }
        spec.layers.push(layer.digest().to_string().parse()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::media_types;

    const DIGEST_A: &str =
        "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const DIGEST_B: &str =
        "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const DIGEST_C: &str =
        "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

    fn empty_spec() -> ImageSpec {
        ImageSpec {
            arch: "amd64".into(),
            os: "linux".into(),
            os_version: String::new(),
            os_features: Vec::new(),
            variant: String::new(),
            media_type: media_types::DOCKER_V2_SCHEMA2.into(),
            layers: Vec::new(),
            config: None,
            digest: DIGEST_A.parse().unwrap(),
        }
    }

    #[test]
    fn test_schema2_foreign_layers_excluded() {
        let manifest: Schema2Manifest = serde_json::from_str(&format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "{}",
                "config": {{ "mediaType": "{}", "size": 10, "digest": "{DIGEST_A}" }},
                "layers": [
                    {{ "mediaType": "{}", "size": 20, "digest": "{DIGEST_B}" }},
                    {{
                        "mediaType": "{}",
                        "size": 30,
                        "digest": "{DIGEST_C}",
                        "urls": ["https://layers.example.io/c"]
                    }}
                ]
            }}"#,
            media_types::DOCKER_V2_SCHEMA2,
            media_types::DOCKER_CONFIG,
            media_types::DOCKER_LAYER_TAR_GZIP,
            media_types::DOCKER_LAYER_TAR_GZIP,
        ))
        .unwrap();

        let mut spec = empty_spec();
        update_spec_from_schema2(&mut spec, &manifest);
        assert_eq!(spec.config.as_ref().unwrap().to_string(), DIGEST_A);
        assert_eq!(spec.layers.len(), 1);
        assert_eq!(spec.layers[0].to_string(), DIGEST_B);
    }

    #[test]
    fn test_oci_manifest_foreign_layers_excluded() {
        let manifest: ImageManifest = serde_json::from_str(&format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "{}",
                "config": {{ "mediaType": "{}", "size": 10, "digest": "{DIGEST_A}" }},
                "layers": [
                    {{
                        "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                        "size": 20,
                        "digest": "{DIGEST_B}"
                    }},
                    {{
                        "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                        "size": 30,
                        "digest": "{DIGEST_C}",
                        "urls": ["https://layers.example.io/c"]
                    }}
                ]
            }}"#,
            media_types::OCI_MANIFEST,
            media_types::OCI_CONFIG,
        ))
        .unwrap();

        let mut spec = empty_spec();
        update_spec_from_oci_manifest(&mut spec, &manifest).unwrap();
        assert_eq!(spec.layers.len(), 1);
        assert_eq!(spec.layers[0].to_string(), DIGEST_B);
    }

    #[test]
    fn test_image_record_serializes_list_keys() {
        let image = Image {
            source: "registry.example.io/mirror/app".into(),
            tag: "v1".into(),
            arch_list: vec!["amd64".into()],
            os_list: vec!["linux".into()],
            images: vec![],
        };
        let json = serde_json::to_string(&image).unwrap();
        assert!(json.contains("\"archList\""));
        assert!(json.contains("\"osList\""));
    }
}
