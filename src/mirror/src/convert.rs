//! Docker schema-1 to schema-2 conversion.
//!
//! Schema-1 manifests carry their layers newest-first with a JSON-encoded
//! legacy config per history entry. Conversion reorders the kept layers
//! bottom-first, drops empty (`throwaway`) entries, synthesizes a schema-2
//! config blob from the newest history entry, and emits a schema-2 manifest
//! with real blob sizes. The resulting digest necessarily differs from the
//! schema-1 digest.

use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::json;
use sha2::{Digest, Sha256};
use stevedore_core::error::{MirrorError, Result};

use crate::digest::ImageDigest;
use crate::manifest::{media_types, Schema1Manifest};

/// The converted image: schema-2 manifest bytes plus the synthesized config.
pub struct ConvertedImage {
    pub manifest: Vec<u8>,
    pub config: Vec<u8>,
    pub config_digest: ImageDigest,
}

/// The layer digests that survive conversion, bottom-first, with
/// `throwaway` history entries skipped. Duplicate blob sums are preserved.
pub fn kept_layer_digests(manifest: &Schema1Manifest) -> Result<Vec<ImageDigest>> {
    if manifest.fs_layers.len() != manifest.history.len() {
        return Err(MirrorError::InspectFailed {
            reference: format!("{}:{}", manifest.name, manifest.tag),
            message: "schema1 fsLayers and history lengths differ".into(),
        });
    }
    let mut kept = Vec::new();
    for (layer, history) in manifest.fs_layers.iter().zip(manifest.history.iter()).rev() {
        let compat: serde_json::Value = serde_json::from_str(&history.v1_compatibility)?;
        if compat
            .get("throwaway")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            continue;
        }
        kept.push(layer.blob_sum.clone());
    }
    Ok(kept)
}

/// Convert a schema-1 manifest given its kept layer blobs (bottom-first,
/// in the order returned by [`kept_layer_digests`]).
pub fn schema1_to_schema2(
    manifest: &Schema1Manifest,
    layers: &[(ImageDigest, Vec<u8>)],
) -> Result<ConvertedImage> {
    let newest = manifest
        .history
        .first()
        .ok_or_else(|| MirrorError::InspectFailed {
            reference: format!("{}:{}", manifest.name, manifest.tag),
            message: "schema1 manifest has no history".into(),
        })?;
    let compat: serde_json::Value = serde_json::from_str(&newest.v1_compatibility)?;

    let mut diff_ids = Vec::with_capacity(layers.len());
    for (_, data) in layers {
        diff_ids.push(format!("sha256:{}", uncompressed_sha256(data)?));
    }

    let architecture = compat
        .get("architecture")
        .and_then(|v| v.as_str())
        .unwrap_or(if manifest.architecture.is_empty() {
            "amd64"
        } else {
            &manifest.architecture
        })
        .to_string();
    let os = compat
        .get("os")
        .and_then(|v| v.as_str())
        .unwrap_or("linux")
        .to_string();

    let mut config = serde_json::Map::new();
    config.insert("architecture".into(), json!(architecture));
    if let Some(created) = compat.get("created") {
        config.insert("created".into(), created.clone());
    }
    config.insert("os".into(), json!(os));
    config.insert(
        "config".into(),
        compat.get("config").cloned().unwrap_or_else(|| json!({})),
    );
    config.insert(
        "rootfs".into(),
        json!({ "type": "layers", "diff_ids": diff_ids }),
    );
    let config_bytes = serde_json::to_vec(&serde_json::Value::Object(config))?;
    let config_digest = ImageDigest::from_bytes(&config_bytes);

    let layer_descriptors: Vec<serde_json::Value> = layers
        .iter()
        .map(|(digest, data)| {
            json!({
                "mediaType": media_types::DOCKER_LAYER_TAR_GZIP,
                "size": data.len(),
                "digest": digest.to_string(),
            })
        })
        .collect();
    let manifest_json = json!({
        "schemaVersion": 2,
        "mediaType": media_types::DOCKER_V2_SCHEMA2,
        "config": {
            "mediaType": media_types::DOCKER_CONFIG,
            "size": config_bytes.len(),
            "digest": config_digest.to_string(),
        },
        "layers": layer_descriptors,
    });

    Ok(ConvertedImage {
        manifest: serde_json::to_vec(&manifest_json)?,
        config: config_bytes,
        config_digest,
    })
}

/// The sha256 of a layer's uncompressed content (its diff_id). Layers are
/// normally gzip; plain tar blobs are hashed as-is.
fn uncompressed_sha256(data: &[u8]) -> Result<String> {
    let mut hasher = Sha256::new();
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(data);
        let mut buf = [0u8; 8192];
        loop {
            let n = decoder.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    } else {
        hasher.update(data);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    const DIGEST_A: &str =
        "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const DIGEST_B: &str =
        "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const DIGEST_C: &str =
        "sha256:cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

    fn gzip(content: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    /// Three entries newest-first: a real top layer, a throwaway, the base.
    fn sample_manifest() -> Schema1Manifest {
        serde_json::from_value(json!({
            "schemaVersion": 1,
            "name": "library/app",
            "tag": "v1",
            "architecture": "amd64",
            "fsLayers": [
                { "blobSum": DIGEST_C },
                { "blobSum": DIGEST_B },
                { "blobSum": DIGEST_A }
            ],
            "history": [
                { "v1Compatibility": "{\"architecture\":\"amd64\",\"os\":\"linux\",\"created\":\"2023-01-01T00:00:00Z\",\"config\":{\"Cmd\":[\"/bin/sh\"]}}" },
                { "v1Compatibility": "{\"throwaway\":true}" },
                { "v1Compatibility": "{}" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_kept_layers_bottom_first_without_throwaway() {
        let kept = kept_layer_digests(&sample_manifest()).unwrap();
        let kept: Vec<String> = kept.iter().map(|d| d.to_string()).collect();
        assert_eq!(kept, vec![DIGEST_A, DIGEST_C]);
    }

    #[test]
    fn test_kept_layers_rejects_mismatched_history() {
        let mut manifest = sample_manifest();
        manifest.history.pop();
        assert!(kept_layer_digests(&manifest).is_err());
    }

    #[test]
    fn test_conversion_builds_schema2() {
        let manifest = sample_manifest();
        let base = gzip(b"base layer");
        let top = gzip(b"top layer");
        let layers = vec![
            (DIGEST_A.parse().unwrap(), base.clone()),
            (DIGEST_C.parse().unwrap(), top.clone()),
        ];
        let converted = schema1_to_schema2(&manifest, &layers).unwrap();

        let schema2: serde_json::Value = serde_json::from_slice(&converted.manifest).unwrap();
        assert_eq!(schema2["mediaType"], media_types::DOCKER_V2_SCHEMA2);
        assert_eq!(schema2["config"]["digest"], converted.config_digest.to_string());
        assert_eq!(schema2["layers"][0]["digest"], DIGEST_A);
        assert_eq!(schema2["layers"][0]["size"], base.len() as u64);
        assert_eq!(schema2["layers"][1]["digest"], DIGEST_C);

        let config: serde_json::Value = serde_json::from_slice(&converted.config).unwrap();
        assert_eq!(config["architecture"], "amd64");
        assert_eq!(config["os"], "linux");
        assert_eq!(config["config"]["Cmd"][0], "/bin/sh");
        let diff_ids = config["rootfs"]["diff_ids"].as_array().unwrap();
        assert_eq!(diff_ids.len(), 2);
        assert_eq!(
            diff_ids[0].as_str().unwrap(),
            &format!("sha256:{:x}", Sha256::digest(b"base layer"))
        );
    }

    #[test]
    fn test_uncompressed_sha256_plain_data() {
        // Not gzip: hashed as-is.
        let sum = uncompressed_sha256(b"plain tar bytes").unwrap();
        assert_eq!(sum, format!("{:x}", Sha256::digest(b"plain tar bytes")));
    }
}
