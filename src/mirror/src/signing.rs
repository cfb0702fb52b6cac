//! Cosign-style sigstore signing of destination manifests.
//!
//! A signature is a SimpleSigning payload over the pushed manifest digest,
//! signed with the configured private key and attached as an object under
//! the `{algorithm}-{encoded}.sig` tag in the destination repository.

use std::path::Path;

use base64::{prelude::BASE64_STANDARD, Engine};
use sigstore::crypto::signing_key::ecdsa::ECDSAKeys;
use stevedore_core::error::{MirrorError, Result};

use crate::digest::ImageDigest;
use crate::reference::ImageReference;

/// Media type cosign uses for the signature payload layer.
pub const SIMPLE_SIGNING_MIME: &str = "application/vnd.dev.cosign.simplesigning.v1+json";

/// Layer annotation key carrying the base64 signature.
pub const SIGNATURE_ANNOTATION: &str = "dev.cosignproject.cosign/signature";

/// A ready-to-push signature object.
#[derive(Debug)]
pub struct SignatureArtifact {
    /// Where the signature object lives: the `.sig` tag next to the image.
    pub reference: ImageReference,
    /// The SimpleSigning payload bytes (the signature layer's content).
    pub payload: Vec<u8>,
    /// Base64 signature over the payload.
    pub base64_signature: String,
}

/// The `.sig` tag reference for a manifest digest:
/// the digest with `:` replaced by `-`, suffixed with `.sig`.
pub fn signature_reference(image: &ImageReference, digest: &ImageDigest) -> ImageReference {
    ImageReference {
        registry: image.registry.clone(),
        repository: image.repository.clone(),
        tag: Some(format!("{}-{}.sig", digest.algorithm(), digest.encoded())),
        digest: None,
    }
}

/// The SimpleSigning payload for a manifest digest.
pub fn simple_signing_payload(image: &ImageReference, digest: &ImageDigest) -> Result<Vec<u8>> {
    let payload = serde_json::json!({
        "critical": {
            "identity": {
                "docker-reference": format!("{}/{}", image.registry, image.repository),
            },
            "image": {
                "docker-manifest-digest": digest.to_string(),
            },
            "type": "cosign container image signature",
        },
        "optional": null,
    });
    Ok(serde_json::to_vec(&payload)?)
}

/// Sign a pushed manifest digest with a passphrase-protected sigstore
/// private key.
pub fn sign_manifest(
    key_path: &Path,
    passphrase: &[u8],
    image: &ImageReference,
    digest: &ImageDigest,
) -> Result<SignatureArtifact> {
    let pem = std::fs::read(key_path).map_err(|e| {
        MirrorError::SignFailed(format!("failed to read key {}: {e}", key_path.display()))
    })?;
    let keys = ECDSAKeys::from_encrypted_pem(&pem, passphrase)
        .map_err(|e| MirrorError::SignFailed(format!("failed to decrypt key: {e}")))?;
    let signer = keys
        .to_sigstore_signer()
        .map_err(|e| MirrorError::SignFailed(e.to_string()))?;

    let payload = simple_signing_payload(image, digest)?;
    let signature = signer
        .sign(&payload)
        .map_err(|e| MirrorError::SignFailed(e.to_string()))?;

    Ok(SignatureArtifact {
        reference: signature_reference(image, digest),
        payload,
        base64_signature: BASE64_STANDARD.encode(signature),
    })
}
