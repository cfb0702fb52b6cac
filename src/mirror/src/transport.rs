//! The blob/manifest transport underneath the copy engine.
//!
//! The engine only talks to the [`ImageTransport`] trait; the production
//! implementation here moves manifests and blobs with the
//! `oci-distribution` client and materializes on-disk destinations as OCI
//! image layouts (`oci-layout`, `index.json`, `blobs/…`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::Reference;
use oci_spec::image::ImageIndex;
use stevedore_core::error::{MirrorError, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::digest::ImageDigest;
use crate::manifest::{self, media_types, Schema1Manifest};
use crate::reference::{ImageRef, ImageReference};
use crate::{convert, signing};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Authentication from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`,
    /// falling back to anonymous when either is unset.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();
        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Registry credentials and TLS settings for one side of a copy.
///
/// Cloned defensively before every transport call so retries and sibling
/// copies cannot race through shared state.
#[derive(Debug, Clone)]
pub struct SystemContext {
    pub auth: RegistryAuth,
    pub tls_verify: bool,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self {
            auth: RegistryAuth::anonymous(),
            tls_verify: true,
        }
    }
}

/// The gate on whether to accept the source's signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignaturePolicy {
    /// Accept any source, signed or not.
    #[default]
    InsecureAcceptAnything,
    /// Refuse every source.
    Reject,
}

/// Everything the transport needs for one single-image copy attempt.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: ImageRef,
    pub dest: ImageRef,
    pub source_ctx: SystemContext,
    pub dest_ctx: SystemContext,
    pub policy: SignaturePolicy,
    /// The MIME declared for the source manifest by the caller.
    pub source_mime: String,
    /// Keep the destination manifest byte-identical where the destination
    /// kind allows it.
    pub preserve_digests: bool,
    /// Convert the manifest to this MIME at the destination (schema-1 only).
    pub forced_mime: Option<String>,
    /// Upper bound on concurrent blob downloads for this image.
    pub max_parallel_downloads: usize,
    pub remove_signatures: bool,
    pub sigstore_private_key: Option<PathBuf>,
    pub sigstore_passphrase: Option<Vec<u8>>,
}

/// The lower-level library seam: given two typed references, copy blobs and
/// manifests, and serve manifest/config reads for inspection.
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Copy exactly one image from `request.source` to `request.dest`.
    async fn copy(&self, request: &CopyRequest) -> Result<()>;

    /// Fetch the manifest bytes exactly as served, plus their MIME.
    async fn fetch_manifest(
        &self,
        reference: &ImageRef,
        ctx: &SystemContext,
    ) -> Result<(Vec<u8>, String)>;

    /// Fetch the OCI-form config blob for a single-image reference.
    async fn fetch_config(&self, reference: &ImageRef, ctx: &SystemContext) -> Result<Vec<u8>>;

    /// The default retry predicate for this transport's errors.
    fn should_retry(&self, err: &MirrorError) -> bool {
        err.is_retryable()
    }
}

/// MIMEs offered when negotiating a manifest fetch.
const MANIFEST_MIMES: &[&str] = &[
    media_types::DOCKER_V2_LIST,
    media_types::DOCKER_V2_SCHEMA2,
    media_types::DOCKER_V2_SCHEMA1,
    media_types::DOCKER_V2_SCHEMA1_SIGNED,
    media_types::OCI_INDEX,
    media_types::OCI_MANIFEST,
];

/// One pulled image, ready to be materialized at a destination.
struct ImagePayload {
    manifest: Vec<u8>,
    media_type: String,
    config_media_type: String,
    config: Vec<u8>,
    layers: Vec<(OciDescriptor, Vec<u8>)>,
}

/// Production transport over `oci-distribution` and on-disk OCI layouts.
#[derive(Debug, Default)]
pub struct RegistryTransport;

impl RegistryTransport {
    pub fn new() -> Self {
        Self
    }

    fn client_for(ctx: &SystemContext) -> Client {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            accept_invalid_certificates: !ctx.tls_verify,
            ..Default::default()
        };
        Client::new(config)
    }

    async fn load_single_image(
        &self,
        manifest_bytes: &[u8],
        mime: &str,
        request: &CopyRequest,
    ) -> Result<ImagePayload> {
        let oci_manifest: OciImageManifest = serde_json::from_slice(manifest_bytes)?;

        let config = self
            .pull_blobs(
                &request.source,
                &request.source_ctx,
                vec![oci_manifest.config.clone()],
                1,
            )
            .await?
            .remove(0)
            .1;

        // Foreign layers stay behind their URLs; only registry-hosted
        // blobs travel.
        let descriptors: Vec<OciDescriptor> = oci_manifest
            .layers
            .iter()
            .filter(|l| l.urls.as_ref().map_or(true, |urls| urls.is_empty()))
            .cloned()
            .collect();
        let layers = self
            .pull_blobs(
                &request.source,
                &request.source_ctx,
                descriptors,
                request.max_parallel_downloads,
            )
            .await?;

        Ok(ImagePayload {
            manifest: manifest_bytes.to_vec(),
            media_type: mime.to_string(),
            config_media_type: oci_manifest.config.media_type.clone(),
            config,
            layers,
        })
    }

    async fn convert_schema1(
        &self,
        manifest_bytes: &[u8],
        request: &CopyRequest,
    ) -> Result<ImagePayload> {
        let schema1: Schema1Manifest = serde_json::from_slice(manifest_bytes)?;
        let kept = convert::kept_layer_digests(&schema1)?;

        let mut unique: Vec<ImageDigest> = Vec::new();
        for digest in &kept {
            if !unique.contains(digest) {
                unique.push(digest.clone());
            }
        }
        let descriptors = unique
            .iter()
            .map(|d| blob_descriptor(d, media_types::DOCKER_LAYER_TAR_GZIP, 0))
            .collect();
        let pulled = self
            .pull_blobs(
                &request.source,
                &request.source_ctx,
                descriptors,
                request.max_parallel_downloads,
            )
            .await?;
        let by_digest: HashMap<String, Vec<u8>> = pulled
            .into_iter()
            .map(|(d, data)| (d.digest, data))
            .collect();

        let mut layer_data = Vec::with_capacity(kept.len());
        for digest in &kept {
            let data = by_digest.get(&digest.to_string()).ok_or_else(|| {
                MirrorError::Transport(format!("layer {digest} missing after pull"))
            })?;
            layer_data.push((digest.clone(), data.clone()));
        }

        let converted = convert::schema1_to_schema2(&schema1, &layer_data)?;
        let layers = layer_data
            .into_iter()
            .map(|(digest, data)| {
                let descriptor = blob_descriptor(
                    &digest,
                    media_types::DOCKER_LAYER_TAR_GZIP,
                    data.len() as i64,
                );
                (descriptor, data)
            })
            .collect();

        Ok(ImagePayload {
            manifest: converted.manifest,
            media_type: media_types::DOCKER_V2_SCHEMA2.to_string(),
            config_media_type: media_types::DOCKER_CONFIG.to_string(),
            config: converted.config,
            layers,
        })
    }

    /// Pull blobs, bounded by `limit` concurrent downloads for registry
    /// sources. Results come back in descriptor order.
    async fn pull_blobs(
        &self,
        source: &ImageRef,
        ctx: &SystemContext,
        descriptors: Vec<OciDescriptor>,
        limit: usize,
    ) -> Result<Vec<(OciDescriptor, Vec<u8>)>> {
        match source {
            ImageRef::OciLayout { dir } => descriptors
                .into_iter()
                .map(|d| {
                    let digest: ImageDigest = d.digest.parse()?;
                    let data = read_blob(dir, &digest)?;
                    Ok((d, data))
                })
                .collect(),
            ImageRef::Registry(r) => {
                let reference = oci_reference(r)?;
                let client = Arc::new(Self::client_for(ctx));
                let semaphore = Arc::new(Semaphore::new(limit.max(1)));
                let count = descriptors.len();

                let mut join_set = JoinSet::new();
                for (idx, descriptor) in descriptors.into_iter().enumerate() {
                    let client = client.clone();
                    let semaphore = semaphore.clone();
                    let reference = reference.clone();
                    join_set.spawn(async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| MirrorError::Transport("download pool closed".into()))?;
                        let mut data = Vec::new();
                        client
                            .pull_blob(&reference, &descriptor, &mut data)
                            .await
                            .map_err(|e| {
                                MirrorError::Transport(format!(
                                    "failed to pull blob {}: {e}",
                                    descriptor.digest
                                ))
                            })?;
                        Ok::<_, MirrorError>((idx, descriptor, data))
                    });
                }

                let mut pulled: Vec<Option<(OciDescriptor, Vec<u8>)>> =
                    (0..count).map(|_| None).collect();
                while let Some(joined) = join_set.join_next().await {
                    let (idx, descriptor, data) = joined
                        .map_err(|e| MirrorError::Transport(format!("download task failed: {e}")))??;
                    pulled[idx] = Some((descriptor, data));
                }
                pulled
                    .into_iter()
                    .map(|slot| {
                        slot.ok_or_else(|| MirrorError::Transport("missing blob download".into()))
                    })
                    .collect()
            }
        }
    }

    async fn push_payload(
        &self,
        dest: &ImageReference,
        payload: &ImagePayload,
        request: &CopyRequest,
    ) -> Result<()> {
        let reference = oci_reference(dest)?;
        let client = Self::client_for(&request.dest_ctx);
        let auth = request.dest_ctx.auth.to_oci_auth();

        // The registry path re-serializes the manifest; the engine re-reads
        // the destination afterwards, so the recorded digest is always the
        // digest of the bytes actually stored.
        let oci_manifest: OciImageManifest = serde_json::from_slice(&payload.manifest)?;
        let layers: Vec<ImageLayer> = payload
            .layers
            .iter()
            .map(|(d, data)| ImageLayer::new(data.clone(), d.media_type.clone(), None))
            .collect();
        let config = Config::new(payload.config.clone(), payload.config_media_type.clone(), None);

        client
            .push(&reference, &layers, config, &auth, Some(oci_manifest))
            .await
            .map_err(|e| MirrorError::Transport(format!("failed to push to [{dest}]: {e}")))?;
        Ok(())
    }

    async fn sign_destination(&self, payload: &ImagePayload, request: &CopyRequest) -> Result<()> {
        let dest = match &request.dest {
            ImageRef::Registry(r) => r,
            ImageRef::OciLayout { .. } => {
                return Err(MirrorError::SignFailed(
                    "sigstore signatures cannot be attached to an OCI layout destination".into(),
                ));
            }
        };
        let key = match &request.sigstore_private_key {
            Some(key) => key.as_path(),
            None => return Ok(()),
        };

        // Digest of the manifest as stored by push_payload.
        let oci_manifest: OciImageManifest = serde_json::from_slice(&payload.manifest)?;
        let stored = serde_json::to_vec(&oci_manifest)?;
        let digest = ImageDigest::from_bytes(&stored);

        let passphrase = request.sigstore_passphrase.as_deref().unwrap_or(b"");
        let artifact = signing::sign_manifest(key, passphrase, dest, &digest)?;

        let reference = oci_reference(&artifact.reference)?;
        let client = Self::client_for(&request.dest_ctx);
        let auth = request.dest_ctx.auth.to_oci_auth();

        let mut annotations = HashMap::new();
        annotations.insert(
            signing::SIGNATURE_ANNOTATION.to_string(),
            artifact.base64_signature.clone(),
        );
        let layer = ImageLayer::new(
            artifact.payload.clone(),
            signing::SIMPLE_SIGNING_MIME.to_string(),
            Some(annotations),
        );
        let config = Config::new(b"{}".to_vec(), media_types::OCI_CONFIG.to_string(), None);
        client
            .push(&reference, &[layer], config, &auth, None)
            .await
            .map_err(|e| MirrorError::SignFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ImageTransport for RegistryTransport {
    async fn copy(&self, request: &CopyRequest) -> Result<()> {
        if request.policy == SignaturePolicy::Reject {
            return Err(MirrorError::PolicyRejected(request.source.to_string()));
        }

        let (manifest_bytes, mime) = self
            .fetch_manifest(&request.source, &request.source_ctx)
            .await?;
        if mime == media_types::DOCKER_V2_LIST || mime == media_types::OCI_INDEX {
            return Err(MirrorError::ManifestUnsupported {
                reference: request.source.to_string(),
                mime,
            });
        }

        // Schema-1 sources are converted; the conversion drops the JWS
        // signature block, which also satisfies remove_signatures.
        let payload = if mime == media_types::DOCKER_V2_SCHEMA1
            || mime == media_types::DOCKER_V2_SCHEMA1_SIGNED
        {
            self.convert_schema1(&manifest_bytes, request).await?
        } else {
            self.load_single_image(&manifest_bytes, &mime, request).await?
        };

        match &request.dest {
            ImageRef::OciLayout { dir } => write_layout(dir, &payload)?,
            ImageRef::Registry(r) => self.push_payload(r, &payload, request).await?,
        }

        if request.sigstore_private_key.is_some() {
            self.sign_destination(&payload, request).await?;
        }
        Ok(())
    }

    async fn fetch_manifest(
        &self,
        reference: &ImageRef,
        ctx: &SystemContext,
    ) -> Result<(Vec<u8>, String)> {
        match reference {
            ImageRef::Registry(r) => {
                let oci_ref = oci_reference(r)?;
                let client = Self::client_for(ctx);
                let auth = ctx.auth.to_oci_auth();
                let (bytes, _digest) = client
                    .pull_manifest_raw(&oci_ref, &auth, MANIFEST_MIMES)
                    .await
                    .map_err(|e| MirrorError::Transport(format!(
                        "failed to fetch manifest of [{r}]: {e}"
                    )))?;
                let mime = manifest::guess_media_type(&bytes).ok_or_else(|| {
                    MirrorError::InspectFailed {
                        reference: reference.to_string(),
                        message: "unable to determine manifest media type".into(),
                    }
                })?;
                Ok((bytes, mime))
            }
            ImageRef::OciLayout { dir } => {
                let index_data = std::fs::read(dir.join("index.json"))?;
                let index: ImageIndex = serde_json::from_slice(&index_data)?;
                let descriptor =
                    index
                        .manifests()
                        .first()
                        .ok_or_else(|| MirrorError::InspectFailed {
                            reference: reference.to_string(),
                            message: "layout index has no manifests".into(),
                        })?;
                let digest: ImageDigest = descriptor.digest().to_string().parse()?;
                let bytes = read_blob(dir, &digest)?;
                Ok((bytes, descriptor.media_type().to_string()))
            }
        }
    }

    async fn fetch_config(&self, reference: &ImageRef, ctx: &SystemContext) -> Result<Vec<u8>> {
        let (bytes, mime) = self.fetch_manifest(reference, ctx).await?;
        let digest = manifest::config_digest(&reference.to_string(), &bytes, &mime)?;
        match reference {
            ImageRef::OciLayout { dir } => read_blob(dir, &digest),
            ImageRef::Registry(_) => {
                let descriptor = blob_descriptor(&digest, media_types::OCI_CONFIG, 0);
                Ok(self
                    .pull_blobs(reference, ctx, vec![descriptor], 1)
                    .await?
                    .remove(0)
                    .1)
            }
        }
    }
}

fn oci_reference(reference: &ImageReference) -> Result<Reference> {
    reference
        .full_reference()
        .parse::<Reference>()
        .map_err(|e| MirrorError::BadReference(format!("{reference}: {e}")))
}

fn blob_descriptor(digest: &ImageDigest, media_type: &str, size: i64) -> OciDescriptor {
    OciDescriptor {
        media_type: media_type.to_string(),
        digest: digest.to_string(),
        size,
        ..Default::default()
    }
}

fn blob_path(dir: &Path, digest: &ImageDigest) -> PathBuf {
    dir.join("blobs").join(digest.algorithm()).join(digest.encoded())
}

fn read_blob(dir: &Path, digest: &ImageDigest) -> Result<Vec<u8>> {
    Ok(std::fs::read(blob_path(dir, digest))?)
}

fn write_blob(dir: &Path, digest: &ImageDigest, data: &[u8]) -> Result<()> {
    let path = blob_path(dir, digest);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

/// Materialize one image as an OCI layout directory, manifest bytes
/// preserved exactly as pulled.
fn write_layout(dir: &Path, payload: &ImagePayload) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    for (descriptor, data) in &payload.layers {
        let digest: ImageDigest = descriptor.digest.parse()?;
        write_blob(dir, &digest, data)?;
    }

    let config_digest = ImageDigest::from_bytes(&payload.config);
    write_blob(dir, &config_digest, &payload.config)?;

    let manifest_digest = ImageDigest::from_bytes(&payload.manifest);
    write_blob(dir, &manifest_digest, &payload.manifest)?;

    std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#)?;

    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": payload.media_type,
            "digest": manifest_digest.to_string(),
            "size": payload.manifest.len(),
        }]
    });
    std::fs::write(dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
    Ok(())
}
