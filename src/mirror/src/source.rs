//! The source session and the per-MIME copy dispatcher.
//!
//! A [`Source`] represents one opened source image: its parsed top-level
//! manifest, reference components and credentials, plus the accumulators
//! that become the provenance record. `Source::copy` drives the right copy
//! flow for the manifest's MIME and records every successfully copied
//! variant.

use std::collections::BTreeSet;
use std::path::PathBuf;

use oci_spec::image::ImageConfiguration;
use stevedore_core::error::{MirrorError, Result};

use crate::copier::{copy_image, SingleCopyOptions};
use crate::destination::{Destination, DestinationKind};
use crate::digest::ImageDigest;
use crate::inspector::ManifestInspector;
use crate::manifest::{media_types, ManifestDescriptor, Schema1Manifest, Schema2Manifest, SourceManifest};
use crate::platform::{FilterSet, Platform};
use crate::provenance::{update_spec_from_oci_manifest, update_spec_from_schema2, Image, ImageSpec};
use crate::reference::{ImageRef, ImageReference};
use crate::transport::{ImageTransport, SignaturePolicy, SystemContext};

/// Options for one session copy. Shared read-only with the caller for the
/// duration of the call.
pub struct CopyOptions<'a> {
    pub sigstore_private_key: Option<PathBuf>,
    pub sigstore_passphrase: Option<Vec<u8>>,
    pub remove_signatures: bool,
    pub destination: &'a Destination,
    pub filter: FilterSet,
    pub policy: SignaturePolicy,
}

/// Platform summary for schema-1 sources, which carry no OCI config blob.
#[derive(Debug, Clone, Default)]
pub struct Schema1Summary {
    pub architecture: String,
    pub os: String,
    pub variant: String,
}

impl Schema1Summary {
    /// Derive the summary from the manifest's architecture field and the
    /// newest history entry's legacy config.
    pub fn from_manifest(manifest: &Schema1Manifest) -> Self {
        let compat: serde_json::Value = manifest
            .history
            .first()
            .and_then(|h| serde_json::from_str(&h.v1_compatibility).ok())
            .unwrap_or(serde_json::Value::Null);
        Self {
            architecture: manifest.architecture.clone(),
            os: compat
                .get("os")
                .and_then(|v| v.as_str())
                .unwrap_or("linux")
                .to_string(),
            variant: compat
                .get("variant")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// An opened source image and its copy session state.
pub struct Source {
    mime: String,
    manifest: SourceManifest,
    /// Pre-parsed OCI-form config, present for single-image schema-2/OCI
    /// sources.
    oci_config: Option<ImageConfiguration>,
    /// Platform summary, present for schema-1 sources.
    schema1_summary: Option<Schema1Summary>,
    /// Pre-computed source manifest digest, present for single images.
    manifest_digest: Option<ImageDigest>,
    reference: ImageReference,
    system_context: SystemContext,
    copied: Vec<ImageSpec>,
    copied_arch: BTreeSet<String>,
    copied_os: BTreeSet<String>,
}

impl Source {
    /// Assemble a session from pre-parsed parts. This is the ingestion
    /// layer's entry point; [`Source::open`] is the convenience that fetches
    /// and parses everything itself.
    pub fn from_parts(
        reference: ImageReference,
        system_context: SystemContext,
        mime: impl Into<String>,
        manifest: SourceManifest,
    ) -> Self {
        Self {
            mime: mime.into(),
            manifest,
            oci_config: None,
            schema1_summary: None,
            manifest_digest: None,
            reference,
            system_context,
            copied: Vec::new(),
            copied_arch: BTreeSet::new(),
            copied_os: BTreeSet::new(),
        }
    }

    pub fn with_manifest_digest(mut self, digest: ImageDigest) -> Self {
        self.manifest_digest = Some(digest);
        self
    }

    pub fn with_oci_config(mut self, config: ImageConfiguration) -> Self {
        self.oci_config = Some(config);
        self
    }

    pub fn with_schema1_summary(mut self, summary: Schema1Summary) -> Self {
        self.schema1_summary = Some(summary);
        self
    }

    /// Open a source image: fetch and parse its manifest, and for
    /// single-image sources the config blob and manifest digest.
    pub async fn open(
        transport: &dyn ImageTransport,
        reference: ImageReference,
        system_context: SystemContext,
    ) -> Result<Self> {
        let source_ref = ImageRef::Registry(reference.clone());
        let inspector = ManifestInspector::new(transport, source_ref, &system_context);
        let (bytes, mime) = inspector.raw().await?;
        let manifest = SourceManifest::parse(&mime, &bytes)?;

        let mut source = Self::from_parts(reference, system_context, mime, manifest);
        match &source.manifest {
            SourceManifest::DockerSchema2(_) | SourceManifest::OciManifest(_) => {
                source.manifest_digest = Some(ImageDigest::from_bytes(&bytes));
                let config_bytes = inspector.config().await?;
                source.oci_config = Some(serde_json::from_slice(&config_bytes)?);
            }
            SourceManifest::DockerSchema1 { manifest, .. } => {
                source.manifest_digest = Some(ImageDigest::from_bytes(&bytes));
                source.schema1_summary = Some(Schema1Summary::from_manifest(manifest));
            }
            _ => {}
        }
        Ok(source)
    }

    /// The source's full reference string.
    pub fn reference_name(&self) -> String {
        self.reference.full_reference()
    }

    /// The manifest MIME this session was opened with.
    pub fn media_type(&self) -> &str {
        &self.mime
    }

    /// Copy this source to the destination, dispatching on the manifest
    /// MIME. List sources have their entries filtered, copied and recorded
    /// individually; per-entry errors accumulate into one composite error.
    pub async fn copy(
        &mut self,
        transport: &dyn ImageTransport,
        options: &CopyOptions<'_>,
    ) -> Result<()> {
        let manifest = self.manifest.clone();
        match manifest {
            SourceManifest::DockerList(_) | SourceManifest::OciIndex(_) => {
                let copied = self.copy_list(transport, &manifest, options).await?;
                tracing::debug!(copied, "copied images from list");
                if copied == 0 {
                    return Err(MirrorError::NoAvailableImage);
                }
                Ok(())
            }
            SourceManifest::DockerSchema2(m) => self.copy_schema2(transport, &m, options).await,
            SourceManifest::DockerSchema1 { .. } => self.copy_schema1(transport, options).await,
            SourceManifest::OciManifest(m) => self.copy_oci_manifest(transport, &m, options).await,
            SourceManifest::Unrecognized { mime } => Err(MirrorError::UnsupportedMime {
                reference: self.reference_name(),
                mime,
            }),
        }
    }

    /// The final provenance record for this session.
    pub fn get_copied_image(&self) -> Image {
        Image {
            source: format!("{}/{}", self.reference.registry, self.reference.repository),
            tag: self.reference.tag.clone().unwrap_or_default(),
            arch_list: self.copied_arch.iter().cloned().collect(),
            os_list: self.copied_os.iter().cloned().collect(),
            images: self.copied.clone(),
        }
    }

    /// The shared list flow for docker v2 lists and OCI indexes.
    async fn copy_list(
        &mut self,
        transport: &dyn ImageTransport,
        manifest: &SourceManifest,
        options: &CopyOptions<'_>,
    ) -> Result<usize> {
        let entries = manifest.list_entries()?;
        let mut copied_num = 0usize;
        let mut errors: Vec<MirrorError> = Vec::new();

        for entry in &entries {
            let platform = &entry.platform;
            if !options
                .filter
                .allow(&platform.architecture, &platform.os, &platform.variant)
            {
                continue;
            }
            // Signing re-uploads the object, so it bypasses the fast path.
            if options.sigstore_private_key.is_none()
                && options.destination.have_digest(&entry.digest)
            {
                tracing::debug!(digest = %entry.digest, "dest already have digest, skip copy");
                copied_num += 1;
                continue;
            }
            match self.copy_list_entry(transport, entry, options).await {
                Ok(spec) => {
                    self.record_copied_image(spec);
                    copied_num += 1;
                }
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(MirrorError::CopyListFailed {
                source_ref: self.reference_name(),
                dest_ref: options.destination.reference_name(),
                copied: copied_num,
                errors,
            });
        }
        Ok(copied_num)
    }

    /// One list entry: resolve, copy, re-inspect the destination, backfill
    /// platform fields from the config when the entry is incomplete, and
    /// build the spec from the final destination manifest.
    async fn copy_list_entry(
        &self,
        transport: &dyn ImageTransport,
        entry: &ManifestDescriptor,
        options: &CopyOptions<'_>,
    ) -> Result<ImageSpec> {
        let mut platform = entry.platform.clone();
        let source_ref = self.reference_by_digest(&entry.digest)?;
        let dest_ref = options.destination.reference_multi_arch(
            &platform.os,
            &platform.os_version,
            &platform.architecture,
            &platform.variant,
            entry.digest.encoded(),
        )?;

        copy_image(
            transport,
            &SingleCopyOptions {
                source_ref,
                dest_ref: dest_ref.clone(),
                source_ctx: self.system_context.clone(),
                dest_ctx: options.destination.system_context().clone(),
                policy: options.policy,
                source_mime: entry.media_type.clone(),
                sigstore_private_key: options.sigstore_private_key.clone(),
                sigstore_passphrase: options.sigstore_passphrase.clone(),
                remove_signatures: options.remove_signatures,
            },
        )
        .await?;

        // One inspector per entry; it is released with this scope.
        let inspector =
            ManifestInspector::new(transport, dest_ref, options.destination.system_context());
        let (bytes, image_mime) = inspector.raw().await?;

        if need_inspect_config(
            &platform.os,
            &platform.architecture,
            &platform.variant,
            &platform.os_version,
            &platform.os_features,
        ) {
            let config_bytes = inspector.config().await?;
            let config: ImageConfiguration = serde_json::from_slice(&config_bytes)?;
            if platform.os_version.is_empty() {
                platform.os_version = config.os_version().clone().unwrap_or_default();
            }
            if platform.os_features.is_empty() {
                platform.os_features = config.os_features().clone().unwrap_or_default();
            }
            if platform.variant.is_empty() {
                platform.variant = config.variant().clone().unwrap_or_default();
            }
        }

        // The digest recomputed from the stored bytes is authoritative.
        let manifest_digest = ImageDigest::from_bytes(&bytes);
        let mut spec = ImageSpec {
            arch: platform.architecture,
            os: platform.os,
            os_version: platform.os_version,
            os_features: platform.os_features,
            variant: platform.variant,
            media_type: entry.media_type.clone(),
            layers: Vec::new(),
            config: None,
            digest: manifest_digest,
        };
        match image_mime.as_str() {
            media_types::DOCKER_V2_SCHEMA2 => {
                let schema2: Schema2Manifest = serde_json::from_slice(&bytes)?;
                update_spec_from_schema2(&mut spec, &schema2);
            }
            media_types::OCI_MANIFEST => {
                let oci: oci_spec::image::ImageManifest = serde_json::from_slice(&bytes)?;
                update_spec_from_oci_manifest(&mut spec, &oci)?;
            }
            other => {
                // Schema-1 inside a list is effectively extinct; reject it
                // rather than recording an unrepresentable spec.
                return Err(MirrorError::ManifestUnsupported {
                    reference: inspector.reference().to_string(),
                    mime: other.to_string(),
                });
            }
        }
        Ok(spec)
    }

    /// Single-image docker schema-2 flow. The digest is stable across the
    /// copy, so the spec comes from the already-parsed manifest.
    async fn copy_schema2(
        &mut self,
        transport: &dyn ImageTransport,
        manifest: &Schema2Manifest,
        options: &CopyOptions<'_>,
    ) -> Result<()> {
        let (platform, digest) = self.single_image_identity()?;
        if !options
            .filter
            .allow(&platform.architecture, &platform.os, &platform.variant)
        {
            return Err(MirrorError::NoAvailableImage);
        }
        if options.sigstore_private_key.is_none() && options.destination.have_digest(&digest) {
            tracing::debug!(digest = %digest, "dest already have digest, skip copy");
            return Ok(());
        }

        self.copy_single(transport, &platform, digest.encoded(), options)
            .await?;

        let mut spec = self.spec_for_platform(&platform, digest);
        update_spec_from_schema2(&mut spec, manifest);
        self.record_copied_image(spec);
        Ok(())
    }

    /// Single-image OCI manifest flow; digest-stable like schema-2.
    async fn copy_oci_manifest(
        &mut self,
        transport: &dyn ImageTransport,
        manifest: &oci_spec::image::ImageManifest,
        options: &CopyOptions<'_>,
    ) -> Result<()> {
        let (platform, digest) = self.single_image_identity()?;
        if !options
            .filter
            .allow(&platform.architecture, &platform.os, &platform.variant)
        {
            return Err(MirrorError::NoAvailableImage);
        }
        if options.sigstore_private_key.is_none() && options.destination.have_digest(&digest) {
            tracing::debug!(digest = %digest, "dest already have digest, skip copy");
            return Ok(());
        }

        self.copy_single(transport, &platform, digest.encoded(), options)
            .await?;

        let mut spec = self.spec_for_platform(&platform, digest);
        update_spec_from_oci_manifest(&mut spec, manifest)?;
        self.record_copied_image(spec);
        Ok(())
    }

    /// Single-image schema-1 flow: the copy converts to schema-2, which
    /// changes the digest, so the variant is staged under the literal
    /// "UNKNOW" placeholder and renamed once the real digest is known.
    async fn copy_schema1(
        &mut self,
        transport: &dyn ImageTransport,
        options: &CopyOptions<'_>,
    ) -> Result<()> {
        let summary = self
            .schema1_summary
            .clone()
            .ok_or_else(|| MirrorError::InspectFailed {
                reference: self.reference_name(),
                message: "schema1 source has no platform summary".into(),
            })?;
        let os_version = String::new();
        if !options
            .filter
            .allow(&summary.architecture, &summary.os, &summary.variant)
        {
            return Err(MirrorError::NoAvailableImage);
        }
        // No fast path: the destination cannot be queried for a schema-1
        // digest that will not survive the copy.

        let platform = Platform {
            architecture: summary.architecture.clone(),
            os: summary.os.clone(),
            os_version,
            os_features: Vec::new(),
            variant: summary.variant.clone(),
        };
        let dest_ref = self
            .copy_single(transport, &platform, "UNKNOW", options)
            .await?;

        // Re-inspect: the conversion changed the manifest and its digest.
        let inspector =
            ManifestInspector::new(transport, dest_ref, options.destination.system_context());
        let (bytes, mime) = inspector.raw().await?;
        let manifest_digest = ImageDigest::from_bytes(&bytes);
        let schema2: Schema2Manifest = serde_json::from_slice(&bytes)?;

        let mut spec = ImageSpec {
            arch: platform.architecture,
            os: platform.os,
            os_version: platform.os_version,
            os_features: Vec::new(),
            variant: platform.variant,
            media_type: mime,
            layers: Vec::new(),
            config: None,
            digest: manifest_digest.clone(),
        };
        update_spec_from_schema2(&mut spec, &schema2);

        if options.destination.kind() == DestinationKind::OciLayout {
            if let Some(base) = options.destination.directory() {
                let from = base.join("UNKNOW");
                let to = base.join(manifest_digest.encoded());
                std::fs::rename(&from, &to).map_err(|source| MirrorError::RenameFailed {
                    from: from.clone(),
                    to: to.clone(),
                    source,
                })?;
            }
        }
        self.record_copied_image(spec);
        Ok(())
    }

    /// Resolve refs and invoke the single-image copier for one variant;
    /// returns the destination reference used.
    async fn copy_single(
        &self,
        transport: &dyn ImageTransport,
        platform: &Platform,
        digest_encoded: &str,
        options: &CopyOptions<'_>,
    ) -> Result<ImageRef> {
        let source_ref = ImageRef::Registry(self.reference.clone());
        let dest_ref = options.destination.reference_multi_arch(
            &platform.os,
            &platform.os_version,
            &platform.architecture,
            &platform.variant,
            digest_encoded,
        )?;
        copy_image(
            transport,
            &SingleCopyOptions {
                source_ref,
                dest_ref: dest_ref.clone(),
                source_ctx: self.system_context.clone(),
                dest_ctx: options.destination.system_context().clone(),
                policy: options.policy,
                source_mime: self.mime.clone(),
                sigstore_private_key: options.sigstore_private_key.clone(),
                sigstore_passphrase: options.sigstore_passphrase.clone(),
                remove_signatures: options.remove_signatures,
            },
        )
        .await?;
        Ok(dest_ref)
    }

    /// The platform tuple and pre-computed digest of a single-image source.
    fn single_image_identity(&self) -> Result<(Platform, ImageDigest)> {
        let config = self.oci_config.as_ref().ok_or_else(|| MirrorError::InspectFailed {
            reference: self.reference_name(),
            message: "single-image source has no parsed config".into(),
        })?;
        let digest = self
            .manifest_digest
            .clone()
            .ok_or_else(|| MirrorError::InspectFailed {
                reference: self.reference_name(),
                message: "single-image source has no manifest digest".into(),
            })?;
        Ok((platform_from_config(config), digest))
    }

    fn spec_for_platform(&self, platform: &Platform, digest: ImageDigest) -> ImageSpec {
        ImageSpec {
            arch: platform.architecture.clone(),
            os: platform.os.clone(),
            os_version: platform.os_version.clone(),
            os_features: platform.os_features.clone(),
            variant: platform.variant.clone(),
            media_type: self.mime.clone(),
            layers: Vec::new(),
            config: None,
            digest,
        }
    }

    /// Build the by-digest source reference for one list entry.
    fn reference_by_digest(&self, digest: &ImageDigest) -> Result<ImageRef> {
        let formatted = self.reference.with_digest(digest).full_reference();
        let reference = ImageReference::parse(&formatted)?;
        Ok(ImageRef::Registry(reference))
    }

    fn record_copied_image(&mut self, spec: ImageSpec) {
        self.copied_arch.insert(spec.arch.clone());
        self.copied_os.insert(spec.os.clone());
        self.copied.push(spec);
    }
}

fn platform_from_config(config: &ImageConfiguration) -> Platform {
    Platform {
        architecture: config.architecture().to_string(),
        os: config.os().to_string(),
        os_version: config.os_version().clone().unwrap_or_default(),
        os_features: config.os_features().clone().unwrap_or_default(),
        variant: config.variant().clone().unwrap_or_default(),
    }
}

/// Whether a list entry's platform needs backfilling from the image config:
/// windows entries missing their version or feature list, and linux/arm
/// entries missing their variant.
fn need_inspect_config(
    os: &str,
    arch: &str,
    variant: &str,
    os_version: &str,
    os_features: &[String],
) -> bool {
    match os {
        "windows" => os_version.is_empty() || os_features.is_empty(),
        "linux" if arch == "arm" => variant.is_empty(),
        _ => false,
    }
}
