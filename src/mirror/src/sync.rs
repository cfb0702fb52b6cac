//! Batch copying of many images under a bounded worker pool.
//!
//! Each image gets its own source session and destination; sessions run in
//! parallel up to the clamped worker count, with a per-image timeout. An
//! image for which nothing matched the platform filter is a warning, not a
//! failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stevedore_core::config::{clamp_workers, DEFAULT_TIMEOUT_SECS};
use stevedore_core::error::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::destination::Destination;
use crate::platform::FilterSet;
use crate::provenance::Image;
use crate::reference::ImageReference;
use crate::source::{CopyOptions, Source};
use crate::transport::{ImageTransport, SignaturePolicy, SystemContext};

/// Where a batch run sends its images.
#[derive(Debug, Clone)]
pub enum SyncTarget {
    /// A base directory holding one per-variant layout tree per image:
    /// `{base}/{registry}/{repository}/{tag}/{digest}/…`
    OciLayout(PathBuf),
    /// A registry host; repository and tag carry over from the source.
    Registry(String),
}

/// Options shared by every image in one batch run.
#[derive(Clone)]
pub struct SyncOptions {
    pub filter: FilterSet,
    pub policy: SignaturePolicy,
    pub workers: usize,
    pub timeout: Duration,
    pub remove_signatures: bool,
    pub sigstore_private_key: Option<PathBuf>,
    pub sigstore_passphrase: Option<Vec<u8>>,
    pub source_ctx: SystemContext,
    pub dest_ctx: SystemContext,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            filter: FilterSet::default(),
            policy: SignaturePolicy::default(),
            workers: 1,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            remove_signatures: false,
            sigstore_private_key: None,
            sigstore_passphrase: None,
            source_ctx: SystemContext::default(),
            dest_ctx: SystemContext::default(),
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Provenance records of images with at least one copied variant.
    pub images: Vec<Image>,
    /// References for which nothing matched the platform filter.
    pub skipped: Vec<String>,
    /// References that failed; candidates for the failed-image list.
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs many copy sessions in parallel against one target.
pub struct Syncer {
    transport: Arc<dyn ImageTransport>,
    target: SyncTarget,
    options: SyncOptions,
}

enum Outcome {
    Copied(Image),
    Skipped,
    Failed,
}

impl Syncer {
    pub fn new(transport: Arc<dyn ImageTransport>, target: SyncTarget, options: SyncOptions) -> Self {
        Self {
            transport,
            target,
            options,
        }
    }

    /// Copy every reference, bounded by the worker pool.
    pub async fn run(&self, references: &[String]) -> SyncReport {
        let workers = clamp_workers(self.options.workers);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();

        for reference in references {
            let semaphore = semaphore.clone();
            let transport = self.transport.clone();
            let target = self.target.clone();
            let options = self.options.clone();
            let reference = reference.clone();
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (reference, Outcome::Failed),
                };
                let timeout = options.timeout;
                let outcome = match tokio::time::timeout(
                    timeout,
                    sync_one(transport, target, options, &reference),
                )
                .await
                {
                    Ok(Ok(image)) => Outcome::Copied(image),
                    Ok(Err(err)) if err.is_no_available_image() => {
                        tracing::warn!(reference = %reference, "no image matched the platform filter");
                        Outcome::Skipped
                    }
                    Ok(Err(err)) => {
                        tracing::error!(reference = %reference, error = %err, "failed to copy image");
                        Outcome::Failed
                    }
                    Err(_) => {
                        tracing::error!(reference = %reference, ?timeout, "copy timed out");
                        Outcome::Failed
                    }
                };
                (reference, outcome)
            });
        }

        let mut report = SyncReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Outcome::Copied(image))) => report.images.push(image),
                Ok((reference, Outcome::Skipped)) => report.skipped.push(reference),
                Ok((reference, Outcome::Failed)) => report.failed.push(reference),
                Err(err) => tracing::error!(error = %err, "sync worker panicked"),
            }
        }
        tracing::info!(
            copied = report.images.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "sync finished"
        );
        report
    }
}

/// Copy one image end to end and harvest its provenance.
async fn sync_one(
    transport: Arc<dyn ImageTransport>,
    target: SyncTarget,
    options: SyncOptions,
    reference_str: &str,
) -> Result<Image> {
    let reference = ImageReference::parse(reference_str)?;
    let destination = destination_for(&target, &reference, &options.dest_ctx);
    let mut source =
        Source::open(transport.as_ref(), reference, options.source_ctx.clone()).await?;
    let copy_options = CopyOptions {
        sigstore_private_key: options.sigstore_private_key.clone(),
        sigstore_passphrase: options.sigstore_passphrase.clone(),
        remove_signatures: options.remove_signatures,
        destination: &destination,
        filter: options.filter.clone(),
        policy: options.policy,
    };
    source.copy(transport.as_ref(), &copy_options).await?;
    Ok(source.get_copied_image())
}

fn destination_for(
    target: &SyncTarget,
    reference: &ImageReference,
    ctx: &SystemContext,
) -> Destination {
    match target {
        SyncTarget::OciLayout(base) => {
            let dir = base
                .join(&reference.registry)
                .join(&reference.repository)
                .join(reference.tag.as_deref().unwrap_or("latest"));
            Destination::oci_layout(dir, ctx.clone())
        }
        SyncTarget::Registry(host) => {
            let dest_reference = ImageReference {
                registry: host.clone(),
                repository: reference.repository.clone(),
                tag: reference.tag.clone(),
                digest: None,
            };
            Destination::registry(dest_reference, ctx.clone())
        }
    }
}
