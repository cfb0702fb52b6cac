//! Single-image copy under retry.

use std::path::PathBuf;
use std::time::Duration;

use stevedore_core::error::{MirrorError, Result};

use crate::manifest::media_types;
use crate::reference::ImageRef;
use crate::transport::{CopyRequest, ImageTransport, SignaturePolicy, SystemContext};

/// Upper bound on concurrent blob downloads per image.
pub const MAX_PARALLEL_DOWNLOADS: usize = 3;

/// Retries after the initial attempt.
pub const MAX_RETRY: u32 = 3;

/// Delay between attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Options for copying exactly one single-image manifest.
#[derive(Debug, Clone)]
pub struct SingleCopyOptions {
    pub source_ref: ImageRef,
    pub dest_ref: ImageRef,
    pub source_ctx: SystemContext,
    pub dest_ctx: SystemContext,
    pub policy: SignaturePolicy,
    /// The MIME declared for the source manifest.
    pub source_mime: String,
    pub sigstore_private_key: Option<PathBuf>,
    pub sigstore_passphrase: Option<Vec<u8>>,
    pub remove_signatures: bool,
}

/// Copy one image from source to destination under the retry loop.
///
/// List MIMEs are refused: this path handles single images only. Schema-1
/// sources disable digest preservation and force a schema-2 destination
/// manifest, since schema-1 digests cannot survive the conversion.
pub async fn copy_image(
    transport: &dyn ImageTransport,
    options: &SingleCopyOptions,
) -> Result<()> {
    let mut request = CopyRequest {
        source: options.source_ref.clone(),
        dest: options.dest_ref.clone(),
        source_ctx: options.source_ctx.clone(),
        dest_ctx: options.dest_ctx.clone(),
        policy: options.policy,
        source_mime: options.source_mime.clone(),
        preserve_digests: true,
        forced_mime: None,
        max_parallel_downloads: MAX_PARALLEL_DOWNLOADS,
        remove_signatures: options.remove_signatures,
        sigstore_private_key: options.sigstore_private_key.clone(),
        sigstore_passphrase: options.sigstore_passphrase.clone(),
    };
    match options.source_mime.as_str() {
        media_types::DOCKER_V2_SCHEMA1 | media_types::DOCKER_V2_SCHEMA1_SIGNED => {
            request.preserve_digests = false;
            request.forced_mime = Some(media_types::DOCKER_V2_SCHEMA2.to_string());
        }
        media_types::DOCKER_V2_LIST | media_types::OCI_INDEX => {
            return Err(MirrorError::ManifestUnsupported {
                reference: options.source_ref.to_string(),
                mime: options.source_mime.clone(),
            });
        }
        _ => {}
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        // Fresh context clones per attempt: the transport may retain or
        // mutate what it is handed, and retries must not observe that.
        let attempt_request = CopyRequest {
            source_ctx: options.source_ctx.clone(),
            dest_ctx: options.dest_ctx.clone(),
            ..request.clone()
        };
        match transport.copy(&attempt_request).await {
            Ok(()) => return Ok(()),
            Err(err) if !transport.should_retry(&err) => return Err(err),
            Err(err) if attempt > MAX_RETRY => {
                return Err(MirrorError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "copy attempt failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}
