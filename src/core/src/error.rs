use std::path::PathBuf;

use thiserror::Error;

/// Stevedore error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Top-level manifest MIME type is not one of the recognized values
    #[error("unsupported MIME type {mime:?} of image [{reference}]")]
    UnsupportedMime { reference: String, mime: String },

    /// Nothing matched the platform filter and no per-entry error occurred
    #[error("no available image matched the platform filter")]
    NoAvailableImage,

    /// Reference construction or parsing failed
    #[error("invalid image reference: {0}")]
    BadReference(String),

    /// Signature policy rejected the source image
    #[error("signature policy rejected source [{0}]")]
    PolicyRejected(String),

    /// Remote I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A destination manifest came back in a MIME we cannot record
    #[error("unsupported manifest MIME {mime:?} from destination [{reference}]")]
    ManifestUnsupported { reference: String, mime: String },

    /// Sigstore signing of the destination manifest failed
    #[error("sigstore signing failed: {0}")]
    SignFailed(String),

    /// Post-copy directory rename failed (schema-1 fixup)
    #[error("failed to rename [{}] to [{}]: {source}", .from.display(), .to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest or config inspection failed
    #[error("manifest inspect failed for [{reference}]: {message}")]
    InspectFailed { reference: String, message: String },

    /// The whole-copy retry loop gave up
    #[error("copy failed after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<MirrorError>,
    },

    /// One or more list entries failed; the rest of the list was still processed
    #[error(
        "error occurred when copying image [{source_ref}] => [{dest_ref}]: \
         copied [{copied}] image(s): {}",
        join_errors(.errors)
    )]
    CopyListFailed {
        source_ref: String,
        dest_ref: String,
        copied: usize,
        errors: Vec<MirrorError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MirrorError {
    /// Default retry classification: only remote I/O failures are worth
    /// re-attempting; policy, reference and manifest errors are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MirrorError::Transport(_) | MirrorError::Io(_))
    }

    /// Whether this error is the "nothing to do" sentinel, which batch
    /// drivers treat as a warning rather than a failure.
    pub fn is_no_available_image(&self) -> bool {
        matches!(self, MirrorError::NoAvailableImage)
    }
}

fn join_errors(errors: &[MirrorError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for stevedore operations
pub type Result<T> = std::result::Result<T, MirrorError>;
