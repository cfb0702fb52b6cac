//! Stevedore mirror - the per-image copy engine.
//!
//! Copies container images between registries and on-disk OCI layouts,
//! dispatching on the source manifest MIME: single images in the two
//! historical Docker schemas or the OCI format, and lists/indexes whose
//! entries are filtered by platform and copied individually. Every
//! successfully copied variant is recorded as a provenance spec.

pub mod convert;
pub mod copier;
pub mod destination;
pub mod digest;
pub mod inspector;
pub mod manifest;
pub mod platform;
pub mod provenance;
pub mod reference;
pub mod signing;
pub mod source;
pub mod sync;
pub mod transport;

pub use copier::{copy_image, SingleCopyOptions, MAX_PARALLEL_DOWNLOADS, MAX_RETRY};
pub use destination::{Destination, DestinationKind};
pub use digest::ImageDigest;
pub use inspector::ManifestInspector;
pub use manifest::{media_types, SourceManifest};
pub use platform::{FilterSet, Platform};
pub use provenance::{Image, ImageSpec};
pub use reference::{ImageRef, ImageReference};
pub use source::{CopyOptions, Source};
pub use sync::{SyncOptions, SyncReport, SyncTarget, Syncer};
pub use transport::{
    CopyRequest, ImageTransport, RegistryAuth, RegistryTransport, SignaturePolicy, SystemContext,
};

/// Stevedore mirror engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
