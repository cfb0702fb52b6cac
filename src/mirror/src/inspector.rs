//! Scoped manifest inspection.

use stevedore_core::error::Result;

use crate::reference::ImageRef;
use crate::transport::{ImageTransport, SystemContext};

/// A scoped handle for reading one reference's manifest and config.
///
/// Construct one per inspected reference and let it drop at the end of that
/// scope; any connection state it holds is released with it, so inspectors
/// never leak across list entries even on error paths.
pub struct ManifestInspector<'a> {
    transport: &'a dyn ImageTransport,
    reference: ImageRef,
    ctx: SystemContext,
}

impl<'a> ManifestInspector<'a> {
    pub fn new(transport: &'a dyn ImageTransport, reference: ImageRef, ctx: &SystemContext) -> Self {
        Self {
            transport,
            reference,
            ctx: ctx.clone(),
        }
    }

    /// The manifest bytes exactly as served, plus their MIME.
    pub async fn raw(&self) -> Result<(Vec<u8>, String)> {
        self.transport.fetch_manifest(&self.reference, &self.ctx).await
    }

    /// The OCI-form config blob.
    pub async fn config(&self) -> Result<Vec<u8>> {
        self.transport.fetch_config(&self.reference, &self.ctx).await
    }

    pub fn reference(&self) -> &ImageRef {
        &self.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::media_types;
    use crate::reference::ImageReference;
    use crate::transport::testing::MockTransport;

    #[tokio::test]
    async fn test_raw_and_config() {
        let transport = MockTransport::new();
        let reference = ImageRef::Registry(
            ImageReference::parse("registry.example.io/mirror/app:v1").unwrap(),
        );
        transport.put_manifest(&reference, b"{\"schemaVersion\":2}", media_types::OCI_MANIFEST);
        transport.put_config(&reference, b"{\"os\":\"linux\"}");

        let ctx = SystemContext::default();
        let inspector = ManifestInspector::new(&transport, reference.clone(), &ctx);
        let (bytes, mime) = inspector.raw().await.unwrap();
        assert_eq!(bytes, b"{\"schemaVersion\":2}");
        assert_eq!(mime, media_types::OCI_MANIFEST);
        assert_eq!(inspector.config().await.unwrap(), b"{\"os\":\"linux\"}");
        assert_eq!(inspector.reference(), &reference);
    }

    #[tokio::test]
    async fn test_unprogrammed_reference_fails() {
        let transport = MockTransport::new();
        let reference = ImageRef::Registry(ImageReference::parse("nginx").unwrap());
        let ctx = SystemContext::default();
        let inspector = ManifestInspector::new(&transport, reference, &ctx);
        assert!(inspector.raw().await.is_err());
    }
}
