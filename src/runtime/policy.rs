//! Lifecycle hooks for `Astro` resources.

use crate::controller::ReconcilePolicy;
use crate::crd::Astro;
use anyhow::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

/// Records each lifecycle stage; the finalizer itself is managed by the reconciler
#[derive(Debug, Clone, Copy, Default)]
pub struct AstroPolicy;

#[async_trait]
impl ReconcilePolicy<Astro> for AstroPolicy {
    async fn on_create(&self, astro: &Astro) -> Result<()> {
        info!(
            name = %astro.name_any(),
            namespace = astro.namespace().as_deref().unwrap_or(""),
            stars = astro.spec.stars.len(),
            "sync create astro"
        );
        Ok(())
    }

    async fn on_update(&self, astro: &Astro) -> Result<()> {
        info!(
            name = %astro.name_any(),
            namespace = astro.namespace().as_deref().unwrap_or(""),
            stars = astro.spec.stars.len(),
            "sync update astro"
        );
        Ok(())
    }

    async fn on_delete(&self, astro: &Astro) -> Result<()> {
        info!(
            name = %astro.name_any(),
            namespace = astro.namespace().as_deref().unwrap_or(""),
            "sync delete astro"
        );
        Ok(())
    }
}
