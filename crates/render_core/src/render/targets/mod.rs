//! Pooled render targets
//!
//! - **pool**: the generic bounded cache
//! - **description**: value-equal keys for each kind of target
//! - **buffers**: framebuffer-backed targets and the listener that builds them

pub mod buffers;
pub mod description;
pub mod pool;

pub use buffers::{FramebufferTargetListener, RenderTarget};
pub use description::{
    AmbientOcclusionBufferDescription, Area, AttachmentRole, AttachmentSpec,
    DepthVarianceBufferDescription, GeometryBufferComponents, GeometryBufferDescription,
    ImageBufferDescription, LightBufferComponents, LightBufferDescription,
    RenderTargetDescription, VariancePrecision,
};
pub use pool::{PoolError, PoolLease, PoolListener, PoolResult, PoolScope, RenderTargetPool};

use crate::core::config::PoolLimits;
use crate::foundation::diagnostics::Diagnostics;
use std::sync::Arc;

/// A pool of framebuffer-backed targets for one kind of description
pub type FramebufferPool<D> = RenderTargetPool<D, RenderTarget<D>, FramebufferTargetListener<D>>;

/// Pool of deferred geometry buffers
pub type GeometryBufferPool = FramebufferPool<GeometryBufferDescription>;
/// Pool of light accumulation buffers
pub type LightBufferPool = FramebufferPool<LightBufferDescription>;
/// Pool of color image buffers
pub type ImageBufferPool = FramebufferPool<ImageBufferDescription>;
/// Pool of variance shadow maps
pub type DepthVarianceBufferPool = FramebufferPool<DepthVarianceBufferDescription>;
/// Pool of ambient occlusion buffers
pub type AmbientOcclusionBufferPool = FramebufferPool<AmbientOcclusionBufferDescription>;

/// Create a framebuffer pool sharing one diagnostics sink with its listener
pub fn framebuffer_pool<D: RenderTargetDescription>(
    limits: PoolLimits,
    diagnostics: Arc<dyn Diagnostics>,
) -> PoolResult<FramebufferPool<D>> {
    let listener = FramebufferTargetListener::with_diagnostics(Arc::clone(&diagnostics));
    RenderTargetPool::with_diagnostics(limits, listener, diagnostics)
}
