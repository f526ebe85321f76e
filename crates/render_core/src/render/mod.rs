//! # Rendering Resources
//!
//! GPU-side resource management shared by every render pass.
//!
//! ## Organization
//!
//! - **textures**: scoped, stack-disciplined texture unit allocation
//! - **targets**: bounded caches of framebuffers keyed by description
//!
//! Pools create their targets through a child texture unit context, so the
//! two halves are used together:
//!
//! ```text
//! RenderTargetPool::get(scope, description)
//!     └── FramebufferTargetListener::create
//!             ├── units.new_child_context(scope.context)
//!             ├── units.allocate_texture_2d(...)   one per attachment
//!             ├── device.framebuffer_allocate(...)
//!             └── units.finish(child)
//! ```

pub mod targets;
pub mod textures;

pub use targets::{PoolError, PoolLease, PoolListener, PoolResult, PoolScope, RenderTargetPool};
pub use textures::{TextureUnitAllocator, TextureUnitContext, TextureUnitError};
