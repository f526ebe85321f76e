//! # Render Core
//!
//! Resource and scene management for a real-time deferred renderer: what is
//! drawn, in which order, using which GPU resources, with as few state
//! changes as possible.
//!
//! ## Features
//!
//! - **Texture units**: a stack of scoped contexts borrowing a fixed set of
//!   hardware units, restoring the parent's bindings on return
//! - **Render target pools**: value-keyed caches of framebuffers bounded by a
//!   soft and a hard byte limit
//! - **Scene sets**: per-frame containers for opaques, depth-only instances,
//!   lights and stencils, traversed shader > material > array object
//! - **Headless device**: an in-memory graphics device for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust
//! use render_core::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), RenderCoreError> {
//! let mut core = RenderCore::new(&RenderCoreConfig::default())?;
//! let ids = Arc::clone(core.ids());
//!
//! let shader = Arc::new(Shader::new(ids.fresh_shader(), "basic", ProgramId(1)));
//! let material = Arc::new(Material::without_parameters(ids.fresh_material(), shader));
//! let mesh = Arc::new(InstanceSingle::new(ids.fresh_instance(), ArrayObjectId(1), 36));
//!
//! core.opaques.add_single(mesh, material)?;
//! assert_eq!(core.opaques.count(), 1);
//! core.reset_scene();
//!
//! let mut device = HeadlessDevice::new(16);
//! core.delete(&mut device);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;

pub mod device;
pub mod foundation;
pub mod render;
pub mod scene;

mod engine;
mod error;

pub use engine::{CoreStatistics, PoolStatistics, RenderCore};
pub use error::{RenderCoreError, RenderCoreResult};

/// Common imports for users of the core
pub mod prelude {
    pub use crate::{
        core::config::{PoolLimits, RenderCoreConfig},
        device::{
            ArrayObjectId, GraphicsDevice, HeadlessDevice, ProgramId, Texture2D, Texture2DParams,
            TextureFormat, TextureUnit,
        },
        foundation::{Diagnostics, IdPool, InstanceId, LightId, MaterialId, ShaderId},
        render::targets::{
            Area, GeometryBufferDescription, ImageBufferDescription, LightBufferDescription,
            PoolLease, PoolScope, RenderTarget, RenderTargetDescription,
        },
        render::textures::{TextureUnitAllocator, TextureUnitContext},
        scene::{
            ClipGroup, DepthInstances, Group, Instance, InstanceBatched, InstanceBillboarded,
            InstanceSingle, LightSingle, Material, MaterialBinding, SceneLights, SceneOpaques,
            SceneStencils, Shader,
        },
        CoreStatistics, RenderCore, RenderCoreError, RenderCoreResult,
    };
}
