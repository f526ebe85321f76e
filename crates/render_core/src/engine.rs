//! The assembled rendering core
//!
//! [`RenderCore`] owns one of everything a deferred frame needs: the texture
//! unit allocator, a pool per kind of render target and the four scene sets,
//! all built from one [`RenderCoreConfig`] and sharing one diagnostics sink.
//! Render passes borrow the fields they need directly.

use crate::config::ConfigError;
use crate::core::config::RenderCoreConfig;
use crate::device::GraphicsDevice;
use crate::error::RenderCoreResult;
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use crate::foundation::ids::IdPool;
use crate::render::targets::{
    framebuffer_pool, AmbientOcclusionBufferPool, DepthVarianceBufferPool, GeometryBufferPool,
    ImageBufferPool, LightBufferPool, PoolScope,
};
use crate::render::textures::TextureUnitAllocator;
use crate::scene::{DepthInstances, SceneLights, SceneOpaques, SceneStencils};
use std::fmt;
use std::sync::Arc;

const TARGET: &str = "render_core::engine";

/// Bytes and entries held by one pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatistics {
    /// Bytes held by every entry
    pub held_bytes: u64,
    /// Bytes held by idle entries
    pub idle_bytes: u64,
    /// Entries, leased or idle
    pub entries: usize,
    /// Idle entries
    pub idle: usize,
}

/// A snapshot of the core's resource usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreStatistics {
    /// Per-pool usage, labelled
    pub pools: Vec<(&'static str, PoolStatistics)>,
    /// Current texture unit stack depth
    pub texture_unit_depth: usize,
    /// Opaque instances this frame
    pub opaques: usize,
    /// Depth-only instances this frame
    pub depth_instances: usize,
    /// Lights this frame
    pub lights: usize,
    /// Stencil instances this frame
    pub stencils: usize,
}

impl CoreStatistics {
    /// Bytes held across every pool
    pub fn held_bytes(&self) -> u64 {
        self.pools.iter().map(|(_, p)| p.held_bytes).sum()
    }
}

impl fmt::Display for CoreStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scene: {} opaque, {} depth, {} lights, {} stencil",
            self.opaques, self.depth_instances, self.lights, self.stencils
        )?;
        writeln!(f, "texture unit depth: {}", self.texture_unit_depth)?;
        for (name, pool) in &self.pools {
            writeln!(
                f,
                "pool {:<18} {:>10} bytes ({} idle) in {} entries ({} idle)",
                name, pool.held_bytes, pool.idle_bytes, pool.entries, pool.idle
            )?;
        }
        write!(f, "total held: {} bytes", self.held_bytes())
    }
}

macro_rules! pool_statistics {
    ($pool:expr) => {
        PoolStatistics {
            held_bytes: $pool.held_bytes(),
            idle_bytes: $pool.idle_bytes(),
            entries: $pool.entry_count(),
            idle: $pool.idle_count(),
        }
    };
}

/// Texture units, render target pools and scene sets for one renderer
#[derive(Debug)]
pub struct RenderCore {
    /// Texture unit allocator
    pub units: TextureUnitAllocator,
    /// Geometry buffer pool
    pub geometry_buffers: GeometryBufferPool,
    /// Light buffer pool
    pub light_buffers: LightBufferPool,
    /// Image buffer pool
    pub image_buffers: ImageBufferPool,
    /// Depth variance buffer pool
    pub depth_variance_buffers: DepthVarianceBufferPool,
    /// Ambient occlusion buffer pool
    pub ambient_occlusion_buffers: AmbientOcclusionBufferPool,
    /// Opaque instances
    pub opaques: SceneOpaques,
    /// Depth-only instances
    pub depth: DepthInstances,
    /// Lights
    pub lights: SceneLights,
    /// Stencil instances
    pub stencils: SceneStencils,
    ids: Arc<IdPool>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl RenderCore {
    /// Build every subsystem from a validated configuration
    pub fn new(config: &RenderCoreConfig) -> RenderCoreResult<Self> {
        Self::with_diagnostics(config, default_diagnostics())
    }

    /// Build every subsystem, reporting through the given sink
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] if the configuration is inconsistent.
    pub fn with_diagnostics(
        config: &RenderCoreConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> RenderCoreResult<Self> {
        config.validate().map_err(ConfigError::Validation)?;

        let pools = &config.pools;
        let capacity = config.scene.initial_capacity;
        let core = Self {
            units: TextureUnitAllocator::with_diagnostics(
                config.texture_units.units,
                config.texture_units.max_stack_depth,
                Arc::clone(&diagnostics),
            )?,
            geometry_buffers: framebuffer_pool(pools.geometry, Arc::clone(&diagnostics))?,
            light_buffers: framebuffer_pool(pools.light, Arc::clone(&diagnostics))?,
            image_buffers: framebuffer_pool(pools.image, Arc::clone(&diagnostics))?,
            depth_variance_buffers: framebuffer_pool(pools.depth_variance, Arc::clone(&diagnostics))?,
            ambient_occlusion_buffers: framebuffer_pool(
                pools.ambient_occlusion,
                Arc::clone(&diagnostics),
            )?,
            opaques: SceneOpaques::with_diagnostics(capacity, Arc::clone(&diagnostics)),
            depth: DepthInstances::with_diagnostics(capacity, Arc::clone(&diagnostics)),
            lights: SceneLights::with_diagnostics(Arc::clone(&diagnostics)),
            stencils: SceneStencils::with_diagnostics(capacity, Arc::clone(&diagnostics)),
            ids: Arc::new(IdPool::new()),
            diagnostics,
        };

        report!(core.diagnostics, Level::Info, TARGET, "render core initialized");
        Ok(core)
    }

    /// Identifier source for instances, materials, shaders and lights
    pub fn ids(&self) -> &Arc<IdPool> {
        &self.ids
    }

    /// Empty every scene set for the next frame
    pub fn reset_scene(&mut self) {
        self.opaques.reset();
        self.depth.reset();
        self.lights.reset();
        self.stencils.reset();
    }

    /// Current resource usage
    pub fn statistics(&self) -> CoreStatistics {
        CoreStatistics {
            pools: vec![
                ("geometry", pool_statistics!(self.geometry_buffers)),
                ("light", pool_statistics!(self.light_buffers)),
                ("image", pool_statistics!(self.image_buffers)),
                ("depth_variance", pool_statistics!(self.depth_variance_buffers)),
                ("ambient_occlusion", pool_statistics!(self.ambient_occlusion_buffers)),
            ],
            texture_unit_depth: self.units.depth(),
            opaques: self.opaques.count(),
            depth_instances: self.depth.count(),
            lights: self.lights.count(),
            stencils: self.stencils.count(),
        }
    }

    /// Destroy every pooled target. Safe to call more than once.
    pub fn delete(&mut self, device: &mut dyn GraphicsDevice) {
        report!(self.diagnostics, Level::Info, TARGET, "deleting render core");
        let root = self.units.root_context();
        let mut scope = PoolScope::new(device, &mut self.units, &root);
        self.geometry_buffers.delete(&mut scope);
        self.light_buffers.delete(&mut scope);
        self.image_buffers.delete(&mut scope);
        self.depth_variance_buffers.delete(&mut scope);
        self.ambient_occlusion_buffers.delete(&mut scope);
    }

    /// Whether [`delete`](Self::delete) has run
    pub fn is_deleted(&self) -> bool {
        self.geometry_buffers.is_deleted()
    }
}
