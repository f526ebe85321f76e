//! Framebuffer-backed render targets
//!
//! [`FramebufferTargetListener`] is the pool listener for every concrete
//! description: it opens a child texture unit context reserving one unit per
//! attachment, allocates each attachment texture, builds the framebuffer and
//! finishes the child so the caller's bindings are restored.

use super::description::{AttachmentRole, Area, RenderTargetDescription};
use super::pool::{PoolError, PoolListener, PoolResult, PoolScope};
use crate::device::{FramebufferDescriptor, FramebufferId, GraphicsDevice, Texture2D};
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use crate::render::textures::TextureUnitContext;
use std::marker::PhantomData;
use std::sync::Arc;

const TARGET: &str = "render_core::targets";

/// A framebuffer plus its named attachment textures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget<D> {
    description: D,
    framebuffer: FramebufferId,
    textures: Vec<(&'static str, Texture2D)>,
    byte_size: u64,
}

impl<D: RenderTargetDescription> RenderTarget<D> {
    /// The description the target was built from
    pub const fn description(&self) -> &D {
        &self.description
    }

    /// Size of every attachment
    pub fn area(&self) -> Area {
        self.description.area()
    }

    /// The framebuffer to draw into
    pub const fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    /// Look up an attachment texture by name
    pub fn texture(&self, name: &str) -> Option<&Texture2D> {
        self.textures
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, texture)| texture)
    }

    /// Every attachment in creation order
    pub fn textures(&self) -> impl Iterator<Item = &Texture2D> {
        self.textures.iter().map(|(_, texture)| texture)
    }

    /// Bytes used by all attachments
    pub const fn byte_size(&self) -> u64 {
        self.byte_size
    }
}

/// Pool listener building [`RenderTarget`]s on the device
#[derive(Debug)]
pub struct FramebufferTargetListener<D> {
    errors: u64,
    diagnostics: Arc<dyn Diagnostics>,
    _description: PhantomData<fn() -> D>,
}

impl<D> FramebufferTargetListener<D> {
    /// Create a listener logging through the `log` facade
    pub fn new() -> Self {
        Self::with_diagnostics(default_diagnostics())
    }

    /// Create a listener reporting through the given sink
    pub fn with_diagnostics(diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            errors: 0,
            diagnostics,
            _description: PhantomData,
        }
    }

    /// Number of swallowed eviction failures so far
    pub const fn error_count(&self) -> u64 {
        self.errors
    }
}

impl<D> Default for FramebufferTargetListener<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RenderTargetDescription> FramebufferTargetListener<D> {
    fn build(
        scope: &mut PoolScope<'_>,
        child: &TextureUnitContext,
        description: &D,
        allocated: &mut Vec<(&'static str, Texture2D)>,
    ) -> PoolResult<FramebufferId> {
        let area = description.area();
        let mut framebuffer = FramebufferDescriptor::default();

        for attachment in description.attachments() {
            let (_, texture) = scope.units.allocate_texture_2d(
                child,
                &mut *scope.device,
                &attachment.texture_params(area),
            )?;
            allocated.push((attachment.name, texture));
            match attachment.role {
                AttachmentRole::Color => framebuffer.color.push(texture.id),
                AttachmentRole::DepthStencil => framebuffer.depth_stencil = Some(texture.id),
            }
        }

        Ok(scope.device.framebuffer_allocate(&framebuffer)?)
    }

    fn release_textures(
        device: &mut dyn GraphicsDevice,
        textures: &[(&'static str, Texture2D)],
    ) -> PoolResult<()> {
        let mut first_error = None;
        for (_, texture) in textures {
            if let Err(error) = device.texture_2d_delete(texture) {
                first_error.get_or_insert(PoolError::from(error));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn discard(
        &self,
        device: &mut dyn GraphicsDevice,
        framebuffer: Option<FramebufferId>,
        textures: &[(&'static str, Texture2D)],
    ) {
        let framebuffer = framebuffer.map_or(Ok(()), |framebuffer| {
            device.framebuffer_delete(framebuffer).map_err(PoolError::from)
        });
        let released = Self::release_textures(device, textures);
        if let Err(error) = framebuffer.and(released) {
            report!(
                self.diagnostics,
                Level::Error,
                TARGET,
                "failed to free partial target: {}",
                error
            );
        }
    }
}

impl<D: RenderTargetDescription> PoolListener<D, RenderTarget<D>> for FramebufferTargetListener<D> {
    fn estimate_size(&self, description: &D) -> u64 {
        description.estimated_bytes()
    }

    fn create(&mut self, scope: &mut PoolScope<'_>, description: &D) -> PoolResult<RenderTarget<D>> {
        let attachments = description.attachments().len() as u32;
        let child = scope
            .units
            .new_child_context_reserving(scope.context, attachments)?;

        let mut textures = Vec::with_capacity(attachments as usize);
        let built = Self::build(scope, &child, description, &mut textures);
        let finished = scope
            .units
            .finish(child, &mut *scope.device)
            .map_err(PoolError::from);

        // Nothing owns a partial target, so free whatever was allocated.
        let framebuffer = match (built, finished) {
            (Ok(framebuffer), Ok(())) => framebuffer,
            (Ok(framebuffer), Err(error)) => {
                self.discard(&mut *scope.device, Some(framebuffer), &textures);
                return Err(error);
            }
            (Err(error), _) => {
                self.discard(&mut *scope.device, None, &textures);
                return Err(error);
            }
        };

        let byte_size = textures.iter().map(|(_, t)| t.byte_size()).sum();
        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "create {:?} ({} bytes)",
            description,
            byte_size
        );

        Ok(RenderTarget {
            description: description.clone(),
            framebuffer,
            textures,
            byte_size,
        })
    }

    fn size_of(&self, _description: &D, target: &RenderTarget<D>) -> u64 {
        target.byte_size
    }

    fn on_reuse(&mut self, description: &D, _target: &RenderTarget<D>) {
        report!(self.diagnostics, Level::Trace, TARGET, "reuse {:?}", description);
    }

    fn on_delete(
        &mut self,
        scope: &mut PoolScope<'_>,
        _description: &D,
        target: RenderTarget<D>,
    ) -> PoolResult<()> {
        report!(self.diagnostics, Level::Trace, TARGET, "delete {:?}", target.framebuffer);

        let framebuffer = scope
            .device
            .framebuffer_delete(target.framebuffer)
            .map_err(PoolError::from);
        let textures = Self::release_textures(&mut *scope.device, &target.textures);
        framebuffer.and(textures)
    }

    fn on_error(&mut self, _error: &PoolError) {
        self.errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PoolLimits;
    use crate::device::{DeviceError, HeadlessDevice, TextureUnit};
    use crate::render::targets::description::{
        GeometryBufferDescription, ImageBufferDescription, LightBufferComponents,
        LightBufferDescription,
    };
    use crate::render::targets::pool::RenderTargetPool;
    use crate::render::textures::{TextureUnitAllocator, TextureUnitError};

    type GeometryPool = RenderTargetPool<
        GeometryBufferDescription,
        RenderTarget<GeometryBufferDescription>,
        FramebufferTargetListener<GeometryBufferDescription>,
    >;

    fn geometry_pool() -> GeometryPool {
        let _ = env_logger::builder().is_test(true).try_init();
        RenderTargetPool::new(PoolLimits::new(1 << 20, 1 << 24), FramebufferTargetListener::new())
            .unwrap()
    }

    #[test]
    fn test_create_builds_framebuffer_and_restores_units() {
        let mut device = HeadlessDevice::new(8);
        let mut units = TextureUnitAllocator::new(8, 4).unwrap();
        let root = units.root_context();
        let (_, albedo) = units
            .allocate_texture_2d(&root, &mut device, &crate::device::Texture2DParams::render_target(
                1,
                1,
                crate::device::TextureFormat::Rgba8,
            ))
            .unwrap();

        let mut pool = geometry_pool();
        let description = GeometryBufferDescription::new(Area::new(16, 16));
        let mut scope = PoolScope::new(&mut device, &mut units, &root);
        let target = pool.get(&mut scope, &description).unwrap();

        assert_eq!(target.textures().count(), 4);
        assert!(target.texture("normal").is_some());
        assert!(target.texture("missing").is_none());
        assert_eq!(target.byte_size(), description.estimated_bytes());
        assert_eq!(pool.held_bytes(), target.byte_size());

        pool.return_value(&mut scope, target).unwrap();
        pool.delete(&mut scope);
        drop(scope);

        assert!(units.is_current(&root));
        assert_eq!(device.bound_texture(TextureUnit(0)), Some(albedo.id));
        for unit in 1..8 {
            assert_eq!(device.bound_texture(TextureUnit(unit)), None);
        }
        assert_eq!(device.live_texture_count(), 1);
        assert_eq!(device.live_framebuffer_count(), 0);
    }

    #[test]
    fn test_reserving_fails_without_enough_units() {
        let mut device = HeadlessDevice::new(2);
        let mut units = TextureUnitAllocator::new(2, 4).unwrap();
        let root = units.root_context();
        let mut scope = PoolScope::new(&mut device, &mut units, &root);

        let mut pool = geometry_pool();
        let err = pool
            .get(&mut scope, &GeometryBufferDescription::new(Area::new(4, 4)))
            .unwrap_err();
        assert_eq!(
            err,
            PoolError::TextureUnits(TextureUnitError::UnitsExhausted {
                required: 4,
                available: 2
            })
        );
        assert_eq!(pool.entry_count(), 0);
    }

    #[test]
    fn test_failed_allocation_frees_partial_target() {
        let mut device = HeadlessDevice::new(4);
        let mut units = TextureUnitAllocator::new(4, 4).unwrap();
        let root = units.root_context();

        let mut pool: RenderTargetPool<_, _, FramebufferTargetListener<LightBufferDescription>> =
            RenderTargetPool::new(PoolLimits::new(1 << 20, 1 << 20), FramebufferTargetListener::new())
                .unwrap();
        let description = LightBufferDescription::new(Area::new(4, 4))
            .with_components(LightBufferComponents::DIFFUSE);

        // The diffuse attachment is allocated, the depth attachment fails.
        device.fail_texture_allocation_after(1);

        let mut scope = PoolScope::new(&mut device, &mut units, &root);
        let err = pool.get(&mut scope, &description).unwrap_err();
        assert!(matches!(err, PoolError::Device(DeviceError::AllocationFailed(_))));
        drop(scope);

        assert_eq!(device.live_texture_count(), 0);
        assert_eq!(units.depth(), 1);
    }

    #[test]
    fn test_failed_finish_frees_built_target() {
        let mut device = HeadlessDevice::new(4);
        let mut units = TextureUnitAllocator::new(4, 4).unwrap();
        let root = units.root_context();

        let mut pool: RenderTargetPool<_, _, FramebufferTargetListener<ImageBufferDescription>> =
            RenderTargetPool::new(PoolLimits::new(1 << 20, 1 << 20), FramebufferTargetListener::new())
                .unwrap();

        // Restoring the root bindings after the build fails on the device.
        device.fail_next_texture_unbinds(1);

        let mut scope = PoolScope::new(&mut device, &mut units, &root);
        let err = pool
            .get(&mut scope, &ImageBufferDescription::new(Area::new(4, 4)))
            .unwrap_err();
        assert!(matches!(err, PoolError::Device(DeviceError::Backend(_))));
        assert_eq!(pool.entry_count(), 0);
        assert_eq!(pool.held_bytes(), 0);
        drop(scope);

        assert_eq!(device.live_texture_count(), 0);
        assert_eq!(device.live_framebuffer_count(), 0);
        assert!(units.is_current(&root));
    }

    #[test]
    fn test_delete_failure_counted() {
        let mut device = HeadlessDevice::new(4);
        let mut units = TextureUnitAllocator::new(4, 4).unwrap();
        let root = units.root_context();
        let mut pool = geometry_pool();

        {
            let mut scope = PoolScope::new(&mut device, &mut units, &root);
            let target = pool
                .get(&mut scope, &GeometryBufferDescription::new(Area::new(2, 2)))
                .unwrap();
            pool.return_value(&mut scope, target).unwrap();
        }

        device.fail_next_texture_deletes(1);
        let mut scope = PoolScope::new(&mut device, &mut units, &root);
        pool.delete(&mut scope);
        assert_eq!(pool.listener().error_count(), 1);
        drop(scope);

        // The framebuffer and the other three textures were still released.
        assert_eq!(device.live_framebuffer_count(), 0);
        assert_eq!(device.live_texture_count(), 1);
    }
}
