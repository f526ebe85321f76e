//! Shaders and materials
//!
//! A [`Material`] pairs a shader with parameter values of any type. The
//! parameter type is erased at construction: the material captures a closure
//! that knows how to upload its parameters, and the batching engine only ever
//! calls [`Material::apply_parameters`].

use crate::device::{GraphicsDevice, ProgramId, Texture2D, TextureUnit, UniformValue};
use crate::foundation::ids::{MaterialId, ShaderId};
use crate::render::textures::{TextureUnitAllocator, TextureUnitContext, TextureUnitResult};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A linked GPU program
#[derive(Debug)]
pub struct Shader {
    id: ShaderId,
    name: String,
    program: ProgramId,
    deleted: AtomicBool,
}

impl Shader {
    /// Wrap a linked program
    pub fn new(id: ShaderId, name: impl Into<String>, program: ProgramId) -> Self {
        Self {
            id,
            name: name.into(),
            program,
            deleted: AtomicBool::new(false),
        }
    }

    /// Identifier
    pub const fn id(&self) -> ShaderId {
        self.id
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device program
    pub const fn program(&self) -> ProgramId {
        self.program
    }

    /// Whether the program has been released
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Flag the program as released
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}

/// What a material's parameter closure may touch while it runs
pub struct MaterialBinding<'a> {
    device: &'a mut dyn GraphicsDevice,
    units: &'a mut TextureUnitAllocator,
    context: &'a TextureUnitContext,
    program: ProgramId,
}

impl<'a> MaterialBinding<'a> {
    /// Bind parameters for `program` within the given texture unit context
    pub fn new(
        device: &'a mut dyn GraphicsDevice,
        units: &'a mut TextureUnitAllocator,
        context: &'a TextureUnitContext,
        program: ProgramId,
    ) -> Self {
        Self {
            device,
            units,
            context,
            program,
        }
    }

    /// The program receiving the parameters
    pub const fn program(&self) -> ProgramId {
        self.program
    }

    /// Upload a uniform value
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> TextureUnitResult<()> {
        self.device.uniform_set(self.program, name, value)?;
        Ok(())
    }

    /// Bind a texture on the next free unit and point a sampler uniform at it
    pub fn bind_texture(&mut self, sampler: &str, texture: &Texture2D) -> TextureUnitResult<TextureUnit> {
        let unit = self
            .units
            .bind_texture_2d(self.context, &mut *self.device, texture)?;
        self.device
            .uniform_set(self.program, sampler, UniformValue::Sampler(unit))?;
        Ok(unit)
    }
}

impl fmt::Debug for MaterialBinding<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialBinding")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

type ApplyFn = dyn Fn(&mut MaterialBinding<'_>) -> TextureUnitResult<()> + Send + Sync;

/// A shader plus type-erased parameter values
pub struct Material {
    id: MaterialId,
    shader: Arc<Shader>,
    params: Arc<dyn Any + Send + Sync>,
    apply: Box<ApplyFn>,
}

impl Material {
    /// Create a material whose parameters are uploaded by `apply`
    pub fn new<P, F>(id: MaterialId, shader: Arc<Shader>, params: P, apply: F) -> Self
    where
        P: Any + Send + Sync,
        F: Fn(&P, &mut MaterialBinding<'_>) -> TextureUnitResult<()> + Send + Sync + 'static,
    {
        let params = Arc::new(params);
        let captured = Arc::clone(&params);
        Self {
            id,
            shader,
            params,
            apply: Box::new(move |binding: &mut MaterialBinding<'_>| apply(&captured, binding)),
        }
    }

    /// A material with no parameters
    pub fn without_parameters(id: MaterialId, shader: Arc<Shader>) -> Self {
        Self::new(id, shader, (), |_: &(), _| Ok(()))
    }

    /// Identifier
    pub const fn id(&self) -> MaterialId {
        self.id
    }

    /// The shader this material is drawn with
    pub const fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    /// The parameters, if they are of type `P`
    pub fn params<P: Any>(&self) -> Option<&P> {
        self.params.downcast_ref::<P>()
    }

    /// Upload the parameters
    pub fn apply_parameters(&self, binding: &mut MaterialBinding<'_>) -> TextureUnitResult<()> {
        (self.apply)(binding)
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("id", &self.id)
            .field("shader", &self.shader.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, HeadlessDevice, Texture2DParams, TextureFormat};
    use crate::foundation::ids::IdPool;

    struct Albedo {
        color: [f32; 4],
        texture: Texture2D,
    }

    #[test]
    fn test_apply_parameters_binds_through_allocator() {
        let ids = IdPool::new();
        let mut device = HeadlessDevice::new(4);
        let mut units = TextureUnitAllocator::new(4, 4).unwrap();
        let root = units.root_context();
        let texture = device
            .texture_2d_allocate(TextureUnit(0), &Texture2DParams::render_target(2, 2, TextureFormat::Rgba8))
            .unwrap();

        let shader = Arc::new(Shader::new(ids.fresh_shader(), "basic", ProgramId(7)));
        let material = Material::new(
            ids.fresh_material(),
            Arc::clone(&shader),
            Albedo {
                color: [1.0, 0.5, 0.25, 1.0],
                texture,
            },
            |params: &Albedo, binding| {
                let [r, g, b, a] = params.color;
                binding.set_uniform("albedo_color", UniformValue::Vec4([r, g, b, a].into()))?;
                binding.bind_texture("albedo_map", &params.texture)?;
                Ok(())
            },
        );

        device.program_activate(shader.program()).unwrap();
        device.clear_calls();

        let child = units.new_child_context(&root).unwrap();
        {
            let mut binding = MaterialBinding::new(&mut device, &mut units, &child, shader.program());
            material.apply_parameters(&mut binding).unwrap();
        }
        units.finish(child, &mut device).unwrap();

        assert!(device.calls().contains(&DeviceCall::UniformSet {
            program: ProgramId(7),
            name: "albedo_map".to_string(),
            value: UniformValue::Sampler(TextureUnit(0)),
        }));
        assert!(material.params::<Albedo>().is_some());
        assert!(material.params::<u32>().is_none());
    }

    #[test]
    fn test_shader_deletion_flag() {
        let shader = Shader::new(ShaderId(3), "s", ProgramId(1));
        assert!(!shader.is_deleted());
        shader.mark_deleted();
        assert!(shader.is_deleted());
        assert_eq!(shader.name(), "s");
    }
}
