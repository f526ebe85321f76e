//! Headless frame demo
//!
//! Loads a render core configuration (the first argument, or defaults),
//! populates every scene set, runs a stencil, geometry and light pass against
//! the in-memory device for a few frames and prints resource statistics.

use nalgebra::{Matrix4, Vector3};
use render_core::device::{Primitive, UniformValue};
use render_core::prelude::*;
use render_core::scene::{LightsConsumer, OpaquesConsumer, StencilMode, StencilsConsumer};
use std::sync::Arc;

const FRAMES: usize = 3;

struct StencilPass<'a> {
    device: &'a mut HeadlessDevice,
    program: ProgramId,
}

impl StencilsConsumer for StencilPass<'_> {
    type Error = RenderCoreError;

    fn on_start(&mut self) -> Result<(), Self::Error> {
        self.device.program_activate(self.program)?;
        Ok(())
    }

    fn on_instance_single_array_start(&mut self, instance: &InstanceSingle) -> Result<(), Self::Error> {
        self.device.array_object_bind(instance.array_object())?;
        Ok(())
    }

    fn on_instance_single(&mut self, instance: &InstanceSingle) -> Result<(), Self::Error> {
        self.device
            .uniform_set(self.program, "model", UniformValue::Mat4(*instance.transform()))?;
        self.device
            .draw_elements(Primitive::Triangles, instance.index_count(), 1)?;
        Ok(())
    }

    fn on_finish(&mut self) -> Result<(), Self::Error> {
        self.device.program_deactivate()?;
        Ok(())
    }
}

struct GeometryPass<'a> {
    device: &'a mut HeadlessDevice,
    units: &'a mut TextureUnitAllocator,
    parent: &'a TextureUnitContext,
    material_context: Option<TextureUnitContext>,
    draws: usize,
}

impl GeometryPass<'_> {
    fn start_material(&mut self, material: &Material) -> Result<(), RenderCoreError> {
        let child = self.units.new_child_context(self.parent)?;
        let mut binding = MaterialBinding::new(
            &mut *self.device,
            &mut *self.units,
            &child,
            material.shader().program(),
        );
        material.apply_parameters(&mut binding)?;
        self.material_context = Some(child);
        Ok(())
    }

    fn finish_material(&mut self) -> Result<(), RenderCoreError> {
        if let Some(child) = self.material_context.take() {
            self.units.finish(child, &mut *self.device)?;
        }
        Ok(())
    }
}

impl OpaquesConsumer for GeometryPass<'_> {
    type Error = RenderCoreError;

    fn on_instance_batched_update(&mut self, instance: &InstanceBatched) -> Result<(), Self::Error> {
        log::trace!("upload {} transforms for {}", instance.instance_count(), instance.instance_id());
        Ok(())
    }

    fn on_instance_batched_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        self.device.program_activate(shader.program())?;
        Ok(())
    }

    fn on_instance_batched_material_start(&mut self, material: &Material) -> Result<(), Self::Error> {
        self.start_material(material)
    }

    fn on_instance_batched_array_start(&mut self, instance: &InstanceBatched) -> Result<(), Self::Error> {
        self.device.array_object_bind(instance.array_object())?;
        Ok(())
    }

    fn on_instance_batched(&mut self, _: &Material, instance: &InstanceBatched) -> Result<(), Self::Error> {
        self.device.draw_elements(
            Primitive::Triangles,
            instance.index_count(),
            instance.instance_count(),
        )?;
        self.draws += 1;
        Ok(())
    }

    fn on_instance_batched_material_finish(&mut self, _: &Material) -> Result<(), Self::Error> {
        self.finish_material()
    }

    fn on_instance_batched_shader_finish(&mut self, _: &Shader) -> Result<(), Self::Error> {
        self.device.program_deactivate()?;
        Ok(())
    }

    fn on_instance_single_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        self.device.program_activate(shader.program())?;
        Ok(())
    }

    fn on_instance_single_material_start(&mut self, material: &Material) -> Result<(), Self::Error> {
        self.start_material(material)
    }

    fn on_instance_single_array_start(&mut self, instance: &InstanceSingle) -> Result<(), Self::Error> {
        self.device.array_object_bind(instance.array_object())?;
        Ok(())
    }

    fn on_instance_single(&mut self, material: &Material, instance: &InstanceSingle) -> Result<(), Self::Error> {
        self.device.uniform_set(
            material.shader().program(),
            "model",
            UniformValue::Mat4(*instance.transform()),
        )?;
        self.device
            .draw_elements(Primitive::Triangles, instance.index_count(), 1)?;
        self.draws += 1;
        Ok(())
    }

    fn on_instance_single_material_finish(&mut self, _: &Material) -> Result<(), Self::Error> {
        self.finish_material()
    }

    fn on_instance_single_shader_finish(&mut self, _: &Shader) -> Result<(), Self::Error> {
        self.device.program_deactivate()?;
        Ok(())
    }
}

/// Reads the geometry buffer on three borrowed units
struct LightPass<'a> {
    device: &'a mut HeadlessDevice,
    units: &'a mut TextureUnitAllocator,
    parent: &'a TextureUnitContext,
    gbuffer: &'a RenderTarget<GeometryBufferDescription>,
    shader_context: Option<TextureUnitContext>,
    draws: usize,
}

impl LightPass<'_> {
    fn start_shader(&mut self, shader: &Shader) -> Result<(), RenderCoreError> {
        self.device.program_activate(shader.program())?;
        let child = self.units.new_child_context_reserving(self.parent, 3)?;
        for (sampler, name) in [
            ("t_albedo", "albedo_emissive"),
            ("t_normal", "normal"),
            ("t_depth", "depth_stencil"),
        ] {
            if let Some(texture) = self.gbuffer.texture(name) {
                let unit = self.units.bind_texture_2d(&child, &mut *self.device, texture)?;
                self.device
                    .uniform_set(shader.program(), sampler, UniformValue::Sampler(unit))?;
            }
        }
        self.shader_context = Some(child);
        Ok(())
    }

    fn draw(&mut self, shader: &Shader, light: &LightSingle) -> Result<(), RenderCoreError> {
        let program = shader.program();
        self.device
            .uniform_set(program, "light_position", UniformValue::Vec3(light.position))?;
        self.device.uniform_set(
            program,
            "light_color",
            UniformValue::Vec3(light.color * light.intensity),
        )?;
        self.device
            .uniform_set(program, "light_radius", UniformValue::Float(light.radius))?;
        self.device.draw_elements(Primitive::Triangles, 36, 1)?;
        self.draws += 1;
        Ok(())
    }

    fn finish_shader(&mut self) -> Result<(), RenderCoreError> {
        if let Some(child) = self.shader_context.take() {
            self.units.finish(child, &mut *self.device)?;
        }
        self.device.program_deactivate()?;
        Ok(())
    }
}

impl LightsConsumer for LightPass<'_> {
    type Error = RenderCoreError;

    fn on_start_clip_group(&mut self, volume: &InstanceSingle, group: Group) -> Result<(), Self::Error> {
        log::debug!("clip volume {} in {}", volume.instance_id(), group);
        self.device.array_object_bind(volume.array_object())?;
        Ok(())
    }

    fn on_clip_group_light_single_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        self.start_shader(shader)
    }

    fn on_clip_group_light_single_array_start(&mut self, light: &LightSingle) -> Result<(), Self::Error> {
        self.device.array_object_bind(light.array_object())?;
        Ok(())
    }

    fn on_clip_group_light_single(&mut self, shader: &Shader, light: &LightSingle) -> Result<(), Self::Error> {
        self.draw(shader, light)
    }

    fn on_clip_group_light_single_shader_finish(&mut self, _: &Shader) -> Result<(), Self::Error> {
        self.finish_shader()
    }

    fn on_light_single_shader_start(&mut self, shader: &Shader) -> Result<(), Self::Error> {
        self.start_shader(shader)
    }

    fn on_light_single_array_start(&mut self, light: &LightSingle) -> Result<(), Self::Error> {
        self.device.array_object_bind(light.array_object())?;
        Ok(())
    }

    fn on_light_single(&mut self, shader: &Shader, light: &LightSingle) -> Result<(), Self::Error> {
        self.draw(shader, light)
    }

    fn on_light_single_shader_finish(&mut self, _: &Shader) -> Result<(), Self::Error> {
        self.finish_shader()
    }
}

struct Tint {
    color: Vector3<f32>,
}

fn populate(core: &mut RenderCore, frame: usize) -> RenderCoreResult<()> {
    let ids = Arc::clone(core.ids());
    let cube = ArrayObjectId(1);
    let sphere = ArrayObjectId(2);

    let geometry = Arc::new(Shader::new(ids.fresh_shader(), "geometry_basic", ProgramId(1)));
    let light_shader = Arc::new(Shader::new(ids.fresh_shader(), "light_spherical", ProgramId(2)));

    let red = Arc::new(Material::new(
        ids.fresh_material(),
        Arc::clone(&geometry),
        Tint { color: Vector3::new(1.0, 0.2, 0.2) },
        |tint: &Tint, binding| binding.set_uniform("albedo", UniformValue::Vec3(tint.color)),
    ));
    let grey = Arc::new(Material::new(
        ids.fresh_material(),
        Arc::clone(&geometry),
        Tint { color: Vector3::new(0.5, 0.5, 0.5) },
        |tint: &Tint, binding| binding.set_uniform("albedo", UniformValue::Vec3(tint.color)),
    ));

    for i in 0..8 {
        let offset = Vector3::new(i as f32 * 2.0, 0.0, frame as f32);
        let mesh = InstanceSingle::new(ids.fresh_instance(), if i % 2 == 0 { cube } else { sphere }, 36)
            .with_transform(Matrix4::new_translation(&offset));
        let material = if i < 4 { &red } else { &grey };
        core.opaques.add_single(Arc::new(mesh), Arc::clone(material))?;
    }

    let mut crowd = InstanceBatched::new(ids.fresh_instance(), cube, 36);
    for i in 0..64 {
        crowd.push(Matrix4::new_translation(&Vector3::new(0.0, i as f32, 0.0)));
    }
    let crowd = Arc::new(crowd);
    core.opaques.add_batched(Arc::clone(&crowd), Arc::clone(&grey))?;
    core.depth.add_batched(crowd, grey)?;

    let room = Arc::new(InstanceSingle::new(ids.fresh_instance(), cube, 36));
    core.stencils.add_single(Arc::clone(&room));

    let clip = core.lights.new_clip_group(room, Group::DEFAULT)?;
    for i in 0..4 {
        let light = LightSingle::new(ids.fresh_light(), sphere)
            .with_position(Vector3::new(i as f32, 2.0, 0.0))
            .with_radius(4.0);
        core.lights
            .clip_group_add_single(&clip, Arc::new(light), Arc::clone(&light_shader))?;
    }
    let sun = LightSingle::new(ids.fresh_light(), sphere).with_color(Vector3::new(1.0, 0.9, 0.8), 2.0);
    core.lights.add_single(Arc::new(sun), light_shader)?;
    Ok(())
}

fn render_frame(core: &mut RenderCore, device: &mut HeadlessDevice, frame: usize) -> RenderCoreResult<()> {
    let root = core.units.root_context();
    let area = Area::new(1280, 720);

    core.stencils.set_mode(StencilMode::InstancesArePositive);
    core.stencils.execute(&mut StencilPass {
        device: &mut *device,
        program: ProgramId(3),
    })?;

    let gbuffer = {
        let mut scope = PoolScope::new(&mut *device, &mut core.units, &root);
        core.geometry_buffers
            .get(&mut scope, &GeometryBufferDescription::new(area))?
    };

    let mut geometry = GeometryPass {
        device: &mut *device,
        units: &mut core.units,
        parent: &root,
        material_context: None,
        draws: 0,
    };
    core.opaques.execute(&mut geometry)?;
    let geometry_draws = geometry.draws;

    let light_buffer = {
        let mut scope = PoolScope::new(&mut *device, &mut core.units, &root);
        core.light_buffers
            .get(&mut scope, &LightBufferDescription::new(area))?
    };

    let mut lights = LightPass {
        device: &mut *device,
        units: &mut core.units,
        parent: &root,
        gbuffer: &gbuffer,
        shader_context: None,
        draws: 0,
    };
    core.lights.execute(&mut lights)?;
    let light_draws = lights.draws;

    log::info!(
        "frame {}: {} geometry draws, {} light draws into {:?}",
        frame,
        geometry_draws,
        light_draws,
        light_buffer.framebuffer()
    );

    let mut scope = PoolScope::new(&mut *device, &mut core.units, &root);
    core.light_buffers.return_value(&mut scope, light_buffer)?;
    core.geometry_buffers.return_value(&mut scope, gbuffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => RenderCoreConfig::load_validated(path)?,
        None => RenderCoreConfig::default(),
    };

    env_logger::Builder::from_default_env()
        .filter_level(config.logging.level_filter()?)
        .init();

    log::info!("Starting headless frame demo");

    let mut core = RenderCore::new(&config)?;
    let mut device = HeadlessDevice::new(config.texture_units.units);

    for frame in 0..FRAMES {
        core.reset_scene();
        populate(&mut core, frame)?;
        if let Err(e) = render_frame(&mut core, &mut device, frame) {
            log::error!("Frame {} failed: {}", frame, e);
            core.delete(&mut device);
            return Err(e.into());
        }
        device.clear_calls();
    }

    println!("{}", core.statistics());

    core.delete(&mut device);
    log::info!(
        "Shutdown complete: {} textures, {} framebuffers still live",
        device.live_texture_count(),
        device.live_framebuffer_count()
    );
    Ok(())
}
