//! In-memory device facade
//!
//! [`HeadlessDevice`] keeps just enough state to behave like a real device
//! from the core's point of view: live and deleted textures, framebuffers,
//! the texture bound on each unit, the active program. Every call is appended
//! to a log of [`DeviceCall`]s so tests can assert on exactly what the core
//! asked the GPU to do.

use super::{
    ArrayObjectId, DeviceError, DeviceResult, FramebufferDescriptor, FramebufferId,
    GraphicsDevice, Primitive, ProgramId, Texture2D, Texture2DParams, TextureId, TextureUnit,
    UniformValue,
};
use std::collections::{HashMap, HashSet};

/// One recorded device operation
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// `texture_2d_allocate`
    TextureAllocate {
        /// Unit the texture was allocated on
        unit: TextureUnit,
        /// New texture
        texture: TextureId,
    },
    /// `texture_2d_bind`
    TextureBind {
        /// Target unit
        unit: TextureUnit,
        /// Bound texture
        texture: TextureId,
    },
    /// `texture_unit_unbind`
    TextureUnbind(TextureUnit),
    /// `texture_2d_delete`
    TextureDelete(TextureId),
    /// `framebuffer_allocate`
    FramebufferAllocate(FramebufferId),
    /// `framebuffer_delete`
    FramebufferDelete(FramebufferId),
    /// `program_activate`
    ProgramActivate(ProgramId),
    /// `program_deactivate`
    ProgramDeactivate,
    /// `uniform_set`
    UniformSet {
        /// Program the uniform belongs to
        program: ProgramId,
        /// Uniform name
        name: String,
        /// Uploaded value
        value: UniformValue,
    },
    /// `array_object_bind`
    ArrayObjectBind(ArrayObjectId),
    /// `draw_elements`
    Draw {
        /// Topology
        primitive: Primitive,
        /// Indices per instance
        index_count: u32,
        /// Instances drawn
        instance_count: u32,
    },
}

/// A device facade with no GPU behind it
#[derive(Debug)]
pub struct HeadlessDevice {
    unit_count: u32,
    next_texture: u32,
    next_framebuffer: u32,
    textures: HashMap<TextureId, Texture2DParams>,
    deleted_textures: HashSet<TextureId>,
    framebuffers: HashMap<FramebufferId, FramebufferDescriptor>,
    bindings: Vec<Option<TextureId>>,
    active_program: Option<ProgramId>,
    calls: Vec<DeviceCall>,
    failing_texture_deletes: u32,
    failing_texture_allocations: u32,
    failing_allocation_in: Option<u32>,
    failing_unbinds: u32,
}

impl HeadlessDevice {
    /// Create a device exposing `unit_count` texture units
    pub fn new(unit_count: u32) -> Self {
        Self {
            unit_count,
            next_texture: 1,
            next_framebuffer: 1,
            textures: HashMap::new(),
            deleted_textures: HashSet::new(),
            framebuffers: HashMap::new(),
            bindings: vec![None; unit_count as usize],
            active_program: None,
            calls: Vec::new(),
            failing_texture_deletes: 0,
            failing_texture_allocations: 0,
            failing_allocation_in: None,
            failing_unbinds: 0,
        }
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Forget the recorded calls (state is kept)
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// The texture currently bound on `unit`
    pub fn bound_texture(&self, unit: TextureUnit) -> Option<TextureId> {
        self.bindings.get(unit.0 as usize).copied().flatten()
    }

    /// Number of textures that have been allocated and not deleted
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Number of live framebuffers
    pub fn live_framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Whether a framebuffer is live
    pub fn framebuffer_is_live(&self, framebuffer: FramebufferId) -> bool {
        self.framebuffers.contains_key(&framebuffer)
    }

    /// The program made current by the last `program_activate`
    pub const fn active_program(&self) -> Option<ProgramId> {
        self.active_program
    }

    /// Make the next `count` texture deletions fail (the texture stays live)
    pub fn fail_next_texture_deletes(&mut self, count: u32) {
        self.failing_texture_deletes = count;
    }

    /// Make the next `count` texture allocations fail
    pub fn fail_next_texture_allocations(&mut self, count: u32) {
        self.failing_texture_allocations = count;
    }

    /// Let `skip` allocations succeed, then fail the one after
    pub fn fail_texture_allocation_after(&mut self, skip: u32) {
        self.failing_allocation_in = Some(skip);
    }

    /// Make the next `count` unit unbinds fail (the binding is kept)
    pub fn fail_next_texture_unbinds(&mut self, count: u32) {
        self.failing_unbinds = count;
    }

    fn take_allocation_failure(&mut self) -> bool {
        if self.failing_texture_allocations > 0 {
            self.failing_texture_allocations -= 1;
            return true;
        }
        match self.failing_allocation_in {
            Some(0) => {
                self.failing_allocation_in = None;
                true
            }
            Some(remaining) => {
                self.failing_allocation_in = Some(remaining - 1);
                false
            }
            None => false,
        }
    }

    fn check_unit(&self, unit: TextureUnit) -> DeviceResult<usize> {
        if unit.0 < self.unit_count {
            Ok(unit.0 as usize)
        } else {
            Err(DeviceError::InvalidUnit {
                unit: unit.0,
                count: self.unit_count,
            })
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn texture_unit_count(&self) -> u32 {
        self.unit_count
    }

    fn texture_2d_allocate(
        &mut self,
        unit: TextureUnit,
        params: &Texture2DParams,
    ) -> DeviceResult<Texture2D> {
        let index = self.check_unit(unit)?;
        if self.take_allocation_failure() {
            return Err(DeviceError::AllocationFailed(format!(
                "injected failure allocating {}x{} {:?}",
                params.width, params.height, params.format
            )));
        }

        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, *params);
        self.bindings[index] = Some(id);
        self.calls.push(DeviceCall::TextureAllocate { unit, texture: id });
        Ok(Texture2D {
            id,
            params: *params,
        })
    }

    fn texture_2d_bind(&mut self, unit: TextureUnit, texture: &Texture2D) -> DeviceResult<()> {
        let index = self.check_unit(unit)?;
        if !self.textures.contains_key(&texture.id) {
            return Err(DeviceError::UnknownTexture(texture.id));
        }
        self.bindings[index] = Some(texture.id);
        self.calls.push(DeviceCall::TextureBind {
            unit,
            texture: texture.id,
        });
        Ok(())
    }

    fn texture_unit_unbind(&mut self, unit: TextureUnit) -> DeviceResult<()> {
        let index = self.check_unit(unit)?;
        if self.failing_unbinds > 0 {
            self.failing_unbinds -= 1;
            return Err(DeviceError::Backend(format!("injected failure unbinding {unit:?}")));
        }
        self.bindings[index] = None;
        self.calls.push(DeviceCall::TextureUnbind(unit));
        Ok(())
    }

    fn texture_2d_delete(&mut self, texture: &Texture2D) -> DeviceResult<()> {
        if self.failing_texture_deletes > 0 {
            self.failing_texture_deletes -= 1;
            return Err(DeviceError::Backend(format!(
                "injected failure deleting {:?}",
                texture.id
            )));
        }
        if self.textures.remove(&texture.id).is_none() {
            return Err(DeviceError::UnknownTexture(texture.id));
        }
        self.deleted_textures.insert(texture.id);
        for binding in &mut self.bindings {
            if *binding == Some(texture.id) {
                *binding = None;
            }
        }
        self.calls.push(DeviceCall::TextureDelete(texture.id));
        Ok(())
    }

    fn texture_2d_is_deleted(&self, texture: &Texture2D) -> bool {
        self.deleted_textures.contains(&texture.id)
    }

    fn framebuffer_allocate(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> DeviceResult<FramebufferId> {
        let attachments = descriptor.color.iter().chain(descriptor.depth_stencil.iter());
        for texture in attachments {
            if !self.textures.contains_key(texture) {
                return Err(DeviceError::UnknownTexture(*texture));
            }
        }

        let id = FramebufferId(self.next_framebuffer);
        self.next_framebuffer += 1;
        self.framebuffers.insert(id, descriptor.clone());
        self.calls.push(DeviceCall::FramebufferAllocate(id));
        Ok(id)
    }

    fn framebuffer_delete(&mut self, framebuffer: FramebufferId) -> DeviceResult<()> {
        if self.framebuffers.remove(&framebuffer).is_none() {
            return Err(DeviceError::UnknownFramebuffer(framebuffer));
        }
        self.calls.push(DeviceCall::FramebufferDelete(framebuffer));
        Ok(())
    }

    fn program_activate(&mut self, program: ProgramId) -> DeviceResult<()> {
        self.active_program = Some(program);
        self.calls.push(DeviceCall::ProgramActivate(program));
        Ok(())
    }

    fn program_deactivate(&mut self) -> DeviceResult<()> {
        self.active_program = None;
        self.calls.push(DeviceCall::ProgramDeactivate);
        Ok(())
    }

    fn uniform_set(
        &mut self,
        program: ProgramId,
        name: &str,
        value: UniformValue,
    ) -> DeviceResult<()> {
        if self.active_program != Some(program) {
            return Err(DeviceError::NoActiveProgram);
        }
        self.calls.push(DeviceCall::UniformSet {
            program,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn array_object_bind(&mut self, array_object: ArrayObjectId) -> DeviceResult<()> {
        self.calls.push(DeviceCall::ArrayObjectBind(array_object));
        Ok(())
    }

    fn draw_elements(
        &mut self,
        primitive: Primitive,
        index_count: u32,
        instance_count: u32,
    ) -> DeviceResult<()> {
        if self.active_program.is_none() {
            return Err(DeviceError::NoActiveProgram);
        }
        self.calls.push(DeviceCall::Draw {
            primitive,
            index_count,
            instance_count,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TextureFormat;

    fn params() -> Texture2DParams {
        Texture2DParams::render_target(4, 4, TextureFormat::Rgba8)
    }

    #[test]
    fn test_allocate_binds_to_unit() {
        let mut device = HeadlessDevice::new(4);
        let texture = device.texture_2d_allocate(TextureUnit(2), &params()).unwrap();
        assert_eq!(device.bound_texture(TextureUnit(2)), Some(texture.id));
        assert_eq!(device.live_texture_count(), 1);
    }

    #[test]
    fn test_invalid_unit_rejected() {
        let mut device = HeadlessDevice::new(2);
        let err = device.texture_2d_allocate(TextureUnit(2), &params()).unwrap_err();
        assert_eq!(err, DeviceError::InvalidUnit { unit: 2, count: 2 });
    }

    #[test]
    fn test_delete_marks_deleted_and_unbinds() {
        let mut device = HeadlessDevice::new(2);
        let texture = device.texture_2d_allocate(TextureUnit(0), &params()).unwrap();
        device.texture_2d_delete(&texture).unwrap();
        assert!(device.texture_2d_is_deleted(&texture));
        assert_eq!(device.bound_texture(TextureUnit(0)), None);
        assert!(device.texture_2d_bind(TextureUnit(1), &texture).is_err());
    }

    #[test]
    fn test_injected_delete_failure_keeps_texture() {
        let mut device = HeadlessDevice::new(1);
        let texture = device.texture_2d_allocate(TextureUnit(0), &params()).unwrap();
        device.fail_next_texture_deletes(1);
        assert!(device.texture_2d_delete(&texture).is_err());
        assert!(!device.texture_2d_is_deleted(&texture));
        device.texture_2d_delete(&texture).unwrap();
        assert!(device.texture_2d_is_deleted(&texture));
    }

    #[test]
    fn test_framebuffer_requires_live_attachments() {
        let mut device = HeadlessDevice::new(1);
        let bad = FramebufferDescriptor {
            color: vec![TextureId(99)],
            depth_stencil: None,
        };
        assert_eq!(
            device.framebuffer_allocate(&bad),
            Err(DeviceError::UnknownTexture(TextureId(99)))
        );

        let texture = device.texture_2d_allocate(TextureUnit(0), &params()).unwrap();
        let good = FramebufferDescriptor {
            color: vec![texture.id],
            depth_stencil: None,
        };
        let fb = device.framebuffer_allocate(&good).unwrap();
        assert!(device.framebuffer_is_live(fb));
        device.framebuffer_delete(fb).unwrap();
        assert!(!device.framebuffer_is_live(fb));
    }

    #[test]
    fn test_uniform_requires_active_program() {
        let mut device = HeadlessDevice::new(1);
        assert_eq!(
            device.uniform_set(ProgramId(1), "u", UniformValue::Int(1)),
            Err(DeviceError::NoActiveProgram)
        );
        device.program_activate(ProgramId(1)).unwrap();
        device.uniform_set(ProgramId(1), "u", UniformValue::Int(1)).unwrap();
        assert_eq!(device.calls().len(), 2);
    }
}
