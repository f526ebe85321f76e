//! Graphics device facade
//!
//! The rendering core never talks to a graphics API directly. Everything it
//! needs from the GPU (allocating and binding textures, building framebuffers,
//! activating programs, uploading uniforms, binding array objects and drawing)
//! goes through the [`GraphicsDevice`] trait defined here. Concrete backends
//! live outside this crate; [`HeadlessDevice`] is an in-memory implementation
//! that records every call, used for tests and for running the core without a
//! window.
//!
//! All handles are plain integers. The device is the authority on whether a
//! handle still refers to a live object.

pub mod headless;
pub mod texture;

pub use headless::{DeviceCall, HeadlessDevice};
pub use texture::{FilterMode, Texture2D, Texture2DParams, TextureFormat, WrapMode};

use nalgebra::{Matrix4, Vector3, Vector4};
use std::fmt;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Handle to a device texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Handle to a device framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Device-side handle for a mesh's vertex and index bindings.
///
/// The scene sets use it only as a sort and coalescing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayObjectId(pub u32);

/// A hardware texture unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureUnit(pub u32);

impl TextureUnit {
    /// Index of the unit, as used for sampler uniforms
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TextureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit[{}]", self.0)
    }
}

/// Errors reported by a device facade
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The texture handle does not refer to a live texture
    #[error("Unknown or deleted texture: {0:?}")]
    UnknownTexture(TextureId),

    /// The framebuffer handle does not refer to a live framebuffer
    #[error("Unknown or deleted framebuffer: {0:?}")]
    UnknownFramebuffer(FramebufferId),

    /// The texture unit index is outside the hardware range
    #[error("Invalid texture unit {unit} (device has {count} units)")]
    InvalidUnit {
        /// Requested unit index
        unit: u32,
        /// Units the device exposes
        count: u32,
    },

    /// No program is active for an operation that needs one
    #[error("No program is active")]
    NoActiveProgram,

    /// The device could not allocate a resource
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Values that can be uploaded to a program uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// Signed integer
    Int(i32),
    /// Float scalar
    Float(f32),
    /// 3-component vector
    Vec3(Vector3<f32>),
    /// 4-component vector
    Vec4(Vector4<f32>),
    /// 4x4 matrix
    Mat4(Matrix4<f32>),
    /// Sampler bound to a texture unit
    Sampler(TextureUnit),
}

/// Attachments for a new framebuffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    /// Color attachments in draw-buffer order
    pub color: Vec<TextureId>,
    /// Optional depth or depth-stencil attachment
    pub depth_stencil: Option<TextureId>,
}

/// Primitive topology for draw calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Independent triangles
    Triangles,
    /// Independent lines
    Lines,
    /// Points
    Points,
}

/// Primitive operations the rendering core needs from a graphics API.
///
/// The trait is object safe; the core passes `&mut dyn GraphicsDevice` around.
pub trait GraphicsDevice: fmt::Debug {
    /// Number of hardware texture units
    fn texture_unit_count(&self) -> u32;

    /// Allocate a 2D texture, leaving it bound to `unit`
    fn texture_2d_allocate(
        &mut self,
        unit: TextureUnit,
        params: &Texture2DParams,
    ) -> DeviceResult<Texture2D>;

    /// Bind a texture to a unit
    fn texture_2d_bind(&mut self, unit: TextureUnit, texture: &Texture2D) -> DeviceResult<()>;

    /// Leave a unit with nothing bound
    fn texture_unit_unbind(&mut self, unit: TextureUnit) -> DeviceResult<()>;

    /// Release a texture
    fn texture_2d_delete(&mut self, texture: &Texture2D) -> DeviceResult<()>;

    /// Whether a texture has been released
    fn texture_2d_is_deleted(&self, texture: &Texture2D) -> bool;

    /// Build a framebuffer from already-allocated textures
    fn framebuffer_allocate(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> DeviceResult<FramebufferId>;

    /// Release a framebuffer (attachments are released separately)
    fn framebuffer_delete(&mut self, framebuffer: FramebufferId) -> DeviceResult<()>;

    /// Make a program current
    fn program_activate(&mut self, program: ProgramId) -> DeviceResult<()>;

    /// Leave no program current
    fn program_deactivate(&mut self) -> DeviceResult<()>;

    /// Set a uniform on a program
    fn uniform_set(&mut self, program: ProgramId, name: &str, value: UniformValue)
        -> DeviceResult<()>;

    /// Bind a vertex array object for subsequent draws
    fn array_object_bind(&mut self, array_object: ArrayObjectId) -> DeviceResult<()>;

    /// Issue an indexed draw using the bound array object
    fn draw_elements(
        &mut self,
        primitive: Primitive,
        index_count: u32,
        instance_count: u32,
    ) -> DeviceResult<()>;
}
