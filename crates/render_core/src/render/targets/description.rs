//! Render target descriptions
//!
//! A description is a plain value (size plus attachment layout) used as the
//! pool's cache key. Two descriptions that compare equal may share a target.

use crate::device::{FilterMode, Texture2DParams, TextureFormat};
use std::fmt;
use std::hash::Hash;

/// Width and height of a render target in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Area {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Area {
    /// Create an area
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered
    pub const fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Where an attachment is bound on the framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentRole {
    /// A color draw buffer, in declaration order
    Color,
    /// The depth (or depth-stencil) attachment
    DepthStencil,
}

/// One texture of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentSpec {
    /// Name used to look the texture up on the built target
    pub name: &'static str,
    /// Texel format
    pub format: TextureFormat,
    /// Sampling filter
    pub filter: FilterMode,
    /// Framebuffer binding point
    pub role: AttachmentRole,
}

impl AttachmentSpec {
    /// A linearly filtered color attachment
    pub const fn color(name: &'static str, format: TextureFormat) -> Self {
        Self {
            name,
            format,
            filter: FilterMode::Linear,
            role: AttachmentRole::Color,
        }
    }

    /// A depth attachment
    pub const fn depth(name: &'static str, format: TextureFormat) -> Self {
        Self {
            name,
            format,
            filter: FilterMode::Nearest,
            role: AttachmentRole::DepthStencil,
        }
    }

    /// Texture parameters for this attachment at `area`
    pub const fn texture_params(&self, area: Area) -> Texture2DParams {
        Texture2DParams::render_target(area.width, area.height, self.format)
            .with_filter(self.filter)
    }
}

/// A value-equal key describing how to build a render target
pub trait RenderTargetDescription: Clone + Eq + Hash + fmt::Debug {
    /// Size of every attachment
    fn area(&self) -> Area;

    /// Attachments in creation order
    fn attachments(&self) -> Vec<AttachmentSpec>;

    /// Bytes the built target will occupy
    fn estimated_bytes(&self) -> u64 {
        let area = self.area();
        self.attachments()
            .iter()
            .map(|attachment| attachment.texture_params(area).byte_size())
            .sum()
    }
}

/// Which optional outputs a geometry buffer carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeometryBufferComponents {
    /// Albedo, normals and specular
    #[default]
    Full,
    /// Albedo and normals only
    NoSpecular,
}

/// Description of a deferred geometry buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryBufferDescription {
    /// Size
    pub area: Area,
    /// Optional outputs
    pub components: GeometryBufferComponents,
}

impl GeometryBufferDescription {
    /// A full geometry buffer
    pub const fn new(area: Area) -> Self {
        Self {
            area,
            components: GeometryBufferComponents::Full,
        }
    }

    /// Set the optional outputs
    pub const fn with_components(mut self, components: GeometryBufferComponents) -> Self {
        self.components = components;
        self
    }
}

impl RenderTargetDescription for GeometryBufferDescription {
    fn area(&self) -> Area {
        self.area
    }

    fn attachments(&self) -> Vec<AttachmentSpec> {
        let mut specs = vec![
            AttachmentSpec::color("albedo_emissive", TextureFormat::Rgba8),
            AttachmentSpec::color("normal", TextureFormat::Rg16f),
        ];
        if self.components == GeometryBufferComponents::Full {
            specs.push(AttachmentSpec::color("specular", TextureFormat::Rgba8));
        }
        specs.push(AttachmentSpec::depth("depth_stencil", TextureFormat::Depth24Stencil8));
        specs
    }
}

bitflags::bitflags! {
    /// Outputs of a light buffer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LightBufferComponents: u8 {
        /// Diffuse light
        const DIFFUSE = 0b01;
        /// Specular light
        const SPECULAR = 0b10;
    }
}

impl Default for LightBufferComponents {
    fn default() -> Self {
        Self::all()
    }
}

/// Description of a light accumulation buffer.
///
/// An empty component set yields a depth-only target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightBufferDescription {
    /// Size
    pub area: Area,
    /// Outputs
    pub components: LightBufferComponents,
}

impl LightBufferDescription {
    /// A diffuse and specular light buffer
    pub fn new(area: Area) -> Self {
        Self {
            area,
            components: LightBufferComponents::all(),
        }
    }

    /// Set the outputs
    pub const fn with_components(mut self, components: LightBufferComponents) -> Self {
        self.components = components;
        self
    }
}

impl RenderTargetDescription for LightBufferDescription {
    fn area(&self) -> Area {
        self.area
    }

    fn attachments(&self) -> Vec<AttachmentSpec> {
        let mut specs = Vec::with_capacity(3);
        if self.components.contains(LightBufferComponents::DIFFUSE) {
            specs.push(AttachmentSpec::color("diffuse", TextureFormat::Rgba8));
        }
        if self.components.contains(LightBufferComponents::SPECULAR) {
            specs.push(AttachmentSpec::color("specular", TextureFormat::Rgba8));
        }
        specs.push(AttachmentSpec::depth("depth_stencil", TextureFormat::Depth24Stencil8));
        specs
    }
}

/// Description of a plain color image buffer with optional depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBufferDescription {
    /// Size
    pub area: Area,
    /// Whether a depth-stencil attachment is created
    pub depth: bool,
}

impl ImageBufferDescription {
    /// An image buffer with a depth attachment
    pub const fn new(area: Area) -> Self {
        Self { area, depth: true }
    }

    /// Drop the depth attachment
    pub const fn without_depth(mut self) -> Self {
        self.depth = false;
        self
    }
}

impl RenderTargetDescription for ImageBufferDescription {
    fn area(&self) -> Area {
        self.area
    }

    fn attachments(&self) -> Vec<AttachmentSpec> {
        let mut specs = vec![AttachmentSpec::color("image", TextureFormat::Rgba8)];
        if self.depth {
            specs.push(AttachmentSpec::depth("depth_stencil", TextureFormat::Depth24Stencil8));
        }
        specs
    }
}

/// Storage precision of the variance moments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VariancePrecision {
    /// Two 16-bit floats
    #[default]
    Half,
    /// Two 32-bit floats
    Full,
}

/// Description of a variance shadow map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthVarianceBufferDescription {
    /// Size
    pub area: Area,
    /// Moment precision
    pub precision: VariancePrecision,
    /// Sampling filter for the moments
    pub filter: FilterMode,
}

impl DepthVarianceBufferDescription {
    /// A half-precision, linearly filtered shadow map
    pub const fn new(area: Area) -> Self {
        Self {
            area,
            precision: VariancePrecision::Half,
            filter: FilterMode::Linear,
        }
    }

    /// Set the moment precision
    pub const fn with_precision(mut self, precision: VariancePrecision) -> Self {
        self.precision = precision;
        self
    }
}

impl RenderTargetDescription for DepthVarianceBufferDescription {
    fn area(&self) -> Area {
        self.area
    }

    fn attachments(&self) -> Vec<AttachmentSpec> {
        let format = match self.precision {
            VariancePrecision::Half => TextureFormat::Rg16f,
            VariancePrecision::Full => TextureFormat::Rg32f,
        };
        let mut moments = AttachmentSpec::color("variance", format);
        moments.filter = self.filter;
        vec![
            moments,
            AttachmentSpec::depth("depth", TextureFormat::Depth32f),
        ]
    }
}

/// Description of an ambient occlusion buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmbientOcclusionBufferDescription {
    /// Size
    pub area: Area,
}

impl AmbientOcclusionBufferDescription {
    /// Create a description
    pub const fn new(area: Area) -> Self {
        Self { area }
    }
}

impl RenderTargetDescription for AmbientOcclusionBufferDescription {
    fn area(&self) -> Area {
        self.area
    }

    fn attachments(&self) -> Vec<AttachmentSpec> {
        vec![AttachmentSpec::color("occlusion", TextureFormat::R8)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_descriptions_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(GeometryBufferDescription::new(Area::new(640, 480)));
        set.insert(GeometryBufferDescription::new(Area::new(640, 480)));
        set.insert(
            GeometryBufferDescription::new(Area::new(640, 480))
                .with_components(GeometryBufferComponents::NoSpecular),
        );
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_geometry_attachments() {
        let full = GeometryBufferDescription::new(Area::new(4, 4));
        let names: Vec<_> = full.attachments().iter().map(|a| a.name).collect();
        assert_eq!(names, ["albedo_emissive", "normal", "specular", "depth_stencil"]);

        let slim = full.with_components(GeometryBufferComponents::NoSpecular);
        assert_eq!(slim.attachments().len(), 3);
        assert!(slim.estimated_bytes() < full.estimated_bytes());
    }

    #[test]
    fn test_light_components() {
        let area = Area::new(2, 2);
        let both = LightBufferDescription::new(area);
        assert_eq!(both.attachments().len(), 3);

        let diffuse = both.with_components(LightBufferComponents::DIFFUSE);
        let names: Vec<_> = diffuse.attachments().iter().map(|a| a.name).collect();
        assert_eq!(names, ["diffuse", "depth_stencil"]);

        let depth_only = both.with_components(LightBufferComponents::empty());
        assert_eq!(depth_only.attachments().len(), 1);
    }

    #[test]
    fn test_estimated_bytes() {
        let ao = AmbientOcclusionBufferDescription::new(Area::new(100, 10));
        assert_eq!(ao.estimated_bytes(), 1000);

        let image = ImageBufferDescription::new(Area::new(10, 10));
        assert_eq!(image.estimated_bytes(), 400 + 400);
        assert_eq!(image.without_depth().estimated_bytes(), 400);

        let variance = DepthVarianceBufferDescription::new(Area::new(10, 10))
            .with_precision(VariancePrecision::Full);
        assert_eq!(variance.estimated_bytes(), 800 + 400);
    }
}
