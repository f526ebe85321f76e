//! Texture descriptions understood by the device facade

use super::TextureId;

/// Pixel formats for 2D textures and render target attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, normalized
    Rgba8,
    /// 16-bit float RGBA
    Rgba16f,
    /// 8-bit RG, normalized (compressed normals)
    Rg8,
    /// 16-bit float RG
    Rg16f,
    /// 32-bit float RG (depth moments)
    Rg32f,
    /// 16-bit float single channel
    R16f,
    /// 8-bit single channel
    R8,
    /// 24-bit depth with 8-bit stencil
    Depth24Stencil8,
    /// 32-bit float depth
    Depth32f,
}

impl TextureFormat {
    /// Storage cost of one texel in bytes
    pub const fn bytes_per_texel(self) -> u64 {
        match self {
            Self::R8 => 1,
            Self::Rg8 | Self::R16f => 2,
            Self::Rgba8 | Self::Rg16f | Self::Depth24Stencil8 | Self::Depth32f => 4,
            Self::Rgba16f | Self::Rg32f => 8,
        }
    }

    /// Whether this format carries depth (and possibly stencil) data
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Stencil8 | Self::Depth32f)
    }
}

/// Texture filtering modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Nearest neighbor filtering
    Nearest,
    /// Linear filtering
    Linear,
}

/// Texture wrapping modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    /// Repeat the texture
    Repeat,
    /// Mirror the texture
    MirroredRepeat,
    /// Clamp to edge
    ClampToEdge,
}

/// Everything needed to allocate a 2D texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture2DParams {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Storage format
    pub format: TextureFormat,
    /// Wrapping on the S axis
    pub wrap_s: WrapMode,
    /// Wrapping on the T axis
    pub wrap_t: WrapMode,
    /// Minification filter
    pub min_filter: FilterMode,
    /// Magnification filter
    pub mag_filter: FilterMode,
}

impl Texture2DParams {
    /// Parameters suitable for a render target attachment: clamped, nearest
    pub const fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
        }
    }

    /// Set the filters for both directions
    pub const fn with_filter(mut self, filter: FilterMode) -> Self {
        self.min_filter = filter;
        self.mag_filter = filter;
        self
    }

    /// Set the wrap mode for both axes
    pub const fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap_s = wrap;
        self.wrap_t = wrap;
        self
    }

    /// Bytes needed to store the texture
    pub const fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_texel()
    }
}

/// A live (or formerly live) 2D texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture2D {
    /// Device handle
    pub id: TextureId,
    /// The parameters it was allocated with
    pub params: Texture2DParams,
}

impl Texture2D {
    /// Bytes used by the texture
    pub const fn byte_size(&self) -> u64 {
        self.params.byte_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size() {
        let params = Texture2DParams::render_target(640, 480, TextureFormat::Rgba16f);
        assert_eq!(params.byte_size(), 640 * 480 * 8);

        let depth = Texture2DParams::render_target(2, 2, TextureFormat::Depth24Stencil8);
        assert_eq!(depth.byte_size(), 16);
        assert!(depth.format.is_depth());
    }

    #[test]
    fn test_builders() {
        let params = Texture2DParams::render_target(1, 1, TextureFormat::R8)
            .with_filter(FilterMode::Linear)
            .with_wrap(WrapMode::Repeat);
        assert_eq!(params.min_filter, FilterMode::Linear);
        assert_eq!(params.mag_filter, FilterMode::Linear);
        assert_eq!(params.wrap_s, WrapMode::Repeat);
        assert_eq!(params.wrap_t, WrapMode::Repeat);
    }
}
