//! Texture types, descriptors and the texel codecs used by copies.

use super::Extent3d;
use bitflags::bitflags;

/// Row pitch of every buffer/texture copy must be a multiple of this many
/// bytes.
///
/// Uploads of tightly packed images pad each row up to this alignment, see
/// [`padded_bytes_per_row`].
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = 256;

/// Row pitch for a copy of `width` texels of `format`, rounded up to
/// [`COPY_BYTES_PER_ROW_ALIGNMENT`].
pub fn padded_bytes_per_row(width: u32, format: TextureFormat) -> u32 {
    let unpadded = width * format.block_size();
    unpadded.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,
    /// 32-bit red channel, float.
    R32Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,
    /// 32-bit RG channels, float.
    Rg32Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth.
    Depth24Plus,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth, float.
    Depth32Float,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth24Plus | Self::Depth24PlusStencil8 | Self::Depth32Float
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }

    /// Returns true if the format stores color in the sRGB transfer curve.
    pub fn is_srgb(&self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    /// Returns the size in bytes per texel in buffer copies.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24Plus
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rg32Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Returns true if the format may take part in buffer/texture copies.
    ///
    /// The packed 24-bit depth formats have no defined byte layout.
    pub fn is_copyable(&self) -> bool {
        !matches!(self, Self::Depth24Plus | Self::Depth24PlusStencil8)
    }

    /// Writes one texel into `out` (exactly [`block_size`](Self::block_size)
    /// bytes). Depth formats read depth from component 0 and stencil from
    /// component 1.
    pub fn encode_texel(&self, texel: [f32; 4], out: &mut [u8]) {
        let [r, g, b, a] = texel;
        match self {
            Self::R8Unorm => out[0] = unorm8(r),
            Self::Rg8Unorm => {
                out[0] = unorm8(r);
                out[1] = unorm8(g);
            }
            Self::Rgba8Unorm => out[..4].copy_from_slice(&[unorm8(r), unorm8(g), unorm8(b), unorm8(a)]),
            Self::Rgba8UnormSrgb => out[..4].copy_from_slice(&[
                unorm8(linear_to_srgb(r)),
                unorm8(linear_to_srgb(g)),
                unorm8(linear_to_srgb(b)),
                unorm8(a),
            ]),
            Self::Bgra8Unorm => out[..4].copy_from_slice(&[unorm8(b), unorm8(g), unorm8(r), unorm8(a)]),
            Self::Bgra8UnormSrgb => out[..4].copy_from_slice(&[
                unorm8(linear_to_srgb(b)),
                unorm8(linear_to_srgb(g)),
                unorm8(linear_to_srgb(r)),
                unorm8(a),
            ]),
            Self::R32Float => out[..4].copy_from_slice(&r.to_le_bytes()),
            Self::Rg32Float => {
                out[..4].copy_from_slice(&r.to_le_bytes());
                out[4..8].copy_from_slice(&g.to_le_bytes());
            }
            Self::Rgba32Float => {
                for (chunk, value) in out[..16].chunks_exact_mut(4).zip(texel) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
            Self::Depth16Unorm => {
                let depth = (r.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16;
                out[..2].copy_from_slice(&depth.to_le_bytes());
            }
            Self::Depth24Plus | Self::Depth24PlusStencil8 => {
                let depth = (r.clamp(0.0, 1.0) * 0x00ff_ffff as f32).round() as u32;
                let stencil = (g as u32 & 0xff) << 24;
                out[..4].copy_from_slice(&(depth | stencil).to_le_bytes());
            }
            Self::Depth32Float => out[..4].copy_from_slice(&r.to_le_bytes()),
        }
    }

    /// Reads one texel from `bytes`. Missing color channels read as
    /// `(0, 0, 0, 1)`.
    pub fn decode_texel(&self, bytes: &[u8]) -> [f32; 4] {
        let f32_at = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        match self {
            Self::R8Unorm => [from_unorm8(bytes[0]), 0.0, 0.0, 1.0],
            Self::Rg8Unorm => [from_unorm8(bytes[0]), from_unorm8(bytes[1]), 0.0, 1.0],
            Self::Rgba8Unorm => [
                from_unorm8(bytes[0]),
                from_unorm8(bytes[1]),
                from_unorm8(bytes[2]),
                from_unorm8(bytes[3]),
            ],
            Self::Rgba8UnormSrgb => [
                srgb_to_linear(from_unorm8(bytes[0])),
                srgb_to_linear(from_unorm8(bytes[1])),
                srgb_to_linear(from_unorm8(bytes[2])),
                from_unorm8(bytes[3]),
            ],
            Self::Bgra8Unorm => [
                from_unorm8(bytes[2]),
                from_unorm8(bytes[1]),
                from_unorm8(bytes[0]),
                from_unorm8(bytes[3]),
            ],
            Self::Bgra8UnormSrgb => [
                srgb_to_linear(from_unorm8(bytes[2])),
                srgb_to_linear(from_unorm8(bytes[1])),
                srgb_to_linear(from_unorm8(bytes[0])),
                from_unorm8(bytes[3]),
            ],
            Self::R32Float => [f32_at(0), 0.0, 0.0, 1.0],
            Self::Rg32Float => [f32_at(0), f32_at(4), 0.0, 1.0],
            Self::Rgba32Float => [f32_at(0), f32_at(4), f32_at(8), f32_at(12)],
            Self::Depth16Unorm => {
                let depth = u16::from_le_bytes([bytes[0], bytes[1]]);
                [depth as f32 / u16::MAX as f32, 0.0, 0.0, 0.0]
            }
            Self::Depth24Plus | Self::Depth24PlusStencil8 => {
                let packed = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let depth = (packed & 0x00ff_ffff) as f32 / 0x00ff_ffff as f32;
                [depth, (packed >> 24) as f32, 0.0, 0.0]
            }
            Self::Depth32Float => [f32_at(0), 0.0, 0.0, 0.0],
        }
    }

    /// Rounds a texel to the precision the format stores.
    pub fn quantize(&self, texel: [f32; 4]) -> [f32; 4] {
        let mut bytes = [0u8; 16];
        self.encode_texel(texel, &mut bytes);
        let mut decoded = self.decode_texel(&bytes);
        if self.is_depth_stencil() {
            decoded[1] = texel[1];
        }
        decoded
    }
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn from_unorm8(value: u8) -> f32 {
    value as f32 / 255.0
}

fn linear_to_srgb(value: f32) -> f32 {
    let value = value.clamp(0.0, 1.0);
    if value <= 0.003_130_8 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.040_45 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Size of the texture; `depth` counts array layers.
    pub size: Extent3d,
    /// Sample count for multisampling.
    pub sample_count: u32,
    /// Texture format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            sample_count: 1,
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the number of array layers.
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.size.depth = layers;
        self
    }

    /// Set the sample count for multisampling.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            sample_count: 1,
            format: TextureFormat::default(),
            usage: TextureUsage::empty(),
        }
    }
}

/// Descriptor for a view over a layer range of a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureViewDescriptor {
    pub label: Option<String>,
    pub base_layer: u32,
    /// `None` covers every layer from `base_layer` to the end.
    pub layer_count: Option<u32>,
}

impl Default for TextureViewDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            base_layer: 0,
            layer_count: None,
        }
    }
}

impl TextureViewDescriptor {
    /// A view over exactly one layer.
    pub fn layer(layer: u32) -> Self {
        Self {
            label: None,
            base_layer: layer,
            layer_count: Some(1),
        }
    }
}
