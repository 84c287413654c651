//! Vertex buffer layouts.
//!
//! Each vertex buffer is bound to a slot (0, 1, 2, ...) matching its index in
//! [`VertexState::buffers`](super::VertexState::buffers). Attributes name the
//! shader location they feed.
//!
//! # Example
//!
//! ```ignore
//! // Interleaved position (vec4) + color (vec4) + uv (vec2), 40-byte stride.
//! let layout = VertexBufferLayout::new(40)
//!     .with_attribute(VertexFormat::Float32x4, 0, 0)
//!     .with_attribute(VertexFormat::Float32x4, 16, 1)
//!     .with_attribute(VertexFormat::Float32x2, 32, 2);
//! ```

use crate::shader::NumericClass;

/// Format of one vertex attribute in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Sint32,
    Sint32x2,
    Sint32x3,
    Sint32x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
    Unorm8x4,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub fn size(&self) -> u64 {
        self.components() as u64 * if matches!(self, Self::Unorm8x4) { 1 } else { 4 }
    }

    pub fn components(&self) -> u32 {
        match self {
            Self::Float32 | Self::Sint32 | Self::Uint32 => 1,
            Self::Float32x2 | Self::Sint32x2 | Self::Uint32x2 => 2,
            Self::Float32x3 | Self::Sint32x3 | Self::Uint32x3 => 3,
            Self::Float32x4 | Self::Sint32x4 | Self::Uint32x4 | Self::Unorm8x4 => 4,
        }
    }

    pub fn class(&self) -> NumericClass {
        match self {
            Self::Float32 | Self::Float32x2 | Self::Float32x3 | Self::Float32x4 | Self::Unorm8x4 => {
                NumericClass::Float
            }
            Self::Sint32 | Self::Sint32x2 | Self::Sint32x3 | Self::Sint32x4 => NumericClass::Sint,
            Self::Uint32 | Self::Uint32x2 | Self::Uint32x3 | Self::Uint32x4 => NumericClass::Uint,
        }
    }

    /// Decodes one attribute, extending missing components with `(0, 0, 0, 1)`.
    pub(crate) fn decode(&self, bytes: &[u8]) -> [f32; 4] {
        let mut value = [0.0, 0.0, 0.0, 1.0];
        let word = |i: usize| [bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]];
        for (i, slot) in value.iter_mut().enumerate().take(self.components() as usize) {
            *slot = if matches!(self, Self::Unorm8x4) {
                bytes[i] as f32 / 255.0
            } else {
                match self.class() {
                    NumericClass::Float => f32::from_le_bytes(word(i)),
                    NumericClass::Sint => i32::from_le_bytes(word(i)) as f32,
                    NumericClass::Uint => u32::from_le_bytes(word(i)) as f32,
                }
            };
        }
        value
    }
}

/// How the attribute address advances between invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    /// Advance once per vertex.
    #[default]
    Vertex,
    /// Advance once per instance.
    Instance,
}

/// One attribute read from a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    /// Byte offset within one stride.
    pub offset: u64,
    pub shader_location: u32,
}

/// Layout of one vertex buffer slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    pub fn new(array_stride: u64) -> Self {
        Self {
            array_stride,
            step_mode: VertexStepMode::Vertex,
            attributes: Vec::new(),
        }
    }

    pub fn per_instance(array_stride: u64) -> Self {
        Self {
            step_mode: VertexStepMode::Instance,
            ..Self::new(array_stride)
        }
    }

    pub fn with_attribute(mut self, format: VertexFormat, offset: u64, shader_location: u32) -> Self {
        self.attributes.push(VertexAttribute {
            format,
            offset,
            shader_location,
        });
        self
    }

    /// Bytes one element needs: the end of the farthest attribute.
    pub(crate) fn element_span(&self) -> u64 {
        self.attributes
            .iter()
            .map(|attribute| attribute.offset + attribute.format.size())
            .max()
            .unwrap_or(0)
    }

    /// Bytes a buffer bound to this slot must hold for `count` elements
    /// starting at element `first`.
    pub(crate) fn required_size(&self, first: u32, count: u32) -> u64 {
        if count == 0 || self.attributes.is_empty() {
            return 0;
        }
        (first as u64 + count as u64 - 1) * self.array_stride + self.element_span()
    }
}
