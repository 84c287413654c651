//! Fixed-function state of a render pipeline.

use crate::types::{CompareFunction, TextureFormat};

/// How vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Winding that counts as front-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

/// Which triangle faces are culled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveState {
    pub topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
    /// Keep fragments outside the `[0, 1]` depth range instead of clipping
    /// them. Requires [`Features::DEPTH_CLIP_CONTROL`](crate::Features::DEPTH_CLIP_CONTROL).
    pub unclipped_depth: bool,
}

impl PrimitiveState {
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }
}

/// Operation applied to the stencil value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOperation {
    #[default]
    Keep,
    Zero,
    Replace,
    Invert,
    IncrementClamp,
    DecrementClamp,
    IncrementWrap,
    DecrementWrap,
}

impl StencilOperation {
    pub(crate) fn apply(self, value: u32, reference: u32, write_mask: u32) -> u32 {
        let result = match self {
            Self::Keep => value,
            Self::Zero => 0,
            Self::Replace => reference,
            Self::Invert => !value,
            Self::IncrementClamp => (value + 1).min(0xff),
            Self::DecrementClamp => value.saturating_sub(1),
            Self::IncrementWrap => (value + 1) & 0xff,
            Self::DecrementWrap => value.wrapping_sub(1) & 0xff,
        };
        ((value & !write_mask) | (result & write_mask)) & 0xff
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub compare: CompareFunction,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
}

impl StencilFaceState {
    pub const IGNORE: Self = Self {
        compare: CompareFunction::Always,
        fail_op: StencilOperation::Keep,
        depth_fail_op: StencilOperation::Keep,
        pass_op: StencilOperation::Keep,
    };

    pub(crate) fn writes(&self) -> bool {
        [self.fail_op, self.depth_fail_op, self.pass_op]
            .iter()
            .any(|op| *op != StencilOperation::Keep)
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.compare != CompareFunction::Always || self.writes()
    }
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self::IGNORE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub front: StencilFaceState,
    pub back: StencilFaceState,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            front: StencilFaceState::IGNORE,
            back: StencilFaceState::IGNORE,
            read_mask: 0xff,
            write_mask: 0xff,
        }
    }
}

impl StencilState {
    pub(crate) fn is_enabled(&self) -> bool {
        self.front.is_enabled() || self.back.is_enabled()
    }
}

/// Depth and stencil test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub stencil: StencilState,
}

impl DepthStencilState {
    /// Depth test `compare` with writes enabled and stencil ignored.
    pub fn depth(format: TextureFormat, compare: CompareFunction) -> Self {
        Self {
            format,
            depth_write_enabled: true,
            depth_compare: compare,
            stencil: StencilState::default(),
        }
    }

    pub fn with_stencil(mut self, stencil: StencilState) -> Self {
        self.stencil = stencil;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturated,
    Constant,
    OneMinusConstant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOperation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blend equation of the color or alpha channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl BlendComponent {
    pub const REPLACE: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
        operation: BlendOperation::Add,
    };

    pub const OVER: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
        operation: BlendOperation::Add,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub const REPLACE: Self = Self {
        color: BlendComponent::REPLACE,
        alpha: BlendComponent::REPLACE,
    };

    pub const ALPHA_BLENDING: Self = Self {
        color: BlendComponent {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponent::OVER,
    };

    pub const PREMULTIPLIED_ALPHA_BLENDING: Self = Self {
        color: BlendComponent::OVER,
        alpha: BlendComponent::OVER,
    };

    /// Blends `src` over `dst` with blend constant `constant`.
    pub(crate) fn apply(&self, src: [f32; 4], dst: [f32; 4], constant: [f32; 4]) -> [f32; 4] {
        let factor = |factor: BlendFactor, channel: usize| -> f32 {
            match factor {
                BlendFactor::Zero => 0.0,
                BlendFactor::One => 1.0,
                BlendFactor::Src => src[channel],
                BlendFactor::OneMinusSrc => 1.0 - src[channel],
                BlendFactor::SrcAlpha => src[3],
                BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
                BlendFactor::Dst => dst[channel],
                BlendFactor::OneMinusDst => 1.0 - dst[channel],
                BlendFactor::DstAlpha => dst[3],
                BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
                BlendFactor::SrcAlphaSaturated => {
                    if channel == 3 {
                        1.0
                    } else {
                        src[3].min(1.0 - dst[3])
                    }
                }
                BlendFactor::Constant => constant[channel],
                BlendFactor::OneMinusConstant => 1.0 - constant[channel],
            }
        };
        std::array::from_fn(|channel| {
            let component = if channel == 3 { &self.alpha } else { &self.color };
            let s = src[channel] * factor(component.src_factor, channel);
            let d = dst[channel] * factor(component.dst_factor, channel);
            match component.operation {
                BlendOperation::Add => s + d,
                BlendOperation::Subtract => s - d,
                BlendOperation::ReverseSubtract => d - s,
                BlendOperation::Min => src[channel].min(dst[channel]),
                BlendOperation::Max => src[channel].max(dst[channel]),
            }
        })
    }
}

bitflags::bitflags! {
    /// Channels written to a color target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u32 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const COLOR = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
        const ALL = Self::COLOR.bits() | Self::ALPHA.bits();
    }
}

impl Default for ColorWrites {
    fn default() -> Self {
        Self::ALL
    }
}

/// Format, blending and write mask of one color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
    pub write_mask: ColorWrites,
}

impl ColorTargetState {
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            blend: None,
            write_mask: ColorWrites::ALL,
        }
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn with_write_mask(mut self, write_mask: ColorWrites) -> Self {
        self.write_mask = write_mask;
        self
    }
}

impl From<TextureFormat> for ColorTargetState {
    fn from(format: TextureFormat) -> Self {
        Self::new(format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultisampleState {
    /// Samples per pixel: 1 or 4.
    pub count: u32,
    pub mask: u64,
    pub alpha_to_coverage_enabled: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        }
    }
}

impl MultisampleState {
    pub fn with_count(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StencilOperation::Keep, 5, 5)]
    #[case(StencilOperation::Zero, 5, 0)]
    #[case(StencilOperation::Replace, 5, 9)]
    #[case(StencilOperation::Invert, 0x0f, 0xf0)]
    #[case(StencilOperation::IncrementClamp, 0xff, 0xff)]
    #[case(StencilOperation::IncrementWrap, 0xff, 0)]
    #[case(StencilOperation::DecrementClamp, 0, 0)]
    #[case(StencilOperation::DecrementWrap, 0, 0xff)]
    fn test_stencil_ops(#[case] op: StencilOperation, #[case] value: u32, #[case] expected: u32) {
        assert_eq!(op.apply(value, 9, 0xff), expected);
    }

    #[test]
    fn test_stencil_write_mask() {
        assert_eq!(StencilOperation::Replace.apply(0xf0, 0x0f, 0x03), 0xf3);
    }

    #[test]
    fn test_alpha_blending() {
        let out = BlendState::ALPHA_BLENDING.apply([1.0, 0.0, 0.0, 0.5], [0.0, 0.0, 1.0, 1.0], [0.0; 4]);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
        let replaced = BlendState::REPLACE.apply([0.2, 0.4, 0.6, 0.8], [1.0; 4], [0.0; 4]);
        assert_eq!(replaced, [0.2, 0.4, 0.6, 0.8]);
    }

    #[test]
    fn test_stencil_enabled() {
        assert!(!StencilState::default().is_enabled());
        let mut stencil = StencilState::default();
        stencil.front.pass_op = StencilOperation::Replace;
        assert!(stencil.is_enabled());
    }
}
