//! Native stage kernels executed by the software backend.
//!
//! A kernel is the executable half of a [`ShaderModule`](super::ShaderModule).
//! The execution engine passes every per-invocation value explicitly: the
//! vertex and instance index arrive in an [`InvocationContext`], attribute
//! data in a [`VertexInput`], and bound buffers, textures and samplers through
//! [`ShaderResources`].

use bytemuck::Pod;

use crate::resources::TexelStorage;
use crate::types::SamplerDescriptor;

/// Highest vertex attribute location plus one.
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
/// Highest varying location plus one.
pub const MAX_VARYINGS: usize = 8;
/// Maximum number of color attachments in a render pass.
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// The implicit indices of one vertex stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InvocationContext {
    /// Index of the vertex, after index buffer lookup and `base_vertex`.
    pub vertex_index: u32,
    /// Index of the instance, starting at `first_instance`.
    pub instance_index: u32,
}

/// Fetched vertex attributes, indexed by shader location.
///
/// Attributes narrower than four components are extended with `(0, 0, 0, 1)`;
/// integer formats are converted to `f32` by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexInput {
    attributes: [[f32; 4]; MAX_VERTEX_ATTRIBUTES],
}

impl Default for VertexInput {
    fn default() -> Self {
        Self {
            attributes: [[0.0, 0.0, 0.0, 1.0]; MAX_VERTEX_ATTRIBUTES],
        }
    }
}

impl VertexInput {
    pub fn location(&self, location: u32) -> [f32; 4] {
        self.attributes
            .get(location as usize)
            .copied()
            .unwrap_or([0.0, 0.0, 0.0, 1.0])
    }

    pub(crate) fn set(&mut self, location: u32, value: [f32; 4]) {
        if let Some(slot) = self.attributes.get_mut(location as usize) {
            *slot = value;
        }
    }
}

/// Per-vertex stage results: clip-space position and varyings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexOutput {
    pub position: [f32; 4],
    pub varyings: [[f32; 4]; MAX_VARYINGS],
}

impl VertexOutput {
    pub fn new(position: [f32; 4]) -> Self {
        Self {
            position,
            varyings: [[0.0; 4]; MAX_VARYINGS],
        }
    }

    pub fn with_varying(mut self, location: u32, value: [f32; 4]) -> Self {
        if let Some(slot) = self.varyings.get_mut(location as usize) {
            *slot = value;
        }
        self
    }
}

/// Inputs of one fragment stage invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentInput {
    /// Window-space `(x, y)` of the sample location, depth and `1 / w`.
    pub frag_coord: [f32; 4],
    pub front_facing: bool,
    /// Perspective-correct interpolated varyings.
    pub varyings: [[f32; 4]; MAX_VARYINGS],
}

impl FragmentInput {
    pub fn varying(&self, location: u32) -> [f32; 4] {
        self.varyings.get(location as usize).copied().unwrap_or([0.0; 4])
    }
}

/// Per-fragment stage results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentOutput {
    colors: [[f32; 4]; MAX_COLOR_ATTACHMENTS],
    discarded: bool,
}

impl FragmentOutput {
    /// Writes `color` to color target 0.
    pub fn color(color: [f32; 4]) -> Self {
        Self {
            colors: [color; MAX_COLOR_ATTACHMENTS],
            discarded: false,
        }
    }

    /// Skips every write for this fragment.
    pub fn discard() -> Self {
        Self {
            colors: [[0.0; 4]; MAX_COLOR_ATTACHMENTS],
            discarded: true,
        }
    }

    pub fn with_target(mut self, target: usize, color: [f32; 4]) -> Self {
        if let Some(slot) = self.colors.get_mut(target) {
            *slot = color;
        }
        self
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    pub fn target(&self, target: usize) -> [f32; 4] {
        self.colors.get(target).copied().unwrap_or([0.0; 4])
    }
}

/// Vertex stage entry point.
pub trait VertexKernel: Send + Sync + 'static {
    fn run(&self, ctx: InvocationContext, input: &VertexInput, resources: &ShaderResources<'_>) -> VertexOutput;
}

/// Fragment stage entry point.
pub trait FragmentKernel: Send + Sync + 'static {
    fn run(&self, input: &FragmentInput, resources: &ShaderResources<'_>) -> FragmentOutput;
}

/// Adapter turning a closure into a [`VertexKernel`], see [`vertex_fn`].
pub struct VertexFn<F>(F);

/// Adapter turning a closure into a [`FragmentKernel`], see [`fragment_fn`].
pub struct FragmentFn<F>(F);

/// Wraps a closure as a vertex kernel.
pub fn vertex_fn<F>(f: F) -> VertexFn<F>
where
    F: Fn(InvocationContext, &VertexInput, &ShaderResources<'_>) -> VertexOutput + Send + Sync + 'static,
{
    VertexFn(f)
}

/// Wraps a closure as a fragment kernel.
pub fn fragment_fn<F>(f: F) -> FragmentFn<F>
where
    F: Fn(&FragmentInput, &ShaderResources<'_>) -> FragmentOutput + Send + Sync + 'static,
{
    FragmentFn(f)
}

impl<F> VertexKernel for VertexFn<F>
where
    F: Fn(InvocationContext, &VertexInput, &ShaderResources<'_>) -> VertexOutput + Send + Sync + 'static,
{
    fn run(&self, ctx: InvocationContext, input: &VertexInput, resources: &ShaderResources<'_>) -> VertexOutput {
        (self.0)(ctx, input, resources)
    }
}

impl<F> FragmentKernel for FragmentFn<F>
where
    F: Fn(&FragmentInput, &ShaderResources<'_>) -> FragmentOutput + Send + Sync + 'static,
{
    fn run(&self, input: &FragmentInput, resources: &ShaderResources<'_>) -> FragmentOutput {
        (self.0)(input, resources)
    }
}

/// A resource visible to kernels during one draw.
#[derive(Clone, Copy)]
pub(crate) enum ResourceRef<'a> {
    Buffer(&'a [u8]),
    Texture { storage: &'a TexelStorage, base_layer: u32 },
    Sampler(&'a SamplerDescriptor),
}

#[derive(Clone, Copy)]
pub(crate) struct BoundResource<'a> {
    pub group: u32,
    pub binding: u32,
    pub resource: ResourceRef<'a>,
}

/// The resources bound for the current draw, addressed by `(group, binding)`.
#[derive(Clone, Copy)]
pub struct ShaderResources<'a> {
    bindings: &'a [BoundResource<'a>],
}

impl<'a> ShaderResources<'a> {
    pub(crate) fn new(bindings: &'a [BoundResource<'a>]) -> Self {
        Self { bindings }
    }

    /// An empty resource set, for calling kernels outside a draw.
    pub fn empty() -> Self {
        Self { bindings: &[] }
    }

    fn find(&self, group: u32, binding: u32) -> Option<ResourceRef<'a>> {
        self.bindings
            .iter()
            .find(|bound| bound.group == group && bound.binding == binding)
            .map(|bound| bound.resource)
    }

    /// The bound byte range of a uniform or storage buffer.
    pub fn buffer(&self, group: u32, binding: u32) -> Option<&'a [u8]> {
        match self.find(group, binding)? {
            ResourceRef::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Reads a `T` from the start of a bound buffer.
    pub fn uniform<T: Pod>(&self, group: u32, binding: u32) -> Option<T> {
        self.element(group, binding, 0)
    }

    /// Reads element `index` of a bound buffer viewed as an array of `T`.
    pub fn element<T: Pod>(&self, group: u32, binding: u32, index: usize) -> Option<T> {
        let bytes = self.buffer(group, binding)?;
        let size = std::mem::size_of::<T>();
        let start = index.checked_mul(size)?;
        let slice = bytes.get(start..start.checked_add(size)?)?;
        Some(bytemuck::pod_read_unaligned(slice))
    }

    /// Filters a bound texture with a bound sampler at normalized `uv`.
    pub fn sample(&self, texture: (u32, u32), sampler: (u32, u32), uv: [f32; 2]) -> Option<[f32; 4]> {
        let (storage, base_layer) = match self.find(texture.0, texture.1)? {
            ResourceRef::Texture { storage, base_layer } => (storage, base_layer),
            _ => return None,
        };
        let sampler = match self.find(sampler.0, sampler.1)? {
            ResourceRef::Sampler(descriptor) => descriptor,
            _ => return None,
        };
        Some(storage.sample(base_layer, sampler, uv))
    }

    /// Reads one texel of a bound texture without filtering.
    pub fn load(&self, texture: (u32, u32), x: u32, y: u32) -> Option<[f32; 4]> {
        match self.find(texture.0, texture.1)? {
            ResourceRef::Texture { storage, base_layer } => storage.load(x, y, base_layer),
            _ => None,
        }
    }
}
