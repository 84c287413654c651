//! Pipeline Builder: immutable render pipeline state objects.
//!
//! A [`RenderPipeline`] bundles the vertex and fragment stages, vertex buffer
//! layouts, primitive assembly, depth/stencil, blending and multisample state
//! with the [`PipelineLayout`] it expects at draw time. It is built once by
//! [`GraphicsDevice::create_render_pipeline`](crate::GraphicsDevice::create_render_pipeline),
//! which validates the whole bundle and fails instead of producing a pipeline
//! that could only misbehave later:
//!
//! - vertex attributes fit within their stride; locations are unique; every
//!   vertex input the shader consumes is provided with a compatible format
//! - sample count is 1 or 4; color targets use color formats; the depth
//!   state uses a depth format; every fragment output has a color target
//! - every resource the stages consume exists in the layout with the same
//!   binding type and a visibility that includes the stage
//!
//! Compatibility with the attachments of a render pass is checked when the
//! pipeline is set on the pass.

mod layout;
mod state;
mod vertex;

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::GraphicsError;
use crate::instance::{Features, Limits};
use crate::shader::{ShaderModule, ShaderStage, MAX_COLOR_ATTACHMENTS, MAX_VARYINGS};

pub use layout::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindingLayoutEntry, BindingType, PipelineLayout,
    PipelineLayoutDescriptor, ShaderStageFlags,
};
pub use state::{
    BlendComponent, BlendFactor, BlendOperation, BlendState, ColorTargetState, ColorWrites, CullMode,
    DepthStencilState, FrontFace, MultisampleState, PrimitiveState, PrimitiveTopology, StencilFaceState,
    StencilOperation, StencilState,
};
pub use vertex::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

/// Sample counts accepted by pipelines and textures.
pub const SUPPORTED_SAMPLE_COUNTS: [u32; 2] = [1, 4];

/// Vertex stage and the buffers it reads.
#[derive(Debug, Clone)]
pub struct VertexState {
    pub module: Arc<ShaderModule>,
    pub buffers: Vec<VertexBufferLayout>,
}

impl VertexState {
    pub fn new(module: &Arc<ShaderModule>) -> Self {
        Self {
            module: module.clone(),
            buffers: Vec::new(),
        }
    }

    pub fn with_buffer(mut self, layout: VertexBufferLayout) -> Self {
        self.buffers.push(layout);
        self
    }
}

/// Fragment stage and the color targets it writes.
#[derive(Debug, Clone)]
pub struct FragmentState {
    pub module: Arc<ShaderModule>,
    pub targets: Vec<ColorTargetState>,
}

impl FragmentState {
    pub fn new(module: &Arc<ShaderModule>) -> Self {
        Self {
            module: module.clone(),
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<ColorTargetState>) -> Self {
        self.targets.push(target.into());
        self
    }
}

/// Descriptor for [`GraphicsDevice::create_render_pipeline`](crate::GraphicsDevice::create_render_pipeline).
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub layout: Arc<PipelineLayout>,
    pub vertex: VertexState,
    pub fragment: Option<FragmentState>,
    pub primitive: PrimitiveState,
    pub depth_stencil: Option<DepthStencilState>,
    pub multisample: MultisampleState,
}

impl RenderPipelineDescriptor {
    pub fn new(layout: &Arc<PipelineLayout>, vertex: VertexState) -> Self {
        Self {
            label: None,
            layout: layout.clone(),
            vertex,
            fragment: None,
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_fragment(mut self, fragment: FragmentState) -> Self {
        self.fragment = Some(fragment);
        self
    }

    pub fn with_primitive(mut self, primitive: PrimitiveState) -> Self {
        self.primitive = primitive;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = Some(depth_stencil);
        self
    }

    pub fn with_multisample(mut self, multisample: MultisampleState) -> Self {
        self.multisample = multisample;
        self
    }
}

/// An immutable pipeline state object.
#[derive(Debug)]
pub struct RenderPipeline {
    id: u64,
    descriptor: RenderPipelineDescriptor,
}

impl RenderPipeline {
    pub(crate) fn build(
        id: u64,
        descriptor: &RenderPipelineDescriptor,
        limits: &Limits,
        features: Features,
    ) -> Result<Self, GraphicsError> {
        let fail = |message: String| {
            Err(GraphicsError::validation(format!(
                "render pipeline {:?}: {message}",
                descriptor.label
            )))
        };

        // Stages
        let vertex_module = &descriptor.vertex.module;
        if vertex_module.stage() != ShaderStage::Vertex {
            return fail(format!("vertex module is a {:?} stage", vertex_module.stage()));
        }
        if let Some(fragment) = &descriptor.fragment {
            if fragment.module.stage() != ShaderStage::Fragment {
                return fail(format!("fragment module is a {:?} stage", fragment.module.stage()));
            }
        }
        if let Some(location) = vertex_module
            .interface()
            .outputs
            .iter()
            .find(|location| **location as usize >= MAX_VARYINGS)
        {
            return fail(format!("varying location {location} exceeds {MAX_VARYINGS}"));
        }

        // Vertex buffers
        let buffers = &descriptor.vertex.buffers;
        if buffers.len() > limits.max_vertex_buffers as usize {
            return fail(format!(
                "{} vertex buffers exceed the limit of {}",
                buffers.len(),
                limits.max_vertex_buffers
            ));
        }
        let mut locations = HashSet::new();
        for (slot, layout) in buffers.iter().enumerate() {
            if layout.array_stride % 4 != 0 || layout.array_stride > limits.max_vertex_buffer_array_stride as u64 {
                return fail(format!(
                    "stride {} of vertex buffer {slot} must be a multiple of 4 and at most {}",
                    layout.array_stride, limits.max_vertex_buffer_array_stride
                ));
            }
            for attribute in &layout.attributes {
                let end = attribute.offset.checked_add(attribute.format.size());
                if end.map_or(true, |end| end > layout.array_stride) {
                    return fail(format!(
                        "attribute at location {} ({:?} at offset {}) does not fit the {}-byte stride of vertex buffer {slot}",
                        attribute.shader_location, attribute.format, attribute.offset, layout.array_stride
                    ));
                }
                if attribute.offset % 4 != 0 {
                    return fail(format!(
                        "attribute at location {} has unaligned offset {}",
                        attribute.shader_location, attribute.offset
                    ));
                }
                if attribute.shader_location >= limits.max_vertex_attributes {
                    return fail(format!(
                        "attribute location {} exceeds the limit of {}",
                        attribute.shader_location, limits.max_vertex_attributes
                    ));
                }
                if !locations.insert(attribute.shader_location) {
                    return fail(format!("location {} is fed by two attributes", attribute.shader_location));
                }
            }
        }
        for input in &vertex_module.interface().inputs {
            let attribute = buffers
                .iter()
                .flat_map(|layout| layout.attributes.iter())
                .find(|attribute| attribute.shader_location == input.location);
            match attribute {
                None => return fail(format!("vertex input at location {} has no attribute", input.location)),
                Some(attribute) if attribute.format.class() != input.class => {
                    return fail(format!(
                        "attribute {:?} at location {} does not match the shader's {:?} input",
                        attribute.format, input.location, input.class
                    ));
                }
                Some(_) => {}
            }
        }

        // Attachments
        let multisample = &descriptor.multisample;
        if !SUPPORTED_SAMPLE_COUNTS.contains(&multisample.count) {
            return fail(format!("sample count {} is not one of {SUPPORTED_SAMPLE_COUNTS:?}", multisample.count));
        }
        if multisample.alpha_to_coverage_enabled && multisample.count == 1 {
            return fail("alpha to coverage requires a multisampled pipeline".to_string());
        }
        let targets = descriptor.fragment.as_ref().map(|f| f.targets.as_slice()).unwrap_or(&[]);
        if targets.len() > MAX_COLOR_ATTACHMENTS.min(limits.max_color_attachments as usize) {
            return fail(format!("{} color targets exceed the limit", targets.len()));
        }
        if let Some(target) = targets.iter().find(|target| target.format.is_depth_stencil()) {
            return fail(format!("color target uses depth format {:?}", target.format));
        }
        if let Some(fragment) = &descriptor.fragment {
            for location in &fragment.module.interface().outputs {
                if *location as usize >= targets.len() {
                    return fail(format!("fragment output {location} has no color target"));
                }
            }
            for input in &fragment.module.interface().inputs {
                if !vertex_module.interface().outputs.contains(&input.location) {
                    return fail(format!(
                        "fragment input at location {} is not written by the vertex stage",
                        input.location
                    ));
                }
            }
        }
        if let Some(depth_stencil) = &descriptor.depth_stencil {
            if !depth_stencil.format.is_depth_stencil() {
                return fail(format!("depth/stencil state uses color format {:?}", depth_stencil.format));
            }
            if depth_stencil.stencil.is_enabled() && !depth_stencil.format.has_stencil() {
                return fail(format!("stencil test on format {:?} without stencil", depth_stencil.format));
            }
        }
        if targets.is_empty() && descriptor.depth_stencil.is_none() {
            return fail("pipeline writes no color target and no depth attachment".to_string());
        }
        if descriptor.primitive.unclipped_depth && !features.contains(Features::DEPTH_CLIP_CONTROL) {
            return fail("unclipped depth requires the DEPTH_CLIP_CONTROL feature".to_string());
        }

        // Resources
        let layouts = descriptor.layout.bind_group_layouts();
        let stages = std::iter::once(vertex_module).chain(descriptor.fragment.as_ref().map(|f| &f.module));
        for module in stages {
            let stage_flag = ShaderStageFlags::from(module.stage());
            for slot in &module.interface().resources {
                let Some(group) = layouts.get(slot.group as usize) else {
                    return fail(format!(
                        "{:?} stage reads group {} but the layout has {} groups",
                        module.stage(),
                        slot.group,
                        layouts.len()
                    ));
                };
                let Some(entry) = group.entry(slot.binding) else {
                    return fail(format!(
                        "{:?} stage reads binding ({}, {}) missing from the layout",
                        module.stage(),
                        slot.group,
                        slot.binding
                    ));
                };
                if entry.binding_type != slot.binding_type {
                    return fail(format!(
                        "binding ({}, {}) is {:?} in the layout but {:?} in the {:?} stage",
                        slot.group,
                        slot.binding,
                        entry.binding_type,
                        slot.binding_type,
                        module.stage()
                    ));
                }
                if !entry.visibility.contains(stage_flag) {
                    return fail(format!(
                        "binding ({}, {}) is not visible to the {:?} stage",
                        slot.group,
                        slot.binding,
                        module.stage()
                    ));
                }
            }
        }

        Ok(Self {
            id,
            descriptor: descriptor.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.descriptor.layout
    }

    pub fn vertex(&self) -> &VertexState {
        &self.descriptor.vertex
    }

    pub fn fragment(&self) -> Option<&FragmentState> {
        self.descriptor.fragment.as_ref()
    }

    pub fn primitive(&self) -> &PrimitiveState {
        &self.descriptor.primitive
    }

    pub fn depth_stencil(&self) -> Option<&DepthStencilState> {
        self.descriptor.depth_stencil.as_ref()
    }

    pub fn multisample(&self) -> &MultisampleState {
        &self.descriptor.multisample
    }

    pub fn sample_count(&self) -> u32 {
        self.descriptor.multisample.count
    }

    pub fn color_targets(&self) -> &[ColorTargetState] {
        self.fragment().map(|f| f.targets.as_slice()).unwrap_or(&[])
    }
}

static_assertions::assert_impl_all!(RenderPipeline: Send, Sync);
