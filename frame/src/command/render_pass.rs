//! Render pass recording.

use std::ops::Range;
use std::sync::Arc;

use super::{Command, CommandEncoder};
use crate::error::GraphicsError;
use crate::pipeline::{RenderPipeline, VertexStepMode};
use crate::resources::{BindGroup, BoundEntry, Buffer, Texture, TextureView};
use crate::types::{BufferUsage, Color, IndexFormat, ScissorRect, TextureFormat, TextureUsage, Viewport};

/// What happens to an attachment when the pass begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp<V> {
    /// Overwrite every sample with the value.
    Clear(V),
    /// Keep the previous contents.
    Load,
}

/// What happens to an attachment when the pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    /// Contents become undefined; the software backend zeroes them.
    Discard,
}

/// Load and store operations of one aspect of an attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Operations<V> {
    pub load: LoadOp<V>,
    pub store: StoreOp,
}

impl<V> Operations<V> {
    pub fn clear(value: V) -> Self {
        Self {
            load: LoadOp::Clear(value),
            store: StoreOp::Store,
        }
    }

    pub fn load() -> Self {
        Self {
            load: LoadOp::Load,
            store: StoreOp::Store,
        }
    }

    pub fn with_store(mut self, store: StoreOp) -> Self {
        self.store = store;
        self
    }
}

/// One color attachment of a render pass.
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureView,
    /// Single-sampled target the samples are averaged into at the end of
    /// the pass. Required exactly when `view` is multisampled.
    pub resolve_target: Option<TextureView>,
    pub ops: Operations<Color>,
}

impl ColorAttachment {
    /// Attachment cleared to transparent black and stored.
    pub fn new(view: &TextureView) -> Self {
        Self {
            view: view.clone(),
            resolve_target: None,
            ops: Operations::clear(Color::TRANSPARENT),
        }
    }

    pub fn with_clear(mut self, color: Color) -> Self {
        self.ops.load = LoadOp::Clear(color);
        self
    }

    pub fn with_load(mut self) -> Self {
        self.ops.load = LoadOp::Load;
        self
    }

    pub fn with_store_op(mut self, store: StoreOp) -> Self {
        self.ops.store = store;
        self
    }

    pub fn with_resolve_target(mut self, target: &TextureView) -> Self {
        self.resolve_target = Some(target.clone());
        self
    }
}

/// The depth/stencil attachment of a render pass.
///
/// An aspect without operations is loaded and stored unchanged.
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureView,
    pub depth_ops: Option<Operations<f32>>,
    pub stencil_ops: Option<Operations<u32>>,
}

impl DepthStencilAttachment {
    /// Attachment with depth cleared to 1.0 and stored.
    pub fn new(view: &TextureView) -> Self {
        Self {
            view: view.clone(),
            depth_ops: Some(Operations::clear(1.0)),
            stencil_ops: None,
        }
    }

    pub fn with_depth_ops(mut self, ops: Operations<f32>) -> Self {
        self.depth_ops = Some(ops);
        self
    }

    pub fn with_stencil_ops(mut self, ops: Operations<u32>) -> Self {
        self.stencil_ops = Some(ops);
        self
    }
}

/// Descriptor for [`CommandEncoder::begin_render_pass`].
///
/// Every attachment must be a single-layer `RENDER_ATTACHMENT` view of a
/// distinct texture; all attachments share one size and sample count.
#[derive(Debug, Clone, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

impl RenderPassDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth_stencil_attachment(mut self, attachment: DepthStencilAttachment) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }
}

// Upper bound of bind group slot indices; the pipeline layout decides which
// slots a draw actually reads.
const MAX_BIND_GROUP_SLOTS: usize = 8;

#[derive(Debug, Clone)]
pub(crate) struct VertexBinding {
    pub buffer: Buffer,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexBinding {
    pub buffer: Buffer,
    pub format: IndexFormat,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum DrawKind {
    Direct {
        vertices: Range<u32>,
    },
    Indexed {
        indices: Range<u32>,
        base_vertex: i32,
        index: IndexBinding,
    },
}

/// A validated draw with a snapshot of the state it uses.
#[derive(Debug, Clone)]
pub(crate) struct DrawCall {
    pub pipeline: Arc<RenderPipeline>,
    pub bind_groups: Vec<Arc<BindGroup>>,
    /// One binding per vertex buffer layout of the pipeline.
    pub vertex_buffers: Vec<VertexBinding>,
    pub kind: DrawKind,
    pub instances: Range<u32>,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub stencil_reference: u32,
    pub blend_constant: [f32; 4],
}

impl DrawCall {
    fn ensure_live(&self) -> Result<(), GraphicsError> {
        for binding in &self.vertex_buffers {
            binding.buffer.ensure_live()?;
        }
        if let DrawKind::Indexed { index, .. } = &self.kind {
            index.buffer.ensure_live()?;
        }
        for group in &self.bind_groups {
            for (_, entry) in group.entries() {
                match entry {
                    BoundEntry::Buffer(binding) => binding.buffer.ensure_live()?,
                    BoundEntry::Texture(view) => view.texture().ensure_live()?,
                    BoundEntry::Sampler(_) => {}
                }
            }
        }
        Ok(())
    }
}

/// A finished render pass, as executed by the backend.
#[derive(Debug)]
pub(crate) struct RecordedPass {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil: Option<DepthStencilAttachment>,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub draws: Vec<DrawCall>,
}

impl RecordedPass {
    pub(crate) fn ensure_live(&self) -> Result<(), GraphicsError> {
        for attachment in &self.color_attachments {
            attachment.view.texture().ensure_live()?;
            if let Some(resolve) = &attachment.resolve_target {
                resolve.texture().ensure_live()?;
            }
        }
        if let Some(depth) = &self.depth_stencil {
            depth.view.texture().ensure_live()?;
        }
        self.draws.iter().try_for_each(DrawCall::ensure_live)
    }

    fn placeholder() -> Self {
        Self {
            label: None,
            color_attachments: Vec::new(),
            depth_stencil: None,
            width: 0,
            height: 0,
            sample_count: 1,
            draws: Vec::new(),
        }
    }

    fn attachment_textures(&self) -> impl Iterator<Item = &Texture> {
        self.color_attachments
            .iter()
            .flat_map(|a| std::iter::once(&a.view).chain(a.resolve_target.as_ref()))
            .chain(self.depth_stencil.as_ref().map(|d| &d.view))
            .map(TextureView::texture)
    }
}

/// Records draws into one render pass.
///
/// Created by [`CommandEncoder::begin_render_pass`], which moves the encoder
/// into the pass; [`end`](Self::end) moves it back out. Dropping a pass
/// without ending it discards the encoder and logs an error.
#[derive(Debug)]
pub struct RenderPassEncoder {
    encoder: Option<CommandEncoder>,
    pass: RecordedPass,
    pipeline: Option<Arc<RenderPipeline>>,
    bind_groups: Vec<Option<Arc<BindGroup>>>,
    vertex_buffers: Vec<Option<VertexBinding>>,
    index_buffer: Option<IndexBinding>,
    viewport: Viewport,
    scissor: ScissorRect,
    stencil_reference: u32,
    blend_constant: Color,
}

impl RenderPassEncoder {
    pub(super) fn begin(
        encoder: CommandEncoder,
        descriptor: &RenderPassDescriptor,
        max_color_attachments: u32,
    ) -> Result<Self, GraphicsError> {
        let label = &descriptor.label;
        let invalid = |message: String| GraphicsError::validation(format!("render pass {label:?}: {message}"));
        let fail = |message: String| Err(invalid(message));

        let colors = &descriptor.color_attachments;
        if colors.is_empty() && descriptor.depth_stencil_attachment.is_none() {
            return fail("no attachments".to_string());
        }
        if colors.len() > max_color_attachments as usize {
            return fail(format!(
                "{} color attachments exceed the limit of {max_color_attachments}",
                colors.len()
            ));
        }

        let first = colors
            .first()
            .map(|a| &a.view)
            .or(descriptor.depth_stencil_attachment.as_ref().map(|d| &d.view));
        let Some(first) = first else {
            return fail("no attachments".to_string());
        };
        let (width, height, sample_count) = (first.width(), first.height(), first.sample_count());

        let check_view = |view: &TextureView, role: &str| -> Result<(), GraphicsError> {
            view.texture().ensure_live()?;
            if !view.texture().usage().contains(TextureUsage::RENDER_ATTACHMENT) {
                return Err(invalid(format!("{role} {:?} lacks RENDER_ATTACHMENT usage", view.label())));
            }
            if view.layer_count() != 1 {
                return Err(invalid(format!(
                    "{role} {:?} covers {} layers, expected 1",
                    view.label(),
                    view.layer_count()
                )));
            }
            if view.width() != width || view.height() != height {
                return Err(invalid(format!(
                    "{role} {:?} is {}x{}, other attachments are {width}x{height}",
                    view.label(),
                    view.width(),
                    view.height()
                )));
            }
            Ok(())
        };

        for attachment in colors {
            let view = &attachment.view;
            check_view(view, "color attachment")?;
            if view.format().is_depth_stencil() {
                return fail(format!("color attachment {:?} uses depth format {:?}", view.label(), view.format()));
            }
            if view.sample_count() != sample_count {
                return fail(format!(
                    "color attachment {:?} has {} samples, other attachments have {sample_count}",
                    view.label(),
                    view.sample_count()
                ));
            }
            match (&attachment.resolve_target, sample_count > 1) {
                (None, true) => {
                    return fail(format!("multisampled attachment {:?} needs a resolve target", view.label()));
                }
                (Some(_), false) => {
                    return fail(format!(
                        "single-sampled attachment {:?} cannot have a resolve target",
                        view.label()
                    ));
                }
                (Some(resolve), true) => {
                    check_view(resolve, "resolve target")?;
                    if resolve.sample_count() != 1 || resolve.format() != view.format() {
                        return fail(format!(
                            "resolve target {:?} must be single-sampled {:?}",
                            resolve.label(),
                            view.format()
                        ));
                    }
                }
                (None, false) => {}
            }
        }

        if let Some(depth) = &descriptor.depth_stencil_attachment {
            check_view(&depth.view, "depth attachment")?;
            if !depth.view.format().is_depth_stencil() {
                return fail(format!(
                    "depth attachment {:?} uses color format {:?}",
                    depth.view.label(),
                    depth.view.format()
                ));
            }
            if depth.view.sample_count() != sample_count {
                return fail(format!(
                    "depth attachment has {} samples, other attachments have {sample_count}",
                    depth.view.sample_count()
                ));
            }
            if depth.stencil_ops.is_some() && !depth.view.format().has_stencil() {
                return fail(format!("stencil operations on format {:?} without stencil", depth.view.format()));
            }
        }

        let pass = RecordedPass {
            label: descriptor.label.clone(),
            color_attachments: colors.clone(),
            depth_stencil: descriptor.depth_stencil_attachment.clone(),
            width,
            height,
            sample_count,
            draws: Vec::new(),
        };
        let textures: Vec<&Texture> = pass.attachment_textures().collect();
        for (i, a) in textures.iter().enumerate() {
            if textures[i + 1..].iter().any(|b| a.same_as(b)) {
                return fail(format!("texture {:?} is attached twice", a.label()));
            }
        }

        log::trace!(
            "Begin render pass {:?}: {}x{}, {} color attachments, samples={sample_count}",
            descriptor.label,
            width,
            height,
            colors.len()
        );
        Ok(Self {
            encoder: Some(encoder),
            pass,
            pipeline: None,
            bind_groups: Vec::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            viewport: Viewport::from_dimensions(width, height),
            scissor: ScissorRect::from_dimensions(width, height),
            stencil_reference: 0,
            blend_constant: Color::BLACK,
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.pass.label.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.pass.width
    }

    pub fn height(&self) -> u32 {
        self.pass.height
    }

    pub fn sample_count(&self) -> u32 {
        self.pass.sample_count
    }

    /// Number of draws recorded so far.
    pub fn draw_count(&self) -> usize {
        self.pass.draws.len()
    }

    fn color_formats(&self) -> Vec<TextureFormat> {
        self.pass.color_attachments.iter().map(|a| a.view.format()).collect()
    }

    /// Binds a pipeline for subsequent draws.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Validation`] unless the pipeline's color
    /// target formats, depth format and sample count equal the pass's
    /// attachments.
    pub fn set_pipeline(&mut self, pipeline: &Arc<RenderPipeline>) -> Result<(), GraphicsError> {
        let fail = |message: String| {
            Err(GraphicsError::validation(format!(
                "pipeline {:?} in render pass {:?}: {message}",
                pipeline.label(),
                self.pass.label
            )))
        };
        if pipeline.sample_count() != self.pass.sample_count {
            return fail(format!(
                "pipeline sample count {} does not match attachment sample count {}",
                pipeline.sample_count(),
                self.pass.sample_count
            ));
        }
        let target_formats: Vec<TextureFormat> = pipeline.color_targets().iter().map(|t| t.format).collect();
        let attachment_formats = self.color_formats();
        if target_formats != attachment_formats {
            return fail(format!(
                "color targets {target_formats:?} do not match attachments {attachment_formats:?}"
            ));
        }
        let pipeline_depth = pipeline.depth_stencil().map(|d| d.format);
        let pass_depth = self.pass.depth_stencil.as_ref().map(|d| d.view.format());
        if pipeline_depth != pass_depth {
            return fail(format!(
                "depth format {pipeline_depth:?} does not match depth attachment {pass_depth:?}"
            ));
        }
        self.pipeline = Some(pipeline.clone());
        Ok(())
    }

    /// Binds a bind group to group slot `index`.
    pub fn set_bind_group(&mut self, index: u32, group: &Arc<BindGroup>) -> Result<(), GraphicsError> {
        let index = index as usize;
        if index >= MAX_BIND_GROUP_SLOTS {
            return Err(GraphicsError::validation(format!(
                "bind group slot {index} exceeds {}",
                MAX_BIND_GROUP_SLOTS
            )));
        }
        let attachments: Vec<&Texture> = self.pass.attachment_textures().collect();
        for (binding, entry) in group.entries() {
            if let BoundEntry::Texture(view) = entry {
                if attachments.iter().any(|t| t.same_as(view.texture())) {
                    return Err(GraphicsError::validation(format!(
                        "binding {binding} of bind group {:?} samples an attachment of the pass",
                        group.label()
                    )));
                }
            }
        }
        if self.bind_groups.len() <= index {
            self.bind_groups.resize(index + 1, None);
        }
        self.bind_groups[index] = Some(group.clone());
        Ok(())
    }

    /// Binds `buffer` from `offset` to vertex buffer slot `slot`.
    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: &Buffer, offset: u64) -> Result<(), GraphicsError> {
        buffer.ensure_live()?;
        if !buffer.usage().contains(BufferUsage::VERTEX) {
            return Err(GraphicsError::validation(format!(
                "buffer {:?} lacks VERTEX usage",
                buffer.label()
            )));
        }
        if offset % 4 != 0 || offset > buffer.size() {
            return Err(GraphicsError::validation(format!(
                "vertex buffer offset {offset} is unaligned or outside buffer {:?}",
                buffer.label()
            )));
        }
        let slot = slot as usize;
        if self.vertex_buffers.len() <= slot {
            self.vertex_buffers.resize(slot + 1, None);
        }
        self.vertex_buffers[slot] = Some(VertexBinding {
            buffer: buffer.clone(),
            offset,
        });
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer, format: IndexFormat, offset: u64) -> Result<(), GraphicsError> {
        buffer.ensure_live()?;
        if !buffer.usage().contains(BufferUsage::INDEX) {
            return Err(GraphicsError::validation(format!("buffer {:?} lacks INDEX usage", buffer.label())));
        }
        if offset % format.size() != 0 || offset > buffer.size() {
            return Err(GraphicsError::validation(format!(
                "index buffer offset {offset} is unaligned or outside buffer {:?}",
                buffer.label()
            )));
        }
        self.index_buffer = Some(IndexBinding {
            buffer: buffer.clone(),
            format,
            offset,
        });
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<(), GraphicsError> {
        let depth_ok = (0.0..=1.0).contains(&viewport.min_depth)
            && (0.0..=1.0).contains(&viewport.max_depth)
            && viewport.min_depth <= viewport.max_depth;
        if viewport.width <= 0.0 || viewport.height <= 0.0 || !depth_ok {
            return Err(GraphicsError::validation(format!("invalid viewport {viewport:?}")));
        }
        self.viewport = viewport;
        Ok(())
    }

    pub fn set_scissor_rect(&mut self, scissor: ScissorRect) -> Result<(), GraphicsError> {
        let right = scissor.x.checked_add(scissor.width);
        let bottom = scissor.y.checked_add(scissor.height);
        if right.map_or(true, |r| r > self.pass.width) || bottom.map_or(true, |b| b > self.pass.height) {
            return Err(GraphicsError::validation(format!(
                "scissor {scissor:?} exceeds the {}x{} attachments",
                self.pass.width, self.pass.height
            )));
        }
        self.scissor = scissor;
        Ok(())
    }

    pub fn set_stencil_reference(&mut self, reference: u32) {
        self.stencil_reference = reference & 0xff;
    }

    pub fn set_blend_constant(&mut self, color: Color) {
        self.blend_constant = color;
    }

    /// Draws `vertex_count` vertices for each of `instance_count` instances.
    ///
    /// The vertex kernel receives vertex indices
    /// `first_vertex..first_vertex + vertex_count` and instance indices
    /// `first_instance..first_instance + instance_count`; instances are
    /// rasterized in increasing order.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), GraphicsError> {
        let vertices = span(first_vertex, vertex_count)?;
        let instances = span(first_instance, instance_count)?;
        self.record(DrawKind::Direct { vertices }, instances)
    }

    /// Draws `index_count` indices starting at `first_index` of the bound
    /// index buffer, adding `base_vertex` to every index.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), GraphicsError> {
        let Some(index) = self.index_buffer.clone() else {
            return Err(GraphicsError::usage("draw_indexed without an index buffer"));
        };
        let indices = span(first_index, index_count)?;
        let end = index.offset + indices.end as u64 * index.format.size();
        if end > index.buffer.size() {
            return Err(GraphicsError::validation(format!(
                "indices {indices:?} read past index buffer {:?} of {} bytes",
                index.buffer.label(),
                index.buffer.size()
            )));
        }
        let instances = span(first_instance, instance_count)?;
        self.record(
            DrawKind::Indexed {
                indices,
                base_vertex,
                index,
            },
            instances,
        )
    }

    fn record(&mut self, kind: DrawKind, instances: Range<u32>) -> Result<(), GraphicsError> {
        let Some(pipeline) = self.pipeline.clone() else {
            return Err(GraphicsError::usage("draw without a pipeline"));
        };
        let fail = |message: String| {
            Err(GraphicsError::validation(format!(
                "draw with pipeline {:?}: {message}",
                pipeline.label()
            )))
        };

        let mut bind_groups = Vec::new();
        for (index, expected) in pipeline.layout().bind_group_layouts().iter().enumerate() {
            let Some(group) = self.bind_groups.get(index).and_then(Option::as_ref) else {
                return fail(format!("bind group {index} is not set"));
            };
            if !group.layout().is_compatible(expected) {
                return fail(format!("bind group {index} ({:?}) has an incompatible layout", group.label()));
            }
            bind_groups.push(group.clone());
        }

        let mut vertex_buffers = Vec::new();
        for (slot, layout) in pipeline.vertex().buffers.iter().enumerate() {
            let Some(binding) = self.vertex_buffers.get(slot).and_then(Option::as_ref) else {
                return fail(format!("vertex buffer slot {slot} is not set"));
            };
            let required = match (&kind, layout.step_mode) {
                (_, VertexStepMode::Instance) => layout.required_size(instances.start, instances.len() as u32),
                (DrawKind::Direct { vertices }, VertexStepMode::Vertex) => {
                    layout.required_size(vertices.start, vertices.len() as u32)
                }
                // Indexed fetches are bounds-checked per vertex at execution
                (DrawKind::Indexed { .. }, VertexStepMode::Vertex) => 0,
            };
            let available = binding.buffer.size() - binding.offset;
            if required > available {
                return fail(format!(
                    "vertex buffer slot {slot} holds {available} bytes, the draw reads {required}"
                ));
            }
            vertex_buffers.push(binding.clone());
        }

        let empty = match &kind {
            DrawKind::Direct { vertices } => vertices.is_empty(),
            DrawKind::Indexed { indices, .. } => indices.is_empty(),
        };
        if empty || instances.is_empty() {
            return Ok(());
        }

        let draw = DrawCall {
            pipeline,
            bind_groups,
            vertex_buffers,
            kind,
            instances,
            viewport: self.viewport,
            scissor: self.scissor,
            stencil_reference: self.stencil_reference,
            blend_constant: self.blend_constant.to_array(),
        };
        draw.ensure_live()?;
        self.pass.draws.push(draw);
        Ok(())
    }

    /// Ends the pass and returns its encoder.
    pub fn end(mut self) -> CommandEncoder {
        let pass = std::mem::replace(&mut self.pass, RecordedPass::placeholder());
        // Only taken here, and `end` consumes the pass
        let mut encoder = self.encoder.take().unwrap_or_else(|| CommandEncoder::new(None, 0));
        log::trace!("End render pass {:?} with {} draws", pass.label, pass.draws.len());
        encoder.push(Command::RenderPass(pass));
        encoder
    }
}

impl Drop for RenderPassEncoder {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            log::error!(
                "Render pass {:?} dropped without end(); its encoder and {} draws are discarded",
                self.pass.label,
                self.pass.draws.len()
            );
        }
    }
}

fn span(first: u32, count: u32) -> Result<Range<u32>, GraphicsError> {
    let end = first
        .checked_add(count)
        .ok_or_else(|| GraphicsError::validation(format!("range {first}+{count} overflows")))?;
    Ok(first..end)
}
