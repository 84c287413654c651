//! Render pass execution: vertex shading, primitive assembly, coverage,
//! fragment shading and the per-sample tests.
//!
//! Conventions:
//! - NDC `x, y` in `[-1, 1]` with +Y up, `z` in `[0, 1]`; window rows grow
//!   downward.
//! - A triangle covers a sample when the sample lies strictly inside it, or on
//!   a top or left edge. Two triangles sharing an edge never both cover it.
//! - The fragment kernel runs once per pixel at the pixel center; depth and
//!   stencil are tested and written per covered sample.
//! - Primitives with a vertex at `w <= 0` are dropped rather than clipped.

use std::ops::Range;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::command::{DrawCall, DrawKind, LoadOp, RecordedPass, StoreOp};
use crate::error::GraphicsError;
use crate::pipeline::{
    ColorTargetState, ColorWrites, CullMode, DepthStencilState, FrontFace, MultisampleState, PrimitiveState,
    PrimitiveTopology, VertexStepMode,
};
use crate::resources::{BoundEntry, TexelStorage};
use crate::shader::{
    BoundResource, FragmentInput, FragmentKernel, InvocationContext, ResourceRef, ShaderResources, VertexInput,
    VertexOutput, MAX_VARYINGS,
};
use crate::types::{SamplerDescriptor, ScissorRect, Viewport};

const W_EPSILON: f32 = 1e-6;

/// Sample offsets within a pixel, by sample count.
const SAMPLES_1: [[f32; 2]; 1] = [[0.5, 0.5]];
const SAMPLES_4: [[f32; 2]; 4] = [[0.375, 0.125], [0.875, 0.375], [0.125, 0.625], [0.625, 0.875]];

fn sample_positions(count: u32) -> &'static [[f32; 2]] {
    if count == 4 {
        &SAMPLES_4
    } else {
        &SAMPLES_1
    }
}

struct Target<'a> {
    storage: RwLockWriteGuard<'a, TexelStorage>,
    layer: u32,
}

struct Attachments<'a> {
    colors: Vec<Target<'a>>,
    depth: Option<Target<'a>>,
}

/// Executes a recorded pass against its attachments.
pub(super) fn execute_pass(pass: &RecordedPass) -> Result<(), GraphicsError> {
    let mut attachments = Attachments {
        colors: Vec::with_capacity(pass.color_attachments.len()),
        depth: None,
    };
    let mut resolves = Vec::new();
    for attachment in &pass.color_attachments {
        let texture = attachment.view.texture();
        attachments.colors.push(Target {
            storage: texture.storage_mut(),
            layer: attachment.view.base_layer(),
        });
        texture.ensure_live()?;
        if let Some(resolve) = &attachment.resolve_target {
            resolves.push(Some(Target {
                storage: resolve.texture().storage_mut(),
                layer: resolve.base_layer(),
            }));
            resolve.texture().ensure_live()?;
        } else {
            resolves.push(None);
        }
    }
    if let Some(depth) = &pass.depth_stencil {
        attachments.depth = Some(Target {
            storage: depth.view.texture().storage_mut(),
            layer: depth.view.base_layer(),
        });
        depth.view.texture().ensure_live()?;
    }
    for draw in &pass.draws {
        draw_resources_live(draw)?;
    }

    for (target, attachment) in attachments.colors.iter_mut().zip(&pass.color_attachments) {
        if let LoadOp::Clear(color) = attachment.ops.load {
            target.storage.fill_layer(target.layer, color.to_array());
        }
    }
    if let (Some(target), Some(depth)) = (attachments.depth.as_mut(), &pass.depth_stencil) {
        let clear_depth = depth.depth_ops.and_then(|ops| match ops.load {
            LoadOp::Clear(value) => Some(value),
            LoadOp::Load => None,
        });
        let clear_stencil = depth.stencil_ops.and_then(|ops| match ops.load {
            LoadOp::Clear(value) => Some(value & 0xff),
            LoadOp::Load => None,
        });
        if clear_depth.is_some() || clear_stencil.is_some() {
            for_each_sample(pass, |x, y, s| {
                let stored = target.storage.get(x, y, target.layer, s);
                let depth = clear_depth.unwrap_or(stored[0]);
                let stencil = clear_stencil.map_or(stored[1], |v| v as f32);
                target.storage.set(x, y, target.layer, s, [depth, stencil, 0.0, 0.0]);
            });
        }
    }

    for draw in &pass.draws {
        execute_draw(pass, draw, &mut attachments)?;
    }

    for ((target, resolve), attachment) in attachments.colors.iter_mut().zip(&mut resolves).zip(&pass.color_attachments) {
        if let Some(resolve) = resolve {
            resolve_samples(pass, target, resolve);
        }
        if attachment.ops.store == StoreOp::Discard {
            target.storage.fill_layer(target.layer, [0.0; 4]);
        }
    }
    if let (Some(target), Some(depth)) = (attachments.depth.as_mut(), &pass.depth_stencil) {
        let discard_depth = depth.depth_ops.is_some_and(|ops| ops.store == StoreOp::Discard);
        let discard_stencil = depth.stencil_ops.is_some_and(|ops| ops.store == StoreOp::Discard);
        if discard_depth || discard_stencil {
            for_each_sample(pass, |x, y, s| {
                let stored = target.storage.get(x, y, target.layer, s);
                let depth = if discard_depth { 0.0 } else { stored[0] };
                let stencil = if discard_stencil { 0.0 } else { stored[1] };
                target.storage.set(x, y, target.layer, s, [depth, stencil, 0.0, 0.0]);
            });
        }
    }
    log::trace!("Executed render pass {:?}: {} draws", pass.label, pass.draws.len());
    Ok(())
}

fn for_each_sample(pass: &RecordedPass, mut f: impl FnMut(u32, u32, u32)) {
    for y in 0..pass.height {
        for x in 0..pass.width {
            for s in 0..pass.sample_count {
                f(x, y, s);
            }
        }
    }
}

fn resolve_samples(pass: &RecordedPass, source: &Target<'_>, destination: &mut Target<'_>) {
    let count = pass.sample_count as f32;
    for y in 0..pass.height {
        for x in 0..pass.width {
            let mut sum = [0.0f32; 4];
            for s in 0..pass.sample_count {
                let texel = source.storage.get(x, y, source.layer, s);
                for (acc, value) in sum.iter_mut().zip(texel) {
                    *acc += value;
                }
            }
            destination
                .storage
                .set(x, y, destination.layer, 0, sum.map(|value| value / count));
        }
    }
}

fn draw_resources_live(draw: &DrawCall) -> Result<(), GraphicsError> {
    for binding in &draw.vertex_buffers {
        binding.buffer.ensure_live()?;
    }
    if let DrawKind::Indexed { index, .. } = &draw.kind {
        index.buffer.ensure_live()?;
    }
    Ok(())
}

/// A bound resource with its lock held for the duration of a draw.
enum Held<'a> {
    Buffer {
        bytes: RwLockReadGuard<'a, Vec<u8>>,
        range: Range<usize>,
    },
    Texture {
        storage: RwLockReadGuard<'a, TexelStorage>,
        base_layer: u32,
    },
    Sampler(&'a SamplerDescriptor),
}

fn execute_draw(pass: &RecordedPass, draw: &DrawCall, attachments: &mut Attachments<'_>) -> Result<(), GraphicsError> {
    let pipeline = &draw.pipeline;

    let mut held = Vec::new();
    for (group, bind_group) in draw.bind_groups.iter().enumerate() {
        for (binding, entry) in bind_group.entries() {
            let resource = match entry {
                BoundEntry::Buffer(bound) => {
                    let bytes = bound.buffer.read();
                    bound.buffer.ensure_live()?;
                    let start = bound.offset as usize;
                    Held::Buffer {
                        bytes,
                        range: start..start + bound.size as usize,
                    }
                }
                BoundEntry::Texture(view) => {
                    let storage = view.texture().storage();
                    view.texture().ensure_live()?;
                    Held::Texture {
                        storage,
                        base_layer: view.base_layer(),
                    }
                }
                BoundEntry::Sampler(sampler) => Held::Sampler(sampler.descriptor()),
            };
            held.push((group as u32, *binding, resource));
        }
    }
    let bindings: Vec<BoundResource<'_>> = held
        .iter()
        .map(|(group, binding, resource)| BoundResource {
            group: *group,
            binding: *binding,
            resource: match resource {
                Held::Buffer { bytes, range } => ResourceRef::Buffer(bytes.get(range.clone()).unwrap_or(&[])),
                Held::Texture { storage, base_layer } => ResourceRef::Texture {
                    storage,
                    base_layer: *base_layer,
                },
                Held::Sampler(descriptor) => ResourceRef::Sampler(descriptor),
            },
        })
        .collect();
    let resources = ShaderResources::new(&bindings);

    let mut vertex_data = Vec::with_capacity(draw.vertex_buffers.len());
    for binding in &draw.vertex_buffers {
        let bytes = binding.buffer.read();
        binding.buffer.ensure_live()?;
        vertex_data.push((bytes, binding.offset));
    }

    let vertex_ids: Vec<u32> = match &draw.kind {
        DrawKind::Direct { vertices } => vertices.clone().collect(),
        DrawKind::Indexed {
            indices,
            base_vertex,
            index,
        } => {
            let bytes = index.buffer.read();
            index.buffer.ensure_live()?;
            let data = bytes.get(index.offset as usize..).unwrap_or(&[]);
            indices
                .clone()
                .map(|i| {
                    let value = index.format.read(data, i as usize).unwrap_or(0);
                    // Negative results wrap and fetch zeros below
                    (value as i64 + *base_vertex as i64) as u32
                })
                .collect()
        }
    };

    let vertex_kernel = pipeline.vertex().module.vertex_kernel().ok_or_else(|| {
        GraphicsError::validation(format!("pipeline {:?} has no vertex kernel", pipeline.label()))
    })?;
    let fragment_kernel = match pipeline.fragment() {
        Some(fragment) => Some(fragment.module.fragment_kernel().ok_or_else(|| {
            GraphicsError::validation(format!("pipeline {:?} has no fragment kernel", pipeline.label()))
        })?),
        None => None,
    };

    let raster = Raster {
        width: pass.width,
        height: pass.height,
        samples: sample_positions(pass.sample_count),
        viewport: draw.viewport,
        scissor: draw.scissor,
        primitive: *pipeline.primitive(),
        depth_stencil: pipeline.depth_stencil().copied(),
        multisample: *pipeline.multisample(),
        targets: pipeline.color_targets(),
        fragment: fragment_kernel,
        resources,
        stencil_reference: draw.stencil_reference,
        blend_constant: draw.blend_constant,
    };

    let layouts = &pipeline.vertex().buffers;
    let mut outputs = Vec::with_capacity(vertex_ids.len());
    for instance_index in draw.instances.clone() {
        outputs.clear();
        for &vertex_index in &vertex_ids {
            let mut input = VertexInput::default();
            for (layout, (bytes, offset)) in layouts.iter().zip(&vertex_data) {
                let element = match layout.step_mode {
                    VertexStepMode::Vertex => vertex_index,
                    VertexStepMode::Instance => instance_index,
                };
                let base = *offset + element as u64 * layout.array_stride;
                for attribute in &layout.attributes {
                    let start = (base + attribute.offset) as usize;
                    let value = start
                        .checked_add(attribute.format.size() as usize)
                        .and_then(|end| bytes.get(start..end))
                        .map_or([0.0; 4], |raw| attribute.format.decode(raw));
                    input.set(attribute.shader_location, value);
                }
            }
            let ctx = InvocationContext {
                vertex_index,
                instance_index,
            };
            outputs.push(vertex_kernel.run(ctx, &input, &raster.resources));
        }
        raster.assemble(&outputs, attachments);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct WindowVertex {
    x: f32,
    y: f32,
    /// NDC depth.
    z: f32,
    inv_w: f32,
    varyings: [[f32; 4]; MAX_VARYINGS],
}

struct Fragment {
    x: u32,
    y: u32,
    coverage: u32,
    depth: [f32; 4],
    input: FragmentInput,
}

/// Edge function: positive when `p` is to the inner side of `a -> b` for a
/// triangle of positive window area.
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

fn is_top_left(a: [f32; 2], b: [f32; 2]) -> bool {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

/// Barycentric weights of `p` if the triangle covers it. The triangle must
/// have positive window area.
fn covers(tri: [[f32; 2]; 3], area: f32, p: [f32; 2]) -> Option<[f32; 3]> {
    let [a, b, c] = tri;
    let w = [edge(b, c, p), edge(c, a, p), edge(a, b, p)];
    let edges = [(b, c), (c, a), (a, b)];
    let inside = w
        .iter()
        .zip(edges)
        .all(|(w, (from, to))| *w > 0.0 || (*w == 0.0 && is_top_left(from, to)));
    inside.then(|| w.map(|w| w / area))
}

/// Parameter range `[t0, t1]` of the segment `origin + t * delta`,
/// `t` in `[0, 1]`, that lies inside `[0, width] x [0, height]`.
fn clip_segment(origin: [f32; 2], delta: [f32; 2], width: f32, height: f32) -> Option<(f32, f32)> {
    let (mut t0, mut t1) = (0.0f32, 1.0f32);
    let bounds = [
        (-delta[0], origin[0]),
        (delta[0], width - origin[0]),
        (-delta[1], origin[1]),
        (delta[1], height - origin[1]),
    ];
    for (p, q) in bounds {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else if p < 0.0 {
            t0 = t0.max(q / p);
        } else {
            t1 = t1.min(q / p);
        }
    }
    (t0 <= t1).then_some((t0, t1))
}

struct Raster<'a> {
    width: u32,
    height: u32,
    samples: &'static [[f32; 2]],
    viewport: Viewport,
    scissor: ScissorRect,
    primitive: PrimitiveState,
    depth_stencil: Option<DepthStencilState>,
    multisample: MultisampleState,
    targets: &'a [ColorTargetState],
    fragment: Option<&'a dyn FragmentKernel>,
    resources: ShaderResources<'a>,
    stencil_reference: u32,
    blend_constant: [f32; 4],
}

impl Raster<'_> {
    fn assemble(&self, outputs: &[VertexOutput], attachments: &mut Attachments<'_>) {
        let n = outputs.len();
        match self.primitive.topology {
            PrimitiveTopology::PointList => {
                for vertex in outputs {
                    self.point(vertex, attachments);
                }
            }
            PrimitiveTopology::LineList => {
                for pair in outputs.chunks_exact(2) {
                    self.line([&pair[0], &pair[1]], attachments);
                }
            }
            PrimitiveTopology::LineStrip => {
                for pair in outputs.windows(2) {
                    self.line([&pair[0], &pair[1]], attachments);
                }
            }
            PrimitiveTopology::TriangleList => {
                for tri in outputs.chunks_exact(3) {
                    self.triangle([&tri[0], &tri[1], &tri[2]], attachments);
                }
            }
            PrimitiveTopology::TriangleStrip => {
                for i in 0..n.saturating_sub(2) {
                    // Odd triangles swap their first two vertices to keep the winding
                    let tri = if i % 2 == 0 {
                        [&outputs[i], &outputs[i + 1], &outputs[i + 2]]
                    } else {
                        [&outputs[i + 1], &outputs[i], &outputs[i + 2]]
                    };
                    self.triangle(tri, attachments);
                }
            }
        }
    }

    fn to_window(&self, v: &VertexOutput) -> Option<WindowVertex> {
        let [x, y, z, w] = v.position;
        if w <= W_EPSILON {
            return None;
        }
        let vp = &self.viewport;
        let (nx, ny) = (x / w, y / w);
        Some(WindowVertex {
            x: vp.x + (nx + 1.0) * 0.5 * vp.width,
            y: vp.y + (1.0 - ny) * 0.5 * vp.height,
            z: z / w,
            inv_w: 1.0 / w,
            varyings: v.varyings,
        })
    }

    /// Window depth of NDC depth `z`, `None` if the sample is clipped.
    fn depth_at(&self, z: f32) -> Option<f32> {
        let vp = &self.viewport;
        let z = if self.primitive.unclipped_depth {
            z.clamp(0.0, 1.0)
        } else if (0.0..=1.0).contains(&z) {
            z
        } else {
            return None;
        };
        Some(vp.min_depth + z * (vp.max_depth - vp.min_depth))
    }

    /// Pixel rows and columns a window-space box can touch.
    fn bounds(&self, min: [f32; 2], max: [f32; 2]) -> (Range<u32>, Range<u32>) {
        let vp = &self.viewport;
        let lo = |value: f32, scissor: u32, viewport: f32| value.floor().max(viewport.floor()).max(0.0).max(scissor as f32) as u32;
        let hi = |value: f32, scissor_end: u32, viewport_end: f32, size: u32| {
            let end = value.ceil().min(viewport_end.ceil()).max(0.0) as u32;
            end.min(scissor_end).min(size)
        };
        let x0 = lo(min[0], self.scissor.x, vp.x);
        let y0 = lo(min[1], self.scissor.y, vp.y);
        let x1 = hi(max[0], self.scissor.x + self.scissor.width, vp.x + vp.width, self.width);
        let y1 = hi(max[1], self.scissor.y + self.scissor.height, vp.y + vp.height, self.height);
        (x0..x1.max(x0), y0..y1.max(y0))
    }

    /// Perspective-correct varyings and `1 / w` for screen-space `weights`.
    fn interpolate(vertices: &[WindowVertex], weights: &[f32]) -> ([[f32; 4]; MAX_VARYINGS], f32) {
        let corrected: Vec<f32> = vertices.iter().zip(weights).map(|(v, l)| l * v.inv_w).collect();
        let inv_w: f32 = corrected.iter().sum();
        let mut varyings = [[0.0; 4]; MAX_VARYINGS];
        if inv_w.abs() <= f32::MIN_POSITIVE {
            return (varyings, inv_w);
        }
        for (slot, varying) in varyings.iter_mut().enumerate() {
            for c in 0..4 {
                let sum: f32 = vertices.iter().zip(&corrected).map(|(v, b)| v.varyings[slot][c] * b).sum();
                varying[c] = sum / inv_w;
            }
        }
        (varyings, inv_w)
    }

    fn triangle(&self, vertices: [&VertexOutput; 3], attachments: &mut Attachments<'_>) {
        let (Some(a), Some(b), Some(c)) = (
            self.to_window(vertices[0]),
            self.to_window(vertices[1]),
            self.to_window(vertices[2]),
        ) else {
            return;
        };

        // Window y is flipped, so counter-clockwise in NDC is negative here
        let window_area = edge([a.x, a.y], [b.x, b.y], [c.x, c.y]);
        if window_area == 0.0 || !window_area.is_finite() {
            return;
        }
        let ccw = window_area < 0.0;
        let front_facing = ccw == (self.primitive.front_face == FrontFace::Ccw);
        match self.primitive.cull_mode {
            CullMode::Front if front_facing => return,
            CullMode::Back if !front_facing => return,
            _ => {}
        }

        let mut verts = [a, b, c];
        if window_area < 0.0 {
            verts.swap(1, 2);
        }
        let area = window_area.abs();
        let tri = verts.map(|v| [v.x, v.y]);

        let min = [
            verts.iter().map(|v| v.x).fold(f32::INFINITY, f32::min),
            verts.iter().map(|v| v.y).fold(f32::INFINITY, f32::min),
        ];
        let max = [
            verts.iter().map(|v| v.x).fold(f32::NEG_INFINITY, f32::max),
            verts.iter().map(|v| v.y).fold(f32::NEG_INFINITY, f32::max),
        ];
        let (xs, ys) = self.bounds(min, max);
        let viewport_ok = |p: [f32; 2]| self.in_viewport(p);

        for py in ys {
            for px in xs.clone() {
                let mut coverage = 0u32;
                let mut depth = [0.0f32; 4];
                for (s, offset) in self.samples.iter().enumerate() {
                    let p = [px as f32 + offset[0], py as f32 + offset[1]];
                    if !viewport_ok(p) {
                        continue;
                    }
                    let Some(l) = covers(tri, area, p) else {
                        continue;
                    };
                    let z = l[0] * verts[0].z + l[1] * verts[1].z + l[2] * verts[2].z;
                    if let Some(d) = self.depth_at(z) {
                        coverage |= 1 << s;
                        depth[s] = d;
                    }
                }
                if coverage == 0 {
                    continue;
                }

                let center = [px as f32 + 0.5, py as f32 + 0.5];
                let l = [
                    edge(tri[1], tri[2], center) / area,
                    edge(tri[2], tri[0], center) / area,
                    edge(tri[0], tri[1], center) / area,
                ];
                let z = l[0] * verts[0].z + l[1] * verts[1].z + l[2] * verts[2].z;
                let center_depth = self.depth_at(z.clamp(0.0, 1.0)).unwrap_or(0.0);
                let (varyings, inv_w) = Self::interpolate(&verts, &l);
                self.shade(
                    Fragment {
                        x: px,
                        y: py,
                        coverage,
                        depth,
                        input: FragmentInput {
                            frag_coord: [center[0], center[1], center_depth, inv_w],
                            front_facing,
                            varyings,
                        },
                    },
                    attachments,
                );
            }
        }
    }

    fn line(&self, vertices: [&VertexOutput; 2], attachments: &mut Attachments<'_>) {
        let (Some(a), Some(b)) = (self.to_window(vertices[0]), self.to_window(vertices[1])) else {
            return;
        };
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let Some((t0, t1)) = clip_segment([a.x, a.y], [dx, dy], self.width as f32, self.height as f32) else {
            return;
        };
        let limit = (self.width + self.height).max(1) as f32;
        let steps = (dx.abs().max(dy.abs()) * (t1 - t0)).ceil().clamp(1.0, limit) as u32;
        for i in 0..steps {
            let t = t0 + (t1 - t0) * (i as f32 + 0.5) / steps as f32;
            self.pixel([a.x + dx * t, a.y + dy * t], &[a, b], &[1.0 - t, t], attachments);
        }
    }

    fn point(&self, vertex: &VertexOutput, attachments: &mut Attachments<'_>) {
        if let Some(v) = self.to_window(vertex) {
            self.pixel([v.x, v.y], &[v], &[1.0], attachments);
        }
    }

    fn in_viewport(&self, p: [f32; 2]) -> bool {
        let vp = &self.viewport;
        p[0] >= vp.x && p[1] >= vp.y && p[0] < vp.x + vp.width && p[1] < vp.y + vp.height
    }

    /// Covers every sample of the pixel containing `p`.
    fn pixel(&self, p: [f32; 2], vertices: &[WindowVertex], weights: &[f32], attachments: &mut Attachments<'_>) {
        if p[0] < 0.0 || p[1] < 0.0 || !self.in_viewport(p) {
            return;
        }
        let (px, py) = (p[0] as u32, p[1] as u32);
        if px >= self.width || py >= self.height || !self.scissor.contains(px, py) {
            return;
        }
        let z: f32 = vertices.iter().zip(weights).map(|(v, l)| v.z * l).sum();
        let Some(depth) = self.depth_at(z) else {
            return;
        };
        let (varyings, inv_w) = Self::interpolate(vertices, weights);
        self.shade(
            Fragment {
                x: px,
                y: py,
                coverage: (1 << self.samples.len()) - 1,
                depth: [depth; 4],
                input: FragmentInput {
                    frag_coord: [px as f32 + 0.5, py as f32 + 0.5, depth, inv_w],
                    front_facing: true,
                    varyings,
                },
            },
            attachments,
        );
    }

    fn shade(&self, fragment: Fragment, attachments: &mut Attachments<'_>) {
        let mut coverage = fragment.coverage & self.multisample.mask as u32;
        if coverage == 0 {
            return;
        }
        let output = match self.fragment {
            Some(kernel) => {
                let output = kernel.run(&fragment.input, &self.resources);
                if output.is_discarded() {
                    return;
                }
                Some(output)
            }
            None => None,
        };
        if self.multisample.alpha_to_coverage_enabled {
            if let Some(output) = &output {
                let alpha = output.target(0)[3].clamp(0.0, 1.0);
                let kept = (alpha * self.samples.len() as f32).round() as u32;
                coverage &= (1u32 << kept) - 1;
            }
        }

        let (x, y) = (fragment.x, fragment.y);
        for sample in 0..self.samples.len() as u32 {
            if coverage & (1 << sample) == 0 {
                continue;
            }
            if !self.depth_stencil_test(attachments, &fragment, sample) {
                continue;
            }
            let Some(output) = &output else {
                continue;
            };
            for (index, (state, target)) in self.targets.iter().zip(attachments.colors.iter_mut()).enumerate() {
                let src = output.target(index);
                let dst = target.storage.get(x, y, target.layer, sample);
                let mut value = match &state.blend {
                    Some(blend) => blend.apply(src, dst, self.blend_constant),
                    None => src,
                };
                let channels = [ColorWrites::RED, ColorWrites::GREEN, ColorWrites::BLUE, ColorWrites::ALPHA];
                for (c, channel) in channels.iter().enumerate() {
                    if !state.write_mask.contains(*channel) {
                        value[c] = dst[c];
                    }
                }
                target.storage.set(x, y, target.layer, sample, value);
            }
        }
    }

    /// Runs the stencil and depth tests for one sample and applies their
    /// writes. Returns whether the color writes proceed.
    fn depth_stencil_test(&self, attachments: &mut Attachments<'_>, fragment: &Fragment, sample: u32) -> bool {
        let (Some(state), Some(target)) = (self.depth_stencil.as_ref(), attachments.depth.as_mut()) else {
            return true;
        };
        let (x, y, layer) = (fragment.x, fragment.y, target.layer);
        let stored = target.storage.get(x, y, layer, sample);
        let depth = fragment.depth[sample as usize];

        let stencil_enabled = state.format.has_stencil() && state.stencil.is_enabled();
        let face = if fragment.input.front_facing {
            state.stencil.front
        } else {
            state.stencil.back
        };
        let reference = self.stencil_reference;
        let write_mask = state.stencil.write_mask;
        let mut stencil = stored[1] as u32;

        if stencil_enabled {
            let read_mask = state.stencil.read_mask;
            if !face.compare.passes(reference & read_mask, stencil & read_mask) {
                stencil = face.fail_op.apply(stencil, reference, write_mask);
                target.storage.set(x, y, layer, sample, [stored[0], stencil as f32, 0.0, 0.0]);
                return false;
            }
        }
        if !state.depth_compare.passes(depth, stored[0]) {
            if stencil_enabled {
                stencil = face.depth_fail_op.apply(stencil, reference, write_mask);
                target.storage.set(x, y, layer, sample, [stored[0], stencil as f32, 0.0, 0.0]);
            }
            return false;
        }
        if stencil_enabled {
            stencil = face.pass_op.apply(stencil, reference, write_mask);
        }
        if stencil_enabled || state.depth_write_enabled {
            let depth = if state.depth_write_enabled { depth } else { stored[0] };
            target.storage.set(x, y, layer, sample, [depth, stencil as f32, 0.0, 0.0]);
        }
        true
    }
}
