//! # Rotating Cube
//!
//! Demonstrates:
//! - Interleaved vertex input (position and color from one buffer)
//! - Depth testing against a `Depth24PlusStencil8` attachment
//! - Back-face culling
//! - A model-view-projection matrix streamed into a uniform buffer every
//!   frame through [`Frame::upload`](redlilium_frame::Frame::upload)

use std::time::Duration;

use glam::{Mat4, Vec3, Vec4};
use redlilium_frame::{
    fragment_fn, vertex_fn, BindGroupDescriptor, BindGroupLayoutDescriptor, BufferDescriptor, BufferUsage, Color,
    ColorAttachment, CompareFunction, CullMode, DepthStencilAttachment, DepthStencilState, FragmentOutput,
    FragmentState, GraphicsError, Operations, PipelineLayoutDescriptor, PrimitiveState, RenderPassDescriptor,
    RenderPipelineDescriptor, ShaderProgram, ShaderStageFlags, TextureDescriptor, TextureFormat, TextureUsage,
    TextureView, VertexBufferLayout, VertexFormat, VertexOutput, VertexState,
};

use crate::cube::{CUBE_COLOR_OFFSET, CUBE_POSITION_OFFSET, CUBE_VERTEX_ARRAY, CUBE_VERTEX_COUNT, CUBE_VERTEX_SIZE};
use crate::{ExampleContext, FrameCallback, SURFACE_FORMAT};

pub const TITLE: &str = "Rotating Cube";
pub const DESCRIPTION: &str = "The rotating cube demonstrates vertex input and update of uniform data every frame.";

/// Format of the depth attachment used by both cube examples.
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;
/// Surface clear color of both cube examples.
pub const CLEAR_COLOR: Color = Color::new(0.5, 0.5, 0.5, 1.0);

const VERTEX_SHADER: &str = r#"#version 450
layout(set = 0, binding = 0) uniform Uniforms {
    mat4 modelViewProjectionMatrix;
} uniforms;

layout(location = 0) in vec4 position;
layout(location = 1) in vec4 color;

layout(location = 0) out vec4 fragColor;

void main() {
    gl_Position = uniforms.modelViewProjectionMatrix * position;
    fragColor = color;
}
"#;

pub(crate) const FRAGMENT_SHADER: &str = r#"#version 450
layout(location = 0) in vec4 fragColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = fragColor;
}
"#;

/// Perspective projection with a 72 degree vertical field of view.
pub fn projection(aspect: f32) -> Mat4 {
    Mat4::perspective_rh(2.0 * std::f32::consts::PI / 5.0, aspect, 1.0, 100.0)
}

/// The cube's model-view-projection matrix at `elapsed`.
pub fn transformation_matrix(projection: Mat4, elapsed: Duration) -> Mat4 {
    let now = elapsed.as_secs_f32();
    let axis = Vec3::new(now.sin(), now.cos(), 0.0);
    let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)) * Mat4::from_axis_angle(axis, 1.0);
    projection * view
}

/// The vertex layout of [`CUBE_VERTEX_ARRAY`] with position at location 0
/// and color at location 1.
pub(crate) fn cube_vertex_layout() -> VertexBufferLayout {
    VertexBufferLayout::new(CUBE_VERTEX_SIZE)
        .with_attribute(VertexFormat::Float32x4, CUBE_POSITION_OFFSET, 0)
        .with_attribute(VertexFormat::Float32x4, CUBE_COLOR_OFFSET, 1)
}

/// Passes the interpolated vertex color through.
pub(crate) fn color_fragment_program() -> ShaderProgram {
    ShaderProgram::fragment(fragment_fn(|input, _| FragmentOutput::color(input.varying(0))))
}

pub(crate) fn cube_primitive() -> PrimitiveState {
    PrimitiveState::default().with_cull_mode(CullMode::Back)
}

/// Clears the color attachment to [`CLEAR_COLOR`] and depth to 1.0.
pub(crate) fn cube_pass(color: &TextureView, depth: &TextureView) -> RenderPassDescriptor {
    RenderPassDescriptor::new()
        .with_color_attachment(ColorAttachment::new(color).with_clear(CLEAR_COLOR))
        .with_depth_stencil_attachment(
            DepthStencilAttachment::new(depth)
                .with_depth_ops(Operations::clear(1.0))
                .with_stencil_ops(Operations::clear(0)),
        )
}

pub fn init(ctx: &ExampleContext) -> Result<FrameCallback, GraphicsError> {
    let device = ctx.device().clone();
    let mut scheduler = ctx.create_scheduler()?;
    let projection_matrix = projection(ctx.aspect());

    let vertices = device.create_buffer_init(
        &BufferDescriptor::new(0, BufferUsage::VERTEX).with_label("cube vertices"),
        bytemuck::cast_slice(&CUBE_VERTEX_ARRAY),
    )?;

    let uniforms_layout = device.create_bind_group_layout(
        &BindGroupLayoutDescriptor::new()
            .with_label("uniforms")
            .with_uniform_buffer(0, ShaderStageFlags::VERTEX),
    )?;
    let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor::new(vec![uniforms_layout.clone()]))?;

    let vertex = ctx.compile_module(
        "rotating cube vertex",
        VERTEX_SHADER,
        ShaderProgram::vertex(vertex_fn(|_, input, resources| {
            let mvp: Mat4 = resources.uniform(0, 0).unwrap_or(Mat4::IDENTITY);
            let position = mvp * Vec4::from_array(input.location(0));
            VertexOutput::new(position.to_array()).with_varying(0, input.location(1))
        })),
    )?;
    let fragment = ctx.compile_module("cube fragment", FRAGMENT_SHADER, color_fragment_program())?;

    let pipeline = device.create_render_pipeline(
        &RenderPipelineDescriptor::new(&layout, VertexState::new(&vertex).with_buffer(cube_vertex_layout()))
            .with_label("rotating cube")
            .with_fragment(FragmentState::new(&fragment).with_target(SURFACE_FORMAT))
            .with_primitive(cube_primitive())
            .with_depth_stencil(DepthStencilState::depth(DEPTH_FORMAT, CompareFunction::Less)),
    )?;

    let depth_texture = device.create_texture(
        &TextureDescriptor::new_2d(ctx.width(), ctx.height(), DEPTH_FORMAT, TextureUsage::RENDER_ATTACHMENT)
            .with_label("cube depth"),
    )?;
    let depth_view = depth_texture.create_view(&Default::default())?;

    let uniform_buffer = device
        .create_buffer(
            &BufferDescriptor::new(std::mem::size_of::<Mat4>() as u64, BufferUsage::UNIFORM | BufferUsage::COPY_DST)
                .with_label("cube uniforms"),
        )?
        .into_buffer();
    let uniform_bind_group =
        device.create_bind_group(&BindGroupDescriptor::new(&uniforms_layout).with_buffer(0, &uniform_buffer))?;

    Ok(Box::new(move |elapsed| {
        let mvp = transformation_matrix(projection_matrix, elapsed);

        let mut frame = scheduler.begin_frame()?;
        frame.upload(&uniform_buffer, 0, bytemuck::bytes_of(&mvp))?;
        let view = frame.surface_view().clone();
        frame.render_pass(&cube_pass(&view, &depth_view).with_label("rotating cube"), |pass| {
            pass.set_pipeline(&pipeline)?;
            pass.set_bind_group(0, &uniform_bind_group)?;
            pass.set_vertex_buffer(0, &vertices, 0)?;
            pass.draw(CUBE_VERTEX_COUNT, 1, 0, 0)
        })?;
        frame.submit()?;
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_center_projects_to_origin() {
        for seconds in [0.0, 0.7, 3.2] {
            let mvp = transformation_matrix(projection(1.0), Duration::from_secs_f32(seconds));
            let clip = mvp * Vec4::new(0.0, 0.0, 0.0, 1.0);
            let ndc = clip / clip.w;
            assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
            assert!(ndc.z > 0.0 && ndc.z < 1.0, "depth {} outside [0, 1]", ndc.z);
        }
    }

    #[test]
    fn test_rotation_changes_over_time() {
        let start = transformation_matrix(projection(1.0), Duration::ZERO);
        let later = transformation_matrix(projection(1.0), Duration::from_secs(1));
        assert_ne!(start, later);
    }
}
